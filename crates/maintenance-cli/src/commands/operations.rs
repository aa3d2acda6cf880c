// Operation lifecycle commands: create, inspect, start, pause, resume, delete.

use crate::client::Client;
use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};
use anyhow::Result;
use clap::Subcommand;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Subcommand)]
pub enum OperationsCommand {
    /// Create a new operation (state=created, no steps built yet)
    Create {
        /// Target cluster id
        #[arg(long)]
        cluster_id: String,

        /// Operation type
        #[arg(long, value_parser = ["instance_type_change", "engine_upgrade", "instance_cycle"])]
        r#type: String,

        /// instance_type_change: new instance class
        #[arg(long)]
        target_instance_type: Option<String>,

        /// engine_upgrade: target engine version
        #[arg(long)]
        target_engine_version: Option<String>,

        /// engine_upgrade: parameter group to attach to the upgraded cluster
        #[arg(long)]
        parameter_group_name: Option<String>,

        /// instance_type_change / instance_cycle: instance ids to leave untouched
        #[arg(long)]
        exclude: Vec<String>,

        /// instance_type_change / instance_cycle: skip provisioning a temporary reader
        #[arg(long)]
        skip_temp_instance: bool,

        /// Provider region override
        #[arg(long)]
        region: Option<String>,

        /// Wait timeout in seconds, bounded [60, 7200]
        #[arg(long)]
        wait_timeout: Option<u64>,
    },

    /// List all known operations
    List,

    /// Get one operation's current snapshot
    Get { id: Uuid },

    /// Get one operation's event log
    Events { id: Uuid },

    /// Build steps and start executing
    Start { id: Uuid },

    /// Pause a running operation
    Pause {
        id: Uuid,
        #[arg(long, default_value = "requested via CLI")]
        reason: String,
    },

    /// Resume a paused operation with an operator decision
    Resume {
        id: Uuid,
        #[arg(long, value_parser = ["continue", "rollback", "abort", "mark_complete"])]
        action: String,
        #[arg(long, default_value = "")]
        comment: String,
    },

    /// Update the wait timeout of a non-terminal operation
    SetTimeout { id: Uuid, seconds: u64 },

    /// Delete an operation (only while state=created)
    Delete { id: Uuid },
}

pub async fn run(command: OperationsCommand, client: &Client, output: OutputFormat, quiet: bool) -> Result<()> {
    match command {
        OperationsCommand::Create {
            cluster_id,
            r#type,
            target_instance_type,
            target_engine_version,
            parameter_group_name,
            exclude,
            skip_temp_instance,
            region,
            wait_timeout,
        } => {
            let params = match r#type.as_str() {
                "instance_type_change" => json!({
                    "type": "instance_type_change",
                    "target_instance_type": target_instance_type
                        .ok_or_else(|| anyhow::anyhow!("--target-instance-type is required for instance_type_change"))?,
                    "exclude_instances": exclude,
                    "skip_temp_instance": skip_temp_instance,
                }),
                "engine_upgrade" => json!({
                    "type": "engine_upgrade",
                    "target_engine_version": target_engine_version
                        .ok_or_else(|| anyhow::anyhow!("--target-engine-version is required for engine_upgrade"))?,
                    "db_cluster_parameter_group_name": parameter_group_name,
                }),
                "instance_cycle" => json!({
                    "type": "instance_cycle",
                    "exclude_instances": exclude,
                    "skip_temp_instance": skip_temp_instance,
                }),
                other => anyhow::bail!("unknown operation type '{other}'"),
            };
            let body = json!({
                "cluster_id": cluster_id,
                "region": region,
                "params": params,
                "wait_timeout": wait_timeout,
            });
            let op: Value = client.post("/operations", &body).await?;
            print_operation(&op, output, quiet);
        }

        OperationsCommand::List => {
            let ops: Vec<Value> = client.get("/operations").await?;
            if output.is_text() {
                print_table_header(&[("ID", 36), ("TYPE", 22), ("STATE", 12), ("CLUSTER", 20)]);
                for op in &ops {
                    print_table_row(&[
                        (op["id"].as_str().unwrap_or(""), 36),
                        (op["op_type"].as_str().unwrap_or(""), 22),
                        (op["state"].as_str().unwrap_or(""), 12),
                        (op["cluster_id"].as_str().unwrap_or(""), 20),
                    ]);
                }
            } else {
                output.print_value(&ops);
            }
        }

        OperationsCommand::Get { id } => {
            let op: Value = client.get(&format!("/operations/{id}")).await?;
            print_operation(&op, output, quiet);
        }

        OperationsCommand::Events { id } => {
            let events: Vec<Value> = client.get(&format!("/operations/{id}/events")).await?;
            if output.is_text() {
                for event in &events {
                    println!(
                        "{}  {:<24}  {}",
                        event["timestamp"].as_str().unwrap_or(""),
                        event["type"].as_str().unwrap_or(""),
                        event["message"].as_str().unwrap_or(""),
                    );
                }
            } else {
                output.print_value(&events);
            }
        }

        OperationsCommand::Start { id } => {
            let op: Value = client.post(&format!("/operations/{id}/start"), &json!({})).await?;
            print_operation(&op, output, quiet);
        }

        OperationsCommand::Pause { id, reason } => {
            let op: Value = client
                .post(&format!("/operations/{id}/pause"), &json!({ "reason": reason }))
                .await?;
            print_operation(&op, output, quiet);
        }

        OperationsCommand::Resume { id, action, comment } => {
            let op: Value = client
                .post(
                    &format!("/operations/{id}/resume"),
                    &json!({ "action": action, "comment": comment }),
                )
                .await?;
            print_operation(&op, output, quiet);
        }

        OperationsCommand::SetTimeout { id, seconds } => {
            let op: Value = client
                .patch(&format!("/operations/{id}"), &json!({ "wait_timeout": seconds }))
                .await?;
            print_operation(&op, output, quiet);
        }

        OperationsCommand::Delete { id } => {
            client.delete(&format!("/operations/{id}")).await?;
            if !quiet && output.is_text() {
                println!("deleted {id}");
            }
        }
    }
    Ok(())
}

fn print_operation(op: &Value, output: OutputFormat, quiet: bool) {
    if output.is_text() {
        if quiet {
            println!("{}", op["id"].as_str().unwrap_or(""));
            return;
        }
        print_field("ID", op["id"].as_str().unwrap_or(""));
        print_field("Type", op["op_type"].as_str().unwrap_or(""));
        print_field("State", op["state"].as_str().unwrap_or(""));
        print_field("Cluster", op["cluster_id"].as_str().unwrap_or(""));
        print_field(
            "Step",
            &format!(
                "{}/{}",
                op["current_step_index"].as_u64().unwrap_or(0),
                op["steps"].as_array().map(|s| s.len()).unwrap_or(0)
            ),
        );
        if let Some(reason) = op["pause_reason"].as_str() {
            print_field("Pause reason", reason);
        }
        if let Some(err) = op["last_error"].as_str() {
            print_field("Last error", err);
        }
    } else {
        output.print_value(op);
    }
}
