// In-process demo: no HTTP server, no provider out there to call. Builds an
// Engine against a seeded MockProviderClient and drives one scenario to
// completion so it can be inspected without standing up the API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Subcommand;
use maintenance_engine::{
    ClusterSnapshot, Engine, EngineConfig, InstanceInfo, InstanceRole, MockProviderClient,
    NullNotifier, NullStore, OperationParams, OperationRequest, OperationState,
};

use crate::output::OutputFormat;

#[derive(Subcommand)]
pub enum DemoCommand {
    /// Resize every instance in a single-instance cluster
    Single,
    /// Resize a writer + 2 readers, one at a time
    Multi,
    /// Upgrade engine version via blue/green deployment
    Upgrade,
}

pub async fn run(command: DemoCommand, output: OutputFormat) -> Result<()> {
    let provider = Arc::new(MockProviderClient::new());
    let (cluster_id, request) = match command {
        DemoCommand::Single => {
            provider.seed_cluster(single_instance_cluster());
            ("demo-single", instance_type_change_request("demo-single"))
        }
        DemoCommand::Multi => {
            provider.seed_cluster(writer_plus_readers_cluster());
            ("demo-multi", instance_type_change_request("demo-multi"))
        }
        DemoCommand::Upgrade => {
            provider.seed_cluster(upgradeable_cluster());
            ("demo-upgrade", engine_upgrade_request("demo-upgrade"))
        }
    };

    let store = Arc::new(NullStore::new());
    let notifier = Arc::new(NullNotifier);
    let mut config = EngineConfig::default();
    config.poll_interval = Duration::from_secs(1);

    let engine = Engine::new(store, provider, notifier, config).await?;

    println!("creating {cluster_id} operation...");
    let op = engine.create(request).await?;
    let id = op.id;

    println!("starting operation {id}...");
    let mut op = engine.start(id).await?;

    for _ in 0..120 {
        if op.state.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        op = engine.get(id)?;
    }

    if output.is_text() {
        println!("final state: {:?}", op.state);
        for (i, step) in op.steps.iter().enumerate() {
            println!("  [{i}] {} -- {:?}", step.name, step.state);
        }
        if let Some(err) = &op.last_error {
            println!("last error: {err}");
        }
    } else {
        output.print_value(&op);
    }

    if !matches!(op.state, OperationState::Completed) {
        bail!("demo operation did not reach completed state (ended in {:?})", op.state);
    }
    Ok(())
}

fn instance_type_change_request(cluster_id: &str) -> OperationRequest {
    OperationRequest {
        cluster_id: cluster_id.to_string(),
        region: None,
        params: OperationParams::InstanceTypeChange(maintenance_engine::InstanceTypeChangeParams {
            target_instance_type: "db.r6g.xlarge".to_string(),
            exclude_instances: vec![],
            skip_temp_instance: true,
        }),
        wait_timeout: Some(300),
    }
}

fn engine_upgrade_request(cluster_id: &str) -> OperationRequest {
    OperationRequest {
        cluster_id: cluster_id.to_string(),
        region: None,
        params: OperationParams::EngineUpgrade(maintenance_engine::EngineUpgradeParams {
            target_engine_version: "15.7".to_string(),
            db_cluster_parameter_group_name: None,
        }),
        wait_timeout: Some(600),
    }
}

fn single_instance_cluster() -> ClusterSnapshot {
    ClusterSnapshot {
        cluster_id: "demo-single".to_string(),
        engine_version: "15.4".to_string(),
        instances: vec![InstanceInfo {
            id: "demo-single-1".to_string(),
            role: InstanceRole::Writer,
            instance_type: "db.r6g.large".to_string(),
            status: "available".to_string(),
            autoscaled: false,
        }],
        upgrade_targets: vec![],
        orderable_instance_types: vec!["db.r6g.xlarge".to_string()],
        active_blue_green_deployment: None,
        parameter_group_name: None,
    }
}

fn writer_plus_readers_cluster() -> ClusterSnapshot {
    ClusterSnapshot {
        cluster_id: "demo-multi".to_string(),
        engine_version: "15.4".to_string(),
        instances: vec![
            InstanceInfo {
                id: "demo-multi-writer".to_string(),
                role: InstanceRole::Writer,
                instance_type: "db.r6g.large".to_string(),
                status: "available".to_string(),
                autoscaled: false,
            },
            InstanceInfo {
                id: "demo-multi-reader-1".to_string(),
                role: InstanceRole::Reader,
                instance_type: "db.r6g.large".to_string(),
                status: "available".to_string(),
                autoscaled: false,
            },
            InstanceInfo {
                id: "demo-multi-reader-2".to_string(),
                role: InstanceRole::Reader,
                instance_type: "db.r6g.large".to_string(),
                status: "available".to_string(),
                autoscaled: false,
            },
        ],
        upgrade_targets: vec![],
        orderable_instance_types: vec!["db.r6g.xlarge".to_string()],
        active_blue_green_deployment: None,
        parameter_group_name: None,
    }
}

fn upgradeable_cluster() -> ClusterSnapshot {
    ClusterSnapshot {
        cluster_id: "demo-upgrade".to_string(),
        engine_version: "15.4".to_string(),
        instances: vec![InstanceInfo {
            id: "demo-upgrade-writer".to_string(),
            role: InstanceRole::Writer,
            instance_type: "db.r6g.large".to_string(),
            status: "available".to_string(),
            autoscaled: false,
        }],
        upgrade_targets: vec!["15.7".to_string()],
        orderable_instance_types: vec!["db.r6g.large".to_string()],
        active_blue_green_deployment: None,
        parameter_group_name: None,
    }
}
