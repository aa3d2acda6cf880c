use std::collections::HashSet;

use super::BuilderError;
use crate::types::{ClusterSnapshot, InstanceCycleParams, Step, StepAction, WaitCondition};

/// Deterministic rolling reboot: reboot each eligible reader in turn, then
/// failover and reboot the old writer. Mirrors `instance_type_change`'s
/// ordering and temp-instance bracketing but with `RebootInstance` in place
/// of `ModifyInstance`.
pub fn build(params: &InstanceCycleParams, snapshot: &ClusterSnapshot) -> Result<Vec<Step>, BuilderError> {
    let writer = snapshot
        .writer()
        .ok_or_else(|| BuilderError::NoWriterFound(snapshot.cluster_id.clone()))?;

    let exclude: HashSet<&str> = params.exclude_instances.iter().map(String::as_str).collect();
    let mut readers: Vec<_> = snapshot
        .readers()
        .into_iter()
        .filter(|i| !i.autoscaled && !exclude.contains(i.id.as_str()))
        .collect();
    readers.sort_by(|a, b| a.id.cmp(&b.id));

    let single_instance_cluster = snapshot.instances.len() == 1;
    let needs_temp_instance = !params.skip_temp_instance && single_instance_cluster;

    let mut steps = Vec::new();
    let mut temp_instance_id = None;

    if needs_temp_instance {
        let temp_id = format!("{}-temp", writer.id);
        steps.push(Step::new(
            "create_temp_reader",
            format!("create temporary reader {temp_id} to keep the cluster readable"),
            StepAction::CreateInstance {
                instance_id: temp_id.clone(),
            },
        ));
        steps.push(Step::wait_step(
            "wait_temp_reader_available",
            WaitCondition::InstanceAvailable {
                instance_id: temp_id.clone(),
            },
        ));
        temp_instance_id = Some(temp_id);
    }

    let mut rebooted_reader_id = None;
    for reader in &readers {
        steps.push(Step::new(
            format!("reboot_{}", reader.id),
            format!("reboot instance {}", reader.id),
            StepAction::RebootInstance {
                instance_id: reader.id.clone(),
            },
        ));
        steps.push(Step::wait_step(
            format!("wait_{}", reader.id),
            WaitCondition::InstanceAvailable {
                instance_id: reader.id.clone(),
            },
        ));
        rebooted_reader_id.get_or_insert_with(|| reader.id.clone());
    }

    steps.push(Step::new(
        "failover",
        "failover cluster to a rebooted reader so the old writer can be rebooted",
        StepAction::Failover {
            target_instance_id: rebooted_reader_id,
        },
    ));
    steps.push(Step::wait_step("wait_failover", WaitCondition::FailoverComplete));

    steps.push(
        Step::new(
            format!("reboot_{}", writer.id),
            format!("reboot old writer {}", writer.id),
            StepAction::RebootInstance {
                instance_id: writer.id.clone(),
            },
        )
        .with_rollback_hint("failover"),
    );
    steps.push(Step::wait_step(
        format!("wait_{}", writer.id),
        WaitCondition::InstanceAvailable {
            instance_id: writer.id.clone(),
        },
    ));

    if let Some(temp_id) = temp_instance_id {
        steps.push(Step::new(
            "delete_temp_reader",
            format!("delete temporary reader {temp_id}"),
            StepAction::DeleteInstance {
                instance_id: temp_id.clone(),
            },
        ));
        steps.push(Step::wait_step(
            "wait_temp_reader_deleted",
            WaitCondition::InstanceAbsent { instance_id: temp_id },
        ));
    }

    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InstanceInfo, InstanceRole};

    fn snapshot(instances: Vec<InstanceInfo>) -> ClusterSnapshot {
        ClusterSnapshot {
            cluster_id: "demo".into(),
            engine_version: "15.4".into(),
            instances,
            upgrade_targets: vec![],
            orderable_instance_types: vec![],
            active_blue_green_deployment: None,
            parameter_group_name: None,
        }
    }

    fn instance(id: &str, role: InstanceRole) -> InstanceInfo {
        InstanceInfo {
            id: id.into(),
            role,
            instance_type: "db.r6g.large".into(),
            status: "available".into(),
            autoscaled: false,
        }
    }

    #[test]
    fn single_writer_no_temp_instance_is_two_steps() {
        let snap = snapshot(vec![instance("w", InstanceRole::Writer)]);
        let params = InstanceCycleParams {
            exclude_instances: vec![],
            skip_temp_instance: true,
        };
        let steps = build(&params, &snap).unwrap();
        assert_eq!(steps.len(), 2);
        assert!(matches!(steps[0].action, StepAction::RebootInstance { .. }));
    }

    #[test]
    fn single_writer_with_temp_instance_bracketing() {
        let snap = snapshot(vec![instance("w", InstanceRole::Writer)]);
        let params = InstanceCycleParams {
            exclude_instances: vec![],
            skip_temp_instance: false,
        };
        let steps = build(&params, &snap).unwrap();
        assert_eq!(steps[0].name, "create_temp_reader");
        assert_eq!(steps[steps.len() - 2].name, "delete_temp_reader");
    }

    #[test]
    fn reboots_readers_before_failover_then_writer() {
        let snap = snapshot(vec![
            instance("w", InstanceRole::Writer),
            instance("r1", InstanceRole::Reader),
            instance("r2", InstanceRole::Reader),
        ]);
        let params = InstanceCycleParams {
            exclude_instances: vec![],
            skip_temp_instance: true,
        };
        let steps = build(&params, &snap).unwrap();
        let names: Vec<_> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "reboot_r1", "wait_r1", "reboot_r2", "wait_r2", "failover", "wait_failover", "reboot_w", "wait_w",
            ]
        );
    }

    #[test]
    fn empty_exclude_matches_omitted() {
        let snap = snapshot(vec![
            instance("w", InstanceRole::Writer),
            instance("r1", InstanceRole::Reader),
        ]);
        let with_empty = InstanceCycleParams {
            exclude_instances: vec![],
            skip_temp_instance: true,
        };
        let steps = build(&with_empty, &snap).unwrap();
        assert!(steps.iter().any(|s| s.name == "reboot_r1"));
    }
}
