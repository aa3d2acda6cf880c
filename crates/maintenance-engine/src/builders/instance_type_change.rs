use std::collections::HashSet;

use super::BuilderError;
use crate::types::{ClusterSnapshot, InstanceTypeChangeParams, Step, StepAction, WaitCondition};

/// For each non-writer instance (deterministic, sorted by id): modify to the
/// target class, then wait for it. Then failover the writer onto a modified
/// reader, wait, modify the old writer, wait. Optionally brackets a
/// single-instance cluster with a temporary reader so it always has a
/// readable member while the writer changes.
pub fn build(
    params: &InstanceTypeChangeParams,
    snapshot: &ClusterSnapshot,
) -> Result<Vec<Step>, BuilderError> {
    if !snapshot.orderable_instance_types.is_empty()
        && !snapshot
            .orderable_instance_types
            .iter()
            .any(|t| t == &params.target_instance_type)
    {
        return Err(BuilderError::UnknownTargetInstanceType {
            value: params.target_instance_type.clone(),
            allowed: snapshot.orderable_instance_types.clone(),
        });
    }

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

    let mut modified_reader_id = None;
    for reader in &readers {
        steps.push(Step::new(
            format!("modify_{}", reader.id),
            format!("modify instance {} to {}", reader.id, params.target_instance_type),
            StepAction::ModifyInstance {
                instance_id: reader.id.clone(),
                target_instance_type: params.target_instance_type.clone(),
            },
        ));
        steps.push(Step::wait_step(
            format!("wait_{}", reader.id),
            WaitCondition::InstanceTypeAndAvailable {
                instance_id: reader.id.clone(),
                instance_type: params.target_instance_type.clone(),
            },
        ));
        modified_reader_id.get_or_insert_with(|| reader.id.clone());
    }

    steps.push(Step::new(
        "failover",
        "failover cluster to a modified reader so the writer can be changed",
        StepAction::Failover {
            target_instance_id: modified_reader_id,
        },
    ));
    steps.push(Step::wait_step("wait_failover", WaitCondition::FailoverComplete));

    steps.push(
        Step::new(
            format!("modify_{}", writer.id),
            format!("modify old writer {} to {}", writer.id, params.target_instance_type),
            StepAction::ModifyInstance {
                instance_id: writer.id.clone(),
                target_instance_type: params.target_instance_type.clone(),
            },
        )
        .with_rollback_hint("failover"),
    );
    steps.push(Step::wait_step(
        format!("wait_{}", writer.id),
        WaitCondition::InstanceTypeAndAvailable {
            instance_id: writer.id.clone(),
            instance_type: params.target_instance_type.clone(),
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
            orderable_instance_types: vec!["db.r6g.large".into(), "db.r6g.xlarge".into()],
            active_blue_green_deployment: None,
            parameter_group_name: None,
        }
    }

    fn instance(id: &str, role: InstanceRole, instance_type: &str) -> InstanceInfo {
        InstanceInfo {
            id: id.into(),
            role,
            instance_type: instance_type.into(),
            status: "available".into(),
            autoscaled: false,
        }
    }

    #[test]
    fn single_instance_happy_path_is_two_steps() {
        let snap = snapshot(vec![instance(
            "demo-single-writer",
            InstanceRole::Writer,
            "db.r6g.large",
        )]);
        let params = InstanceTypeChangeParams {
            target_instance_type: "db.r6g.xlarge".into(),
            exclude_instances: vec![],
            skip_temp_instance: true,
        };
        let steps = build(&params, &snap).unwrap();
        assert_eq!(steps.len(), 2);
        assert!(matches!(steps[0].action, StepAction::ModifyInstance { .. }));
        assert!(steps[1].is_wait_step());
    }

    #[test]
    fn multi_instance_produces_expected_sequence() {
        let snap = snapshot(vec![
            instance("demo-multi-writer", InstanceRole::Writer, "db.r6g.large"),
            instance("demo-multi-reader-1", InstanceRole::Reader, "db.r6g.large"),
            instance("demo-multi-reader-2", InstanceRole::Reader, "db.r6g.large"),
        ]);
        let params = InstanceTypeChangeParams {
            target_instance_type: "db.r6g.xlarge".into(),
            exclude_instances: vec![],
            skip_temp_instance: true,
        };
        let steps = build(&params, &snap).unwrap();
        // modify+wait reader1, modify+wait reader2, failover+wait, modify+wait writer
        assert_eq!(steps.len(), 8);
        assert_eq!(steps[0].name, "modify_demo-multi-reader-1");
        assert_eq!(steps[2].name, "modify_demo-multi-reader-2");
        assert_eq!(steps[4].name, "failover");
        assert_eq!(steps[6].name, "modify_demo-multi-writer");

        let failover_count = steps
            .iter()
            .filter(|s| matches!(s.action, StepAction::Failover { .. }))
            .count();
        assert_eq!(failover_count, 1);
    }

    #[test]
    fn exclude_instances_removes_matching_reader() {
        let snap = snapshot(vec![
            instance("w", InstanceRole::Writer, "db.r6g.large"),
            instance("r1", InstanceRole::Reader, "db.r6g.large"),
            instance("r2", InstanceRole::Reader, "db.r6g.large"),
        ]);
        let params = InstanceTypeChangeParams {
            target_instance_type: "db.r6g.xlarge".into(),
            exclude_instances: vec!["r1".into()],
            skip_temp_instance: true,
        };
        let steps = build(&params, &snap).unwrap();
        assert!(steps.iter().all(|s| s.name != "modify_r1"));
        assert!(steps.iter().any(|s| s.name == "modify_r2"));
    }

    #[test]
    fn autoscaled_instances_always_excluded() {
        let mut snap = snapshot(vec![
            instance("w", InstanceRole::Writer, "db.r6g.large"),
            instance("r1", InstanceRole::Reader, "db.r6g.large"),
        ]);
        snap.instances[1].autoscaled = true;
        let params = InstanceTypeChangeParams {
            target_instance_type: "db.r6g.xlarge".into(),
            exclude_instances: vec![],
            skip_temp_instance: true,
        };
        let steps = build(&params, &snap).unwrap();
        assert!(steps.iter().all(|s| s.name != "modify_r1"));
    }

    #[test]
    fn unknown_target_instance_type_is_rejected() {
        let snap = snapshot(vec![instance("w", InstanceRole::Writer, "db.r6g.large")]);
        let params = InstanceTypeChangeParams {
            target_instance_type: "db.bogus".into(),
            exclude_instances: vec![],
            skip_temp_instance: true,
        };
        let err = build(&params, &snap).unwrap_err();
        assert!(matches!(err, BuilderError::UnknownTargetInstanceType { .. }));
    }

    #[test]
    fn deterministic_across_calls() {
        let snap = snapshot(vec![
            instance("w", InstanceRole::Writer, "db.r6g.large"),
            instance("r1", InstanceRole::Reader, "db.r6g.large"),
            instance("r2", InstanceRole::Reader, "db.r6g.large"),
        ]);
        let params = InstanceTypeChangeParams {
            target_instance_type: "db.r6g.xlarge".into(),
            exclude_instances: vec![],
            skip_temp_instance: true,
        };
        let a = build(&params, &snap).unwrap();
        let b = build(&params, &snap).unwrap();
        let names_a: Vec<_> = a.iter().map(|s| s.name.clone()).collect();
        let names_b: Vec<_> = b.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names_a, names_b);
    }
}
