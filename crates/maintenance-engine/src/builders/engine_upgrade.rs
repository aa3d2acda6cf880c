use super::BuilderError;
use crate::types::{ClusterSnapshot, EngineUpgradeParams, Step, StepAction, WaitCondition};

/// Blue/green deployment upgrade path. Adopts an already-active deployment
/// instead of creating a new one, validating the target version still
/// matches what's in flight.
pub fn build(params: &EngineUpgradeParams, snapshot: &ClusterSnapshot) -> Result<Vec<Step>, BuilderError> {
    if !snapshot.upgrade_targets.is_empty()
        && !snapshot
            .upgrade_targets
            .iter()
            .any(|t| t == &params.target_engine_version)
    {
        return Err(BuilderError::UnknownTargetEngineVersion {
            value: params.target_engine_version.clone(),
            allowed: snapshot.upgrade_targets.clone(),
        });
    }

    let mut steps = Vec::new();

    let deployment_id = if let Some(existing) = &snapshot.active_blue_green_deployment {
        if existing.target_engine_version != params.target_engine_version {
            return Err(BuilderError::MismatchedBlueGreenTarget {
                existing: existing.target_engine_version.clone(),
                requested: params.target_engine_version.clone(),
            });
        }
        existing.deployment_id.clone()
    } else {
        if let Some(pg_name) = &params.db_cluster_parameter_group_name {
            steps.push(Step::new(
                "create_cluster_parameter_group",
                format!("create parameter group {pg_name} for engine version {}", params.target_engine_version),
                StepAction::CreateClusterParameterGroup {
                    name: pg_name.clone(),
                    target_engine_version: params.target_engine_version.clone(),
                    copy_from: snapshot.parameter_group_name.clone(),
                },
            ));
        }

        steps.push(Step::new(
            "create_blue_green_deployment",
            format!("create blue/green deployment targeting engine version {}", params.target_engine_version),
            StepAction::CreateBlueGreenDeployment {
                target_engine_version: params.target_engine_version.clone(),
                parameter_group_name: params.db_cluster_parameter_group_name.clone(),
            },
        ));
        steps.push(Step::wait_step(
            "wait_deployment_available",
            WaitCondition::BlueGreenDeploymentStatus {
                deployment_id: "pending".to_string(),
                status: "AVAILABLE".to_string(),
            },
        ));
        // The deployment id isn't known until the create step runs; the handler
        // fills it in from the step's result and the wait step reads it back
        // from there rather than from this placeholder.
        "pending".to_string()
    };

    steps.push(Step::new(
        "switchover_blue_green_deployment",
        format!("switch over blue/green deployment {deployment_id}"),
        StepAction::SwitchoverBlueGreenDeployment {
            deployment_id: deployment_id.clone(),
        },
    ));
    steps.push(Step::wait_step(
        "wait_switchover_complete",
        WaitCondition::BlueGreenSwitchoverComplete {
            deployment_id: deployment_id.clone(),
        },
    ));

    steps.push(Step::new(
        "delete_blue_green_deployment",
        format!("delete old cluster via blue/green deployment {deployment_id}"),
        StepAction::DeleteBlueGreenDeployment {
            deployment_id: deployment_id.clone(),
        },
    ));

    steps.push(Step::new(
        "verify_engine_version",
        format!("verify cluster engine_version={}", params.target_engine_version),
        StepAction::VerifyEngineVersion {
            expected_engine_version: params.target_engine_version.clone(),
        },
    ));

    Ok(steps)
}
