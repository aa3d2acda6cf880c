//! Step handlers: the only layer that calls out to the provider.
//!
//! One dispatch function rather than one type per action — the action set is
//! closed and small, so a `match` inside `call_provider`/`evaluate` plays the
//! donor's "dispatch table keyed by the tag" role (see
//! `durable/src/engine/registry.rs` for the heavier, type-erased version of the
//! same idea, not needed here). Never persists anything itself; the worker in
//! `engine.rs` owns the Step/Operation state the outcome implies, matching the
//! donor's "handlers don't write to the store" split.

use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;

use crate::provider::{ProviderClient, ProviderError};
use crate::retry::RetryPolicy;
use crate::types::{Step, StepAction, StepState, WaitCondition};

/// Everything a handler needs besides the Step itself.
pub struct StepContext<'a> {
    pub cluster_id: &'a str,
    pub wait_timeout: std::time::Duration,
    pub poll_interval: std::time::Duration,
    pub retry_policy: &'a RetryPolicy,
    pub cancel: &'a mut watch::Receiver<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed,
    Failed { reason: String },
    Intervention { reason: String },
    /// Cancellation observed at a suspension point; the Step is left exactly
    /// where it was so restart reconciliation can resume it later.
    Cancelled,
}

/// Races `fut` against `cancel` so that a provider call, and not only the
/// fixed-interval sleep between polls, returns control to the worker within
/// one poll interval of a shutdown or force-delete.
async fn cancellable<T>(
    fut: impl std::future::Future<Output = T>,
    cancel: &mut watch::Receiver<bool>,
) -> Option<T> {
    tokio::select! {
        result = fut => Some(result),
        _ = cancel.changed() => None,
    }
}

pub async fn dispatch_step(
    step: &mut Step,
    ctx: &mut StepContext<'_>,
    provider: &dyn ProviderClient,
) -> StepOutcome {
    if step.is_wait_step() {
        poll_wait_step(step, ctx, provider).await
    } else {
        run_action_step(step, ctx, provider).await
    }
}

async fn run_action_step(
    step: &mut Step,
    ctx: &mut StepContext<'_>,
    provider: &dyn ProviderClient,
) -> StepOutcome {
    if matches!(step.action, StepAction::VerifyEngineVersion { .. }) {
        return verify_engine_version(step, ctx, provider).await;
    }

    let resuming = step.state == StepState::InProgress;
    if resuming {
        let Some(checked) = cancellable(already_applied(&step.action, ctx.cluster_id, provider), ctx.cancel).await
        else {
            return StepOutcome::Cancelled;
        };
        match checked {
            Ok(Some(result)) => {
                step.result = Some(result);
                step.state = StepState::Completed;
                step.completed_at = Some(Utc::now());
                return StepOutcome::Completed;
            }
            Ok(None) => {}
            Err(ProviderError::Terminal(msg)) => {
                step.state = StepState::Failed;
                step.error = Some(msg.clone());
                return StepOutcome::Failed { reason: msg };
            }
            Err(ProviderError::Transient(msg)) => {
                warn!(error = %msg, step = %step.name, "could not verify already-applied state on resume, re-issuing");
            }
        }
    } else {
        step.state = StepState::InProgress;
        step.started_at = Some(Utc::now());
    }

    loop {
        step.attempt += 1;
        let Some(called) = cancellable(call_provider(&step.action, ctx.cluster_id, provider), ctx.cancel).await
        else {
            return StepOutcome::Cancelled;
        };
        match called {
            Ok(result) => {
                if result.is_some() {
                    step.result = result;
                }
                step.state = StepState::Completed;
                step.completed_at = Some(Utc::now());
                return StepOutcome::Completed;
            }
            Err(ProviderError::Terminal(msg)) => {
                step.state = StepState::Failed;
                step.error = Some(msg.clone());
                return StepOutcome::Failed { reason: msg };
            }
            Err(ProviderError::Transient(msg)) => {
                step.error = Some(msg.clone());
                if !ctx.retry_policy.has_attempts_remaining(step.attempt) {
                    step.state = StepState::Failed;
                    return StepOutcome::Failed { reason: msg };
                }
                let delay = ctx.retry_policy.delay_for_attempt(step.attempt);
                warn!(error = %msg, step = %step.name, attempt = step.attempt, ?delay, "transient provider error, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancel.changed() => return StepOutcome::Cancelled,
                }
            }
        }
    }
}

async fn verify_engine_version(
    step: &mut Step,
    ctx: &mut StepContext<'_>,
    provider: &dyn ProviderClient,
) -> StepOutcome {
    let StepAction::VerifyEngineVersion { expected_engine_version } = &step.action else {
        unreachable!("caller matched VerifyEngineVersion");
    };
    step.state = StepState::InProgress;
    step.started_at = Some(Utc::now());
    step.attempt += 1;

    let Some(described) = cancellable(provider.describe_cluster(ctx.cluster_id), ctx.cancel).await else {
        return StepOutcome::Cancelled;
    };

    match described {
        Ok(snapshot) if &snapshot.engine_version == expected_engine_version => {
            step.state = StepState::Completed;
            step.completed_at = Some(Utc::now());
            StepOutcome::Completed
        }
        Ok(snapshot) => {
            let reason = format!(
                "expected engine_version={expected_engine_version}, observed {}",
                snapshot.engine_version
            );
            step.state = StepState::Failed;
            step.error = Some(reason.clone());
            StepOutcome::Failed { reason }
        }
        Err(err) => {
            let reason = err.to_string();
            step.state = StepState::Failed;
            step.error = Some(reason.clone());
            StepOutcome::Failed { reason }
        }
    }
}

/// Whether `action`'s effect is already observable on the cluster — checked
/// only on resume, so a crash between "provider accepted the call" and
/// "engine persisted completed" doesn't re-submit a mutating request.
/// Reboot/failover/switchover have no reliable pre-check from a
/// [`crate::types::ClusterSnapshot`] alone; those rely on the provider's own
/// idempotency rather than a re-submission guard here.
async fn already_applied(
    action: &StepAction,
    cluster_id: &str,
    provider: &dyn ProviderClient,
) -> Result<Option<Value>, ProviderError> {
    match action {
        StepAction::RebootInstance { .. }
        | StepAction::Failover { .. }
        | StepAction::SwitchoverBlueGreenDeployment { .. } => return Ok(None),
        _ => {}
    }

    let snapshot = provider.describe_cluster(cluster_id).await?;

    let applied = match action {
        StepAction::ModifyInstance {
            instance_id,
            target_instance_type,
        } => snapshot
            .instances
            .iter()
            .any(|i| &i.id == instance_id && &i.instance_type == target_instance_type && i.status == "available"),
        StepAction::CreateInstance { instance_id } => {
            snapshot.instances.iter().any(|i| &i.id == instance_id)
        }
        StepAction::DeleteInstance { instance_id } => {
            !snapshot.instances.iter().any(|i| &i.id == instance_id)
        }
        StepAction::CreateClusterParameterGroup { name, .. } => {
            matches!(&snapshot.parameter_group_name, Some(n) if n == name)
        }
        StepAction::CreateBlueGreenDeployment {
            target_engine_version,
            ..
        } => snapshot
            .active_blue_green_deployment
            .as_ref()
            .is_some_and(|d| &d.target_engine_version == target_engine_version),
        StepAction::DeleteBlueGreenDeployment { .. } => snapshot.active_blue_green_deployment.is_none(),
        _ => false,
    };

    if !applied {
        return Ok(None);
    }

    let result = match action {
        StepAction::CreateBlueGreenDeployment { .. } => snapshot
            .active_blue_green_deployment
            .as_ref()
            .and_then(|d| serde_json::to_value(d).ok()),
        _ => None,
    };
    Ok(Some(result.unwrap_or(Value::Null)))
}

async fn call_provider(
    action: &StepAction,
    cluster_id: &str,
    provider: &dyn ProviderClient,
) -> Result<Option<Value>, ProviderError> {
    match action {
        StepAction::ModifyInstance {
            instance_id,
            target_instance_type,
        } => {
            provider.modify_instance(instance_id, target_instance_type).await?;
            Ok(None)
        }
        StepAction::Failover { target_instance_id } => {
            provider.failover(cluster_id, target_instance_id.as_deref()).await?;
            Ok(None)
        }
        StepAction::RebootInstance { instance_id } => {
            provider.reboot_instance(instance_id).await?;
            Ok(None)
        }
        StepAction::CreateInstance { instance_id } => {
            provider.create_instance(cluster_id, instance_id).await?;
            Ok(None)
        }
        StepAction::DeleteInstance { instance_id } => {
            provider.delete_instance(instance_id).await?;
            Ok(None)
        }
        StepAction::CreateClusterParameterGroup {
            name,
            target_engine_version,
            copy_from,
        } => {
            provider
                .create_cluster_parameter_group(name, target_engine_version, copy_from.as_deref())
                .await?;
            Ok(Some(serde_json::json!({ "parameter_group_name": name })))
        }
        StepAction::CreateBlueGreenDeployment {
            target_engine_version,
            parameter_group_name,
        } => {
            let info = provider
                .create_blue_green_deployment(cluster_id, target_engine_version, parameter_group_name.as_deref())
                .await?;
            Ok(Some(serde_json::to_value(&info).unwrap_or(Value::Null)))
        }
        StepAction::SwitchoverBlueGreenDeployment { deployment_id } => {
            provider.switchover_blue_green_deployment(deployment_id).await?;
            Ok(None)
        }
        StepAction::DeleteBlueGreenDeployment { deployment_id } => {
            provider.delete_blue_green_deployment(deployment_id).await?;
            Ok(None)
        }
        StepAction::VerifyEngineVersion { .. } | StepAction::Wait => {
            unreachable!("handled before reaching call_provider")
        }
    }
}

enum ConditionState {
    Holds,
    NotYet(String),
    Unreachable(String),
}

fn evaluate(condition: &WaitCondition, snapshot: &crate::types::ClusterSnapshot) -> ConditionState {
    match condition {
        WaitCondition::InstanceTypeAndAvailable {
            instance_id,
            instance_type,
        } => match snapshot.instances.iter().find(|i| &i.id == instance_id) {
            None => ConditionState::Unreachable(format!("instance {instance_id} no longer exists")),
            Some(i) if i.status == "failed" => {
                ConditionState::Unreachable(format!("instance {instance_id} entered status=failed"))
            }
            Some(i) if &i.instance_type == instance_type && i.status == "available" => ConditionState::Holds,
            Some(i) => ConditionState::NotYet(format!("instance_type={} status={}", i.instance_type, i.status)),
        },
        WaitCondition::InstanceAvailable { instance_id } => {
            match snapshot.instances.iter().find(|i| &i.id == instance_id) {
                None => ConditionState::NotYet("instance not yet visible".to_string()),
                Some(i) if i.status == "failed" => {
                    ConditionState::Unreachable(format!("instance {instance_id} entered status=failed"))
                }
                Some(i) if i.status == "available" => ConditionState::Holds,
                Some(i) => ConditionState::NotYet(format!("status={}", i.status)),
            }
        }
        WaitCondition::FailoverComplete => match snapshot.writer() {
            Some(w) if w.status == "available" => ConditionState::Holds,
            Some(w) => ConditionState::NotYet(format!("writer status={}", w.status)),
            None => ConditionState::NotYet("no writer observed yet".to_string()),
        },
        WaitCondition::BlueGreenDeploymentStatus { status, .. } => {
            match &snapshot.active_blue_green_deployment {
                None => ConditionState::NotYet("no active deployment observed yet".to_string()),
                Some(d) if &d.status == status => ConditionState::Holds,
                Some(d) if d.status == "FAILED" => {
                    ConditionState::Unreachable(format!("deployment {} entered status=FAILED", d.deployment_id))
                }
                Some(d) => ConditionState::NotYet(format!("status={}", d.status)),
            }
        }
        WaitCondition::BlueGreenSwitchoverComplete { .. } => match &snapshot.active_blue_green_deployment {
            None => ConditionState::Holds,
            Some(d) if d.status == "SWITCHOVER_COMPLETED" => ConditionState::Holds,
            Some(d) if d.status == "FAILED" => {
                ConditionState::Unreachable(format!("deployment {} entered status=FAILED", d.deployment_id))
            }
            Some(d) => ConditionState::NotYet(format!("status={}", d.status)),
        },
        WaitCondition::InstanceAbsent { instance_id } => {
            if snapshot.instances.iter().any(|i| &i.id == instance_id) {
                ConditionState::NotYet("instance still present".to_string())
            } else {
                ConditionState::Holds
            }
        }
    }
}

async fn poll_wait_step(
    step: &mut Step,
    ctx: &mut StepContext<'_>,
    provider: &dyn ProviderClient,
) -> StepOutcome {
    let condition = step
        .wait_condition
        .clone()
        .expect("wait step always carries a wait_condition");

    if step.state == StepState::Pending {
        step.state = StepState::Waiting;
        step.started_at = Some(Utc::now());
    }

    let deadline = step.started_at.unwrap_or_else(Utc::now)
        + chrono::Duration::from_std(ctx.wait_timeout).unwrap_or(chrono::Duration::zero());

    loop {
        step.attempt += 1;
        let Some(described) = cancellable(provider.describe_cluster(ctx.cluster_id), ctx.cancel).await else {
            return StepOutcome::Cancelled;
        };
        match described {
            Ok(snapshot) => match evaluate(&condition, &snapshot) {
                ConditionState::Holds => {
                    step.last_observed = Some(condition.description());
                    step.state = StepState::Completed;
                    step.completed_at = Some(Utc::now());
                    return StepOutcome::Completed;
                }
                ConditionState::Unreachable(reason) => {
                    step.last_observed = Some(reason.clone());
                    step.state = StepState::Failed;
                    step.error = Some(reason.clone());
                    return StepOutcome::Failed { reason };
                }
                ConditionState::NotYet(observed) => {
                    step.last_observed = Some(observed);
                }
            },
            Err(ProviderError::Terminal(msg)) => {
                step.state = StepState::Failed;
                step.error = Some(msg.clone());
                return StepOutcome::Failed { reason: msg };
            }
            Err(ProviderError::Transient(msg)) => {
                warn!(error = %msg, step = %step.name, "transient error observing cluster, retrying at next poll tick");
            }
        }

        if Utc::now() >= deadline {
            let reason = "timeout".to_string();
            step.state = StepState::Failed;
            step.error = Some(reason.clone());
            return StepOutcome::Failed { reason };
        }

        tokio::select! {
            _ = tokio::time::sleep(ctx.poll_interval) => {}
            _ = ctx.cancel.changed() => return StepOutcome::Cancelled,
        }
    }
}

/// After a `create_blue_green_deployment` step completes, propagate the
/// provider-assigned deployment id into downstream steps the builder stamped
/// with the placeholder id `"pending"` (the real id isn't known until the
/// create call returns).
pub fn propagate_blue_green_deployment_id(steps: &mut [Step], from_index: usize, deployment_id: &str) {
    for step in steps.iter_mut().skip(from_index) {
        match &mut step.action {
            StepAction::SwitchoverBlueGreenDeployment { deployment_id: d } if d == "pending" => {
                *d = deployment_id.to_string();
            }
            StepAction::DeleteBlueGreenDeployment { deployment_id: d } if d == "pending" => {
                *d = deployment_id.to_string();
            }
            _ => {}
        }
        match &mut step.wait_condition {
            Some(WaitCondition::BlueGreenDeploymentStatus { deployment_id: d, .. }) if d == "pending" => {
                *d = deployment_id.to_string();
            }
            Some(WaitCondition::BlueGreenSwitchoverComplete { deployment_id: d }) if d == "pending" => {
                *d = deployment_id.to_string();
            }
            _ => {}
        }
    }
}
