//! Core data model: operations, steps, events and the intervention protocol.
//!
//! Mirrors the donor `durable` crate's `workflow::event`/`persistence::store` shape
//! (tagged enums, `#[serde(tag = "type")]`, a handful of `with_*` builder methods)
//! but the vocabulary is maintenance-operation specific rather than workflow-generic.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lower bound for `wait_timeout_secs`, inclusive.
pub const WAIT_TIMEOUT_MIN_SECS: u64 = 60;
/// Upper bound for `wait_timeout_secs`, inclusive.
pub const WAIT_TIMEOUT_MAX_SECS: u64 = 7200;
/// Default wait timeout when none is supplied.
pub const WAIT_TIMEOUT_DEFAULT_SECS: u64 = 2700;

/// Check whether a requested wait timeout is within the allowed bounds.
pub fn validate_wait_timeout(secs: u64) -> Result<u64, String> {
    if !(WAIT_TIMEOUT_MIN_SECS..=WAIT_TIMEOUT_MAX_SECS).contains(&secs) {
        return Err(format!(
            "wait_timeout must be between {WAIT_TIMEOUT_MIN_SECS} and {WAIT_TIMEOUT_MAX_SECS} seconds, got {secs}"
        ));
    }
    Ok(secs)
}

/// The kind of maintenance operation requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    InstanceTypeChange,
    EngineUpgrade,
    InstanceCycle,
    /// Reserved for a future operation type; not yet a variant of
    /// [`OperationParams`], so it can't be requested over the API today.
    StorageTypeChange,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstanceTypeChange => "instance_type_change",
            Self::EngineUpgrade => "engine_upgrade",
            Self::InstanceCycle => "instance_cycle",
            Self::StorageTypeChange => "storage_type_change",
        }
    }
}

/// Type-tagged parameters, one variant per [`OperationType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationParams {
    InstanceTypeChange(InstanceTypeChangeParams),
    EngineUpgrade(EngineUpgradeParams),
    InstanceCycle(InstanceCycleParams),
}

impl OperationParams {
    pub fn op_type(&self) -> OperationType {
        match self {
            Self::InstanceTypeChange(_) => OperationType::InstanceTypeChange,
            Self::EngineUpgrade(_) => OperationType::EngineUpgrade,
            Self::InstanceCycle(_) => OperationType::InstanceCycle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InstanceTypeChangeParams {
    pub target_instance_type: String,
    #[serde(default)]
    pub exclude_instances: Vec<String>,
    #[serde(default)]
    pub skip_temp_instance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EngineUpgradeParams {
    pub target_engine_version: String,
    #[serde(default)]
    pub db_cluster_parameter_group_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InstanceCycleParams {
    #[serde(default)]
    pub exclude_instances: Vec<String>,
    #[serde(default)]
    pub skip_temp_instance: bool,
}

/// A client request to create an operation (POST /operations body).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OperationRequest {
    pub cluster_id: String,
    #[serde(default)]
    pub region: Option<String>,
    pub params: OperationParams,
    #[serde(default)]
    pub wait_timeout: Option<u64>,
}

/// Lifecycle state of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Created,
    Running,
    Paused,
    Completed,
    Failed,
    RollingBack,
    RolledBack,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }
}

/// The unit of work: a maintenance operation against one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Operation {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub region: Option<String>,
    pub cluster_id: String,
    pub op_type: OperationType,
    pub params: OperationParams,
    pub state: OperationState,
    pub steps: Vec<Step>,
    pub current_step_index: usize,
    pub wait_timeout_secs: u64,
    pub pause_reason: Option<String>,
    pub last_error: Option<String>,
    #[schema(value_type = Vec<usize>)]
    pub pause_before_steps: BTreeSet<usize>,
}

impl Operation {
    pub fn new(id: Uuid, request: OperationRequest, now: DateTime<Utc>) -> Self {
        let wait_timeout_secs = request.wait_timeout.unwrap_or(WAIT_TIMEOUT_DEFAULT_SECS);
        Self {
            id,
            created_at: now,
            started_at: None,
            completed_at: None,
            region: request.region,
            cluster_id: request.cluster_id,
            op_type: request.params.op_type(),
            params: request.params,
            state: OperationState::Created,
            steps: Vec::new(),
            current_step_index: 0,
            wait_timeout_secs,
            pause_reason: None,
            last_error: None,
            pause_before_steps: BTreeSet::new(),
        }
    }

    /// `current_step_index` never exceeds `len(steps)`, and only equals it once the
    /// operation has actually run every step (a handful of terminal states).
    pub fn check_step_index_invariant(&self) -> bool {
        if self.current_step_index > self.steps.len() {
            return false;
        }
        let at_end = self.current_step_index == self.steps.len();
        let expect_end = matches!(
            self.state,
            OperationState::Completed | OperationState::Failed | OperationState::RolledBack
        );
        // Failed can happen before the last step (so "< len" is also valid there); only
        // completed/rolled_back require the index to have actually reached the end.
        if matches!(
            self.state,
            OperationState::Completed | OperationState::RolledBack
        ) {
            at_end == expect_end
        } else {
            true
        }
    }
}

/// State of one [`Step`] within an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    InProgress,
    Waiting,
    Completed,
    Failed,
    Skipped,
}

/// One provider action a [`Step`] performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    ModifyInstance {
        instance_id: String,
        target_instance_type: String,
    },
    Failover {
        /// Promote a specific reader, or let the provider pick.
        target_instance_id: Option<String>,
    },
    RebootInstance {
        instance_id: String,
    },
    CreateInstance {
        instance_id: String,
    },
    DeleteInstance {
        instance_id: String,
    },
    CreateClusterParameterGroup {
        name: String,
        target_engine_version: String,
        copy_from: Option<String>,
    },
    CreateBlueGreenDeployment {
        target_engine_version: String,
        parameter_group_name: Option<String>,
    },
    SwitchoverBlueGreenDeployment {
        deployment_id: String,
    },
    DeleteBlueGreenDeployment {
        deployment_id: String,
    },
    VerifyEngineVersion {
        expected_engine_version: String,
    },
    /// A pure polling step: no provider call, the handler just evaluates
    /// `wait_condition` on a fixed interval. Builders emit this as the second
    /// half of every (action, wait) pair, so a single maintenance action always
    /// expands into two [`Step`]s: the call itself, then waiting for its effect
    /// to become observable.
    Wait,
}

/// The observable precondition a [`Step`] polls for before it is considered complete.
///
/// `None` means the step's provider call is synchronous from the engine's point of
/// view (e.g. a verification check) and the handler transitions straight to
/// `completed`/`failed` without entering `waiting`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum WaitCondition {
    InstanceTypeAndAvailable {
        instance_id: String,
        instance_type: String,
    },
    InstanceAvailable {
        instance_id: String,
    },
    FailoverComplete,
    BlueGreenDeploymentStatus {
        deployment_id: String,
        status: String,
    },
    BlueGreenSwitchoverComplete {
        deployment_id: String,
    },
    InstanceAbsent {
        instance_id: String,
    },
}

impl WaitCondition {
    pub fn description(&self) -> String {
        match self {
            Self::InstanceTypeAndAvailable {
                instance_id,
                instance_type,
            } => format!("instance {instance_id} status=available and instance_type={instance_type}"),
            Self::InstanceAvailable { instance_id } => format!("instance {instance_id} status=available"),
            Self::FailoverComplete => "cluster failover complete".to_string(),
            Self::BlueGreenDeploymentStatus {
                deployment_id,
                status,
            } => format!("blue/green deployment {deployment_id} status={status}"),
            Self::BlueGreenSwitchoverComplete { deployment_id } => {
                format!("blue/green deployment {deployment_id} switchover complete")
            }
            Self::InstanceAbsent { instance_id } => format!("instance {instance_id} no longer exists"),
        }
    }
}

/// One provider action plus its observable precondition for advancing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Step {
    pub name: String,
    pub description: String,
    pub action: StepAction,
    pub wait_condition: Option<WaitCondition>,
    pub state: StepState,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub last_observed: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Opaque, handler-populated result (e.g. a provider-assigned deployment id)
    /// used both to render status and to detect "already applied" on resume.
    #[serde(default)]
    pub result: Option<Value>,
    /// Name of the compensating step to run if this step is rolled back; absent
    /// means "no compensator defined" (treated as a no-op, see DESIGN.md open
    /// question (c)).
    #[serde(default)]
    pub rollback_hint: Option<String>,
}

impl Step {
    pub fn new(name: impl Into<String>, description: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            action,
            wait_condition: None,
            state: StepState::Pending,
            started_at: None,
            completed_at: None,
            attempt: 0,
            last_observed: None,
            error: None,
            result: None,
            rollback_hint: None,
        }
    }

    pub fn with_wait(mut self, condition: WaitCondition) -> Self {
        self.wait_condition = Some(condition);
        self
    }

    /// Build the polling half of an (action, wait) pair — see
    /// [`StepAction::Wait`].
    pub fn wait_step(name: impl Into<String>, condition: WaitCondition) -> Self {
        let description = condition.description();
        Self::new(name, description, StepAction::Wait).with_wait(condition)
    }

    pub fn is_wait_step(&self) -> bool {
        matches!(self.action, StepAction::Wait)
    }

    pub fn with_rollback_hint(mut self, step_name: impl Into<String>) -> Self {
        self.rollback_hint = Some(step_name.into());
        self
    }
}

/// Append-only audit entry bound to an operation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub message: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl Event {
    pub fn new(event_type: EventType, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    OperationCreated,
    OperationStarted,
    StepStarted,
    StepWaiting,
    StepCompleted,
    StepFailed,
    OperationPaused,
    InterventionRequested,
    InterventionResolved,
    OperationCompleted,
    OperationFailed,
    OperationRolledBack,
    /// A rollback step had no defined compensator and was skipped (DESIGN.md
    /// open question (c)).
    StepSkippedDuringRollback,
    Error,
}

/// Operator decision on a paused operation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InterventionResponse {
    pub action: InterventionAction,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InterventionAction {
    Continue,
    Rollback,
    Abort,
    MarkComplete,
}

/// Role of a cluster member; there is exactly one writer at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InstanceRole {
    Writer,
    Reader,
}

/// One observed cluster member, as returned by the provider's describe call.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InstanceInfo {
    pub id: String,
    pub role: InstanceRole,
    pub instance_type: String,
    pub status: String,
    #[serde(default)]
    pub autoscaled: bool,
}

/// A provider-native blue/green deployment in progress for a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BlueGreenDeploymentInfo {
    pub deployment_id: String,
    pub target_engine_version: String,
    pub status: String,
}

/// Pre-flight snapshot of a cluster, as consumed by the recipe builders.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClusterSnapshot {
    pub cluster_id: String,
    pub engine_version: String,
    pub instances: Vec<InstanceInfo>,
    #[serde(default)]
    pub upgrade_targets: Vec<String>,
    #[serde(default)]
    pub orderable_instance_types: Vec<String>,
    #[serde(default)]
    pub active_blue_green_deployment: Option<BlueGreenDeploymentInfo>,
    #[serde(default)]
    pub parameter_group_name: Option<String>,
}

impl ClusterSnapshot {
    pub fn writer(&self) -> Option<&InstanceInfo> {
        self.instances.iter().find(|i| i.role == InstanceRole::Writer)
    }

    pub fn readers(&self) -> Vec<&InstanceInfo> {
        self.instances
            .iter()
            .filter(|i| i.role == InstanceRole::Reader)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_timeout_bounds() {
        assert!(validate_wait_timeout(60).is_ok());
        assert!(validate_wait_timeout(59).is_err());
        assert!(validate_wait_timeout(7200).is_ok());
        assert!(validate_wait_timeout(7201).is_err());
    }

    #[test]
    fn step_index_invariant_holds_for_fresh_operation() {
        let op = Operation::new(
            Uuid::now_v7(),
            OperationRequest {
                cluster_id: "demo".into(),
                region: None,
                params: OperationParams::InstanceCycle(InstanceCycleParams {
                    exclude_instances: vec![],
                    skip_temp_instance: true,
                }),
                wait_timeout: None,
            },
            Utc::now(),
        );
        assert!(op.check_step_index_invariant());
        assert_eq!(op.wait_timeout_secs, WAIT_TIMEOUT_DEFAULT_SECS);
    }

    #[test]
    fn operation_params_roundtrip_tag() {
        let params = OperationParams::EngineUpgrade(EngineUpgradeParams {
            target_engine_version: "15.7".into(),
            db_cluster_parameter_group_name: None,
        });
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["type"], "engine_upgrade");
        let parsed: OperationParams = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.op_type(), OperationType::EngineUpgrade);
    }
}
