//! End-to-end scenarios driving [`Engine`] against [`MockProviderClient`] and
//! [`NullStore`]: the instance-resize, engine-upgrade, pause/resume, rollback
//! and crash-recovery walkthroughs, plus cross-cutting invariants and boundary
//! cases.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use maintenance_engine::prelude::*;
use uuid::Uuid;

fn test_config() -> EngineConfig {
    EngineConfig {
        region: None,
        default_wait_timeout_secs: 60,
        poll_interval: Duration::from_millis(10),
        data_dir: None,
        auto_resume: false,
    }
}

async fn wait_until(
    engine: &Arc<Engine>,
    id: Uuid,
    pred: impl Fn(&maintenance_engine::Operation) -> bool,
) -> maintenance_engine::Operation {
    for _ in 0..500 {
        let op = engine.get(id).unwrap();
        if pred(&op) {
            return op;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held within the test timeout");
}

fn instance(id: &str, role: InstanceRole, instance_type: &str) -> InstanceInfo {
    InstanceInfo {
        id: id.to_string(),
        role,
        instance_type: instance_type.to_string(),
        status: "available".to_string(),
        autoscaled: false,
    }
}

/// Wraps [`MockProviderClient`], counting `modify_instance` calls per instance and
/// optionally failing the first call against a configured instance id. Grounded on
/// `handlers::tests::StubProvider`'s shape, generalized to wrap rather than
/// reimplement the simulation.
struct CountingProvider {
    inner: MockProviderClient,
    modify_calls: Mutex<HashMap<String, u32>>,
    fail_modify_for: Option<String>,
}

impl CountingProvider {
    fn new(inner: MockProviderClient) -> Self {
        Self {
            inner,
            modify_calls: Mutex::new(HashMap::new()),
            fail_modify_for: None,
        }
    }

    fn failing_on(inner: MockProviderClient, instance_id: &str) -> Self {
        Self {
            inner,
            modify_calls: Mutex::new(HashMap::new()),
            fail_modify_for: Some(instance_id.to_string()),
        }
    }

    fn modify_call_count(&self, instance_id: &str) -> u32 {
        *self.modify_calls.lock().unwrap().get(instance_id).unwrap_or(&0)
    }
}

#[async_trait]
impl ProviderClient for CountingProvider {
    async fn describe_cluster(&self, cluster_id: &str) -> Result<ClusterSnapshot, ProviderError> {
        self.inner.describe_cluster(cluster_id).await
    }

    async fn modify_instance(&self, instance_id: &str, target_instance_type: &str) -> Result<(), ProviderError> {
        *self.modify_calls.lock().unwrap().entry(instance_id.to_string()).or_insert(0) += 1;
        if self.fail_modify_for.as_deref() == Some(instance_id) {
            return Err(ProviderError::Terminal(format!("simulated failure modifying {instance_id}")));
        }
        self.inner.modify_instance(instance_id, target_instance_type).await
    }

    async fn reboot_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
        self.inner.reboot_instance(instance_id).await
    }

    async fn create_instance(&self, cluster_id: &str, instance_id: &str) -> Result<(), ProviderError> {
        self.inner.create_instance(cluster_id, instance_id).await
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
        self.inner.delete_instance(instance_id).await
    }

    async fn failover(&self, cluster_id: &str, target_instance_id: Option<&str>) -> Result<(), ProviderError> {
        self.inner.failover(cluster_id, target_instance_id).await
    }

    async fn create_cluster_parameter_group(
        &self,
        name: &str,
        target_engine_version: &str,
        copy_from: Option<&str>,
    ) -> Result<(), ProviderError> {
        self.inner.create_cluster_parameter_group(name, target_engine_version, copy_from).await
    }

    async fn create_blue_green_deployment(
        &self,
        cluster_id: &str,
        target_engine_version: &str,
        parameter_group_name: Option<&str>,
    ) -> Result<BlueGreenDeploymentInfo, ProviderError> {
        self.inner
            .create_blue_green_deployment(cluster_id, target_engine_version, parameter_group_name)
            .await
    }

    async fn switchover_blue_green_deployment(&self, deployment_id: &str) -> Result<(), ProviderError> {
        self.inner.switchover_blue_green_deployment(deployment_id).await
    }

    async fn delete_blue_green_deployment(&self, deployment_id: &str) -> Result<(), ProviderError> {
        self.inner.delete_blue_green_deployment(deployment_id).await
    }

    async fn list_upgrade_targets(&self, cluster_id: &str) -> Result<Vec<String>, ProviderError> {
        self.inner.list_upgrade_targets(cluster_id).await
    }
}

fn single_instance_snapshot() -> ClusterSnapshot {
    ClusterSnapshot {
        cluster_id: "demo-single".to_string(),
        engine_version: "15.4".to_string(),
        instances: vec![instance("demo-single-writer", InstanceRole::Writer, "db.r6g.large")],
        upgrade_targets: vec![],
        orderable_instance_types: vec!["db.r6g.xlarge".to_string()],
        active_blue_green_deployment: None,
        parameter_group_name: None,
    }
}

fn multi_instance_snapshot() -> ClusterSnapshot {
    ClusterSnapshot {
        cluster_id: "demo-multi".to_string(),
        engine_version: "15.4".to_string(),
        instances: vec![
            instance("demo-multi-writer", InstanceRole::Writer, "db.r6g.large"),
            instance("demo-multi-reader-1", InstanceRole::Reader, "db.r6g.large"),
            instance("demo-multi-reader-2", InstanceRole::Reader, "db.r6g.large"),
        ],
        upgrade_targets: vec![],
        orderable_instance_types: vec!["db.r6g.xlarge".to_string()],
        active_blue_green_deployment: None,
        parameter_group_name: None,
    }
}

fn upgrade_snapshot() -> ClusterSnapshot {
    ClusterSnapshot {
        cluster_id: "demo-upgrade".to_string(),
        engine_version: "15.4".to_string(),
        instances: vec![instance("demo-upgrade-writer", InstanceRole::Writer, "db.r6g.large")],
        upgrade_targets: vec!["15.7".to_string()],
        orderable_instance_types: vec![],
        active_blue_green_deployment: None,
        parameter_group_name: None,
    }
}

fn instance_type_change_request(cluster_id: &str) -> OperationRequest {
    OperationRequest {
        cluster_id: cluster_id.to_string(),
        region: None,
        params: OperationParams::InstanceTypeChange(InstanceTypeChangeParams {
            target_instance_type: "db.r6g.xlarge".to_string(),
            exclude_instances: vec![],
            skip_temp_instance: true,
        }),
        wait_timeout: Some(60),
    }
}

// Single-instance class change, happy path.
#[tokio::test]
async fn single_instance_happy_path_completes() {
    let provider = Arc::new(MockProviderClient::new());
    provider.seed_cluster(single_instance_snapshot());
    let store = Arc::new(NullStore::new());
    let notifier = Arc::new(NullNotifier);

    let engine = Engine::new(store, provider.clone(), notifier, test_config()).await.unwrap();
    let op = engine.create(instance_type_change_request("demo-single")).await.unwrap();
    assert_eq!(op.state, OperationState::Created);

    let started = engine.start(op.id).await.unwrap();
    assert_eq!(started.steps.len(), 2);

    let done = wait_until(&engine, op.id, |op| op.state.is_terminal()).await;
    assert_eq!(done.state, OperationState::Completed);
    assert_eq!(done.current_step_index, 2);

    let observed = provider.describe_cluster("demo-single").await.unwrap();
    assert_eq!(observed.writer().unwrap().instance_type, "db.r6g.xlarge");

    let events = engine.events(op.id).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == EventType::OperationCompleted));
}

// Multi-instance class change with a single failover.
#[tokio::test]
async fn multi_instance_resize_fails_over_and_completes() {
    let provider = Arc::new(MockProviderClient::new());
    provider.seed_cluster(multi_instance_snapshot());
    let store = Arc::new(NullStore::new());
    let notifier = Arc::new(NullNotifier);

    let engine = Engine::new(store, provider.clone(), notifier, test_config()).await.unwrap();
    let op = engine.create(instance_type_change_request("demo-multi")).await.unwrap();
    let started = engine.start(op.id).await.unwrap();
    assert_eq!(started.steps.len(), 8);
    assert_eq!(started.steps[4].name, "failover");

    let done = wait_until(&engine, op.id, |op| op.state.is_terminal()).await;
    assert_eq!(done.state, OperationState::Completed);

    let observed = provider.describe_cluster("demo-multi").await.unwrap();
    assert!(observed.instances.iter().all(|i| i.instance_type == "db.r6g.xlarge"));
    assert_eq!(observed.readers().len(), 2);

    let events = engine.events(op.id).await.unwrap();
    let failover_events = events
        .iter()
        .filter(|e| e.event_type == EventType::StepCompleted && e.message.contains("step 4"))
        .count();
    assert_eq!(failover_events, 1);
}

// Engine upgrade via blue/green deployment.
#[tokio::test]
async fn engine_upgrade_via_blue_green_completes() {
    let provider = Arc::new(MockProviderClient::new());
    provider.seed_cluster(upgrade_snapshot());
    let store = Arc::new(NullStore::new());
    let notifier = Arc::new(NullNotifier);

    let engine = Engine::new(store, provider.clone(), notifier, test_config()).await.unwrap();
    let request = OperationRequest {
        cluster_id: "demo-upgrade".to_string(),
        region: None,
        params: OperationParams::EngineUpgrade(EngineUpgradeParams {
            target_engine_version: "15.7".to_string(),
            db_cluster_parameter_group_name: None,
        }),
        wait_timeout: Some(60),
    };
    let op = engine.create(request).await.unwrap();
    let started = engine.start(op.id).await.unwrap();
    assert_eq!(started.steps.len(), 6);

    let done = wait_until(&engine, op.id, |op| op.state.is_terminal()).await;
    assert_eq!(done.state, OperationState::Completed);

    let observed = provider.describe_cluster("demo-upgrade").await.unwrap();
    assert_eq!(observed.engine_version, "15.7");
}

// Pause before step, then resume with "continue".
#[tokio::test]
async fn pause_before_step_then_continue_resumes_to_completion() {
    let provider = Arc::new(MockProviderClient::new());
    provider.seed_cluster(multi_instance_snapshot());
    let store = Arc::new(NullStore::new());
    let notifier = Arc::new(NullNotifier);

    let engine = Engine::new(store, provider.clone(), notifier, test_config()).await.unwrap();
    let op = engine.create(instance_type_change_request("demo-multi")).await.unwrap();
    let mut pause_before = BTreeSet::new();
    pause_before.insert(4); // the failover step
    engine.update_pause_before_steps(op.id, pause_before).await.unwrap();
    engine.start(op.id).await.unwrap();

    let paused = wait_until(&engine, op.id, |op| op.state == OperationState::Paused).await;
    assert_eq!(paused.current_step_index, 4);
    assert!(paused.pause_reason.as_deref().unwrap().contains("paused before step 4"));

    engine
        .resume(
            op.id,
            InterventionResponse {
                action: InterventionAction::Continue,
                comment: String::new(),
            },
        )
        .await
        .unwrap();

    let done = wait_until(&engine, op.id, |op| op.state.is_terminal()).await;
    assert_eq!(done.state, OperationState::Completed);
}

// Step failure, operator rollback, no calls issued beyond the failed step.
#[tokio::test]
async fn step_failure_then_operator_rollback_issues_no_further_calls() {
    let mock = MockProviderClient::new();
    mock.seed_cluster(single_instance_snapshot());
    let provider = Arc::new(CountingProvider::failing_on(mock, "demo-single-writer"));
    let store = Arc::new(NullStore::new());
    let notifier = Arc::new(NullNotifier);

    let engine = Engine::new(store, provider.clone(), notifier, test_config()).await.unwrap();
    let op = engine.create(instance_type_change_request("demo-single")).await.unwrap();
    engine.start(op.id).await.unwrap();

    let paused = wait_until(&engine, op.id, |op| op.state == OperationState::Paused).await;
    assert_eq!(paused.steps[0].state, StepState::Failed);
    assert!(paused.pause_reason.as_deref().unwrap().contains("step failed"));
    assert_eq!(provider.modify_call_count("demo-single-writer"), 1);

    let rolled_back = engine
        .resume(
            op.id,
            InterventionResponse {
                action: InterventionAction::Rollback,
                comment: "reverting a bad modification".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(rolled_back.state, OperationState::RolledBack);
    assert_eq!(provider.modify_call_count("demo-single-writer"), 1, "no retry after rollback");
}

// Crash-recovery. An operation is recorded mid-flight (step 1 waiting, step 0
// already applied), then the engine is constructed fresh against the same store with
// auto_resume=true, simulating a process restart.
#[tokio::test]
async fn crash_recovery_does_not_resubmit_completed_step() {
    let mut snapshot = multi_instance_snapshot();
    // reader-1 already carries the target type: the provider-side mutation landed,
    // but the engine crashed before persisting step 0 as completed.
    snapshot.instances[1].instance_type = "db.r6g.xlarge".to_string();
    let mock = MockProviderClient::new();
    mock.seed_cluster(snapshot);
    let provider = Arc::new(CountingProvider::new(mock));

    let store = Arc::new(NullStore::new());
    let request = instance_type_change_request("demo-multi");

    let steps = build_steps(
        &request.params,
        &provider.describe_cluster("demo-multi").await.unwrap(),
    )
    .unwrap();

    let mut op = maintenance_engine::Operation::new(Uuid::now_v7(), request, chrono::Utc::now());
    op.state = OperationState::Running;
    op.started_at = Some(chrono::Utc::now());
    op.steps = steps;
    op.steps[0].state = StepState::Completed;
    op.steps[1].state = StepState::Waiting;
    op.current_step_index = 1;
    store.save_operation(&op).await.unwrap();
    store
        .append_event(op.id, maintenance_engine::Event::new(EventType::OperationStarted, "restored for test"))
        .await
        .unwrap();

    let mut config = test_config();
    config.auto_resume = true;
    let notifier = Arc::new(NullNotifier);
    let engine = Engine::new(store, provider.clone(), notifier, config).await.unwrap();

    let restarted = engine.get(op.id).unwrap();
    assert_eq!(restarted.state, OperationState::Running);
    assert_eq!(restarted.current_step_index, 1);

    let done = wait_until(&engine, op.id, |op| op.state.is_terminal()).await;
    assert_eq!(done.state, OperationState::Completed);
    assert_eq!(
        provider.modify_call_count("demo-multi-reader-1"),
        0,
        "step 0 was already applied before the simulated crash; no modify should be re-issued for it"
    );
}

// Startup reconciliation is idempotent: running it a second time against the
// same persisted state must not re-pause an already-paused operation or emit a
// second pause event.
#[tokio::test]
async fn startup_reconciliation_is_idempotent_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProviderClient::new());
    provider.seed_cluster(multi_instance_snapshot());
    let request = instance_type_change_request("demo-multi");

    let steps = build_steps(&request.params, &provider.describe_cluster("demo-multi").await.unwrap()).unwrap();
    let mut op = maintenance_engine::Operation::new(Uuid::now_v7(), request, chrono::Utc::now());
    op.state = OperationState::Running;
    op.started_at = Some(chrono::Utc::now());
    op.steps = steps;
    op.steps[0].state = StepState::Completed;
    op.steps[1].state = StepState::Waiting;
    op.current_step_index = 1;

    let store = Arc::new(FileStore::new(dir.path()).await.unwrap());
    store.save_operation(&op).await.unwrap();
    store
        .append_event(op.id, maintenance_engine::Event::new(EventType::OperationStarted, "restored for test"))
        .await
        .unwrap();

    let notifier = Arc::new(NullNotifier);
    let config = test_config(); // auto_resume: false, so reconciliation pauses the Running op.

    let first = Engine::new(store.clone(), provider.clone(), notifier.clone(), config.clone())
        .await
        .unwrap();
    let after_first = first.get(op.id).unwrap();
    assert_eq!(after_first.state, OperationState::Paused);
    let events_after_first = first.events(op.id).await.unwrap();
    let pauses_after_first = events_after_first
        .iter()
        .filter(|e| e.event_type == EventType::OperationPaused)
        .count();
    assert_eq!(pauses_after_first, 1);

    let second = Engine::new(store.clone(), provider.clone(), notifier, config).await.unwrap();
    let after_second = second.get(op.id).unwrap();
    assert_eq!(after_second.state, OperationState::Paused);
    assert_eq!(after_second.current_step_index, after_first.current_step_index);
    let events_after_second = second.events(op.id).await.unwrap();
    let pauses_after_second = events_after_second
        .iter()
        .filter(|e| e.event_type == EventType::OperationPaused)
        .count();
    assert_eq!(pauses_after_second, 1, "reconciling an already-paused operation must not pause it again");
}

// Boundary: wait_timeout bounds enforced by `create`.
#[tokio::test]
async fn wait_timeout_bounds_enforced_at_create() {
    let provider = Arc::new(MockProviderClient::new());
    provider.seed_cluster(single_instance_snapshot());
    let store = Arc::new(NullStore::new());
    let notifier = Arc::new(NullNotifier);
    let engine = Engine::new(store, provider, notifier, test_config()).await.unwrap();

    let mut request = instance_type_change_request("demo-single");
    request.wait_timeout = Some(59);
    let err = engine.create(request).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let mut request = instance_type_change_request("demo-single");
    request.wait_timeout = Some(7201);
    let err = engine.create(request).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

// Boundary: an operation in state=created with no built steps rejects resume and
// delete-after-start, but start works and builds steps.
#[tokio::test]
async fn created_operation_rejects_resume_before_start() {
    let provider = Arc::new(MockProviderClient::new());
    provider.seed_cluster(single_instance_snapshot());
    let store = Arc::new(NullStore::new());
    let notifier = Arc::new(NullNotifier);
    let engine = Engine::new(store, provider, notifier, test_config()).await.unwrap();

    let op = engine.create(instance_type_change_request("demo-single")).await.unwrap();
    assert!(op.steps.is_empty());

    let err = engine
        .resume(
            op.id,
            InterventionResponse {
                action: InterventionAction::Continue,
                comment: String::new(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));

    let started = engine.start(op.id).await.unwrap();
    assert_eq!(started.steps.len(), 2);

    let err = engine.delete(op.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
}

// Universal invariant: every transition appends exactly one event naming it.
#[tokio::test]
async fn every_transition_has_a_matching_event() {
    let provider = Arc::new(MockProviderClient::new());
    provider.seed_cluster(single_instance_snapshot());
    let store = Arc::new(NullStore::new());
    let notifier = Arc::new(NullNotifier);
    let engine = Engine::new(store, provider, notifier, test_config()).await.unwrap();

    let op = engine.create(instance_type_change_request("demo-single")).await.unwrap();
    engine.start(op.id).await.unwrap();
    let done = wait_until(&engine, op.id, |op| op.state.is_terminal()).await;

    let events = engine.events(op.id).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == EventType::OperationCreated));
    assert!(events.iter().any(|e| e.event_type == EventType::OperationStarted));
    assert_eq!(
        events.iter().filter(|e| e.event_type == EventType::StepCompleted).count(),
        done.steps.len()
    );
    assert!(events.iter().any(|e| e.event_type == EventType::OperationCompleted));
}

// Universal invariant: current_step_index <= len(steps), == len(steps) only for
// completed/rolled_back.
#[tokio::test]
async fn step_index_invariant_holds_throughout() {
    let provider = Arc::new(MockProviderClient::new());
    provider.seed_cluster(multi_instance_snapshot());
    let store = Arc::new(NullStore::new());
    let notifier = Arc::new(NullNotifier);
    let engine = Engine::new(store, provider, notifier, test_config()).await.unwrap();

    let op = engine.create(instance_type_change_request("demo-multi")).await.unwrap();
    engine.start(op.id).await.unwrap();

    for _ in 0..50 {
        let op = engine.get(op.id).unwrap();
        assert!(op.check_step_index_invariant());
        if op.state.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
