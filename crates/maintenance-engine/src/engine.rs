//! The orchestrator: owns the live operation set, one worker per running
//! operation, and the intervention protocol.
//!
//! Grounded on the donor's `durable` engine shape (`engine::registry` for the
//! "own the live set, spawn a task per unit of work" idea, `worker::pool` for
//! the cancellation-signal-plus-mailbox pattern) but collapsed: there is no
//! dynamic workflow registry here — three known operation types, a closed
//! `match` dispatch is enough.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::builders::{build_steps, BuilderError};
use crate::config::EngineConfig;
use crate::handlers::{dispatch_step, propagate_blue_green_deployment_id, StepContext, StepOutcome};
use crate::notifier::Notifier;
use crate::provider::{ProviderClient, ProviderError};
use crate::retry::RetryPolicy;
use crate::store::{Store, StoreError};
use crate::types::{
    validate_wait_timeout, BlueGreenDeploymentInfo, Event, EventType, InterventionAction,
    InterventionResponse, Operation, OperationParams, OperationRequest, OperationState, StepAction,
    StepState,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("operation not found: {0}")]
    NotFound(Uuid),

    #[error("invalid operation state: expected {expected:?}, found {actual:?}")]
    InvalidState {
        expected: OperationState,
        actual: OperationState,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Builder(#[from] BuilderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("provider error: {0}")]
    Provider(ProviderError),

    #[error("worker for operation {0} is no longer running")]
    WorkerGone(Uuid),
}

struct WorkerHandle {
    task: JoinHandle<()>,
    wake: watch::Sender<bool>,
    cancel_requested: Arc<AtomicBool>,
    pause_requested: Arc<Mutex<Option<String>>>,
    intervention_tx: mpsc::Sender<InterventionResponse>,
    ack: Arc<Notify>,
}

/// Owns every live [`Operation`] plus the worker driving it, if running.
pub struct Engine {
    store: Arc<dyn Store>,
    provider: Arc<dyn ProviderClient>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
    operations: RwLock<HashMap<Uuid, Operation>>,
    workers: Mutex<HashMap<Uuid, WorkerHandle>>,
}

impl Engine {
    /// Construct the engine, loading every persisted operation and running
    /// startup reconciliation so a `Running` operation left over from a crash
    /// either resumes its worker or moves to `Paused`, never stays silently stuck.
    pub async fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn ProviderClient>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Result<Arc<Self>, EngineError> {
        let persisted = store.list_operations().await?;
        let mut operations = HashMap::new();
        for op in persisted {
            operations.insert(op.id, op);
        }

        let engine = Arc::new(Self {
            store,
            provider,
            notifier,
            config,
            operations: RwLock::new(operations),
            workers: Mutex::new(HashMap::new()),
        });

        engine.reconcile_on_startup().await?;
        Ok(engine)
    }

    async fn reconcile_on_startup(self: &Arc<Self>) -> Result<(), EngineError> {
        let running_ids: Vec<Uuid> = self
            .operations
            .read()
            .values()
            .filter(|op| op.state == OperationState::Running)
            .map(|op| op.id)
            .collect();

        for id in running_ids {
            if self.config.auto_resume {
                self.spawn_worker(id);
            } else {
                let mut op = self.snapshot(id)?;
                op.state = OperationState::Paused;
                op.pause_reason = Some("engine restarted".to_string());
                let event = Event::new(EventType::OperationPaused, "engine restarted, auto-resume disabled");
                self.apply_transition(op, event).await?;
                warn!(operation_id = %id, "paused at startup: auto_resume disabled");
            }
        }
        Ok(())
    }

    fn snapshot(&self, id: Uuid) -> Result<Operation, EngineError> {
        self.operations.read().get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    fn replace(&self, op: Operation) {
        self.operations.write().insert(op.id, op);
    }

    /// Append the event, persist the snapshot, notify, then publish the new
    /// in-memory state — in that order, so the event is durable before the
    /// transition becomes observable to any reader of the in-memory map.
    async fn apply_transition(&self, op: Operation, event: Event) -> Result<(), EngineError> {
        self.store.append_event(op.id, event.clone()).await?;
        self.store.save_operation(&op).await?;
        self.notifier.notify(op.id, &event).await;
        self.replace(op);
        Ok(())
    }

    // ---- public operations ----

    pub async fn create(&self, request: OperationRequest) -> Result<Operation, EngineError> {
        validate_params(&request.params)?;
        if let Some(timeout) = request.wait_timeout {
            validate_wait_timeout(timeout).map_err(EngineError::Validation)?;
        }

        let id = Uuid::now_v7();
        let op = Operation::new(id, request, Utc::now());
        self.store.save_operation(&op).await?;
        let event = Event::new(EventType::OperationCreated, format!("operation {id} created"));
        self.store.append_event(id, event.clone()).await?;
        self.notifier.notify(id, &event).await;
        self.replace(op.clone());
        Ok(op)
    }

    pub fn get(&self, id: Uuid) -> Result<Operation, EngineError> {
        self.snapshot(id)
    }

    pub fn list(&self) -> Vec<Operation> {
        self.operations.read().values().cloned().collect()
    }

    pub async fn events(&self, id: Uuid) -> Result<Vec<Event>, EngineError> {
        self.get(id)?;
        Ok(self.store.load_events(id).await?)
    }

    pub async fn start(self: &Arc<Self>, id: Uuid) -> Result<Operation, EngineError> {
        let mut op = self.get(id)?;
        if op.state != OperationState::Created {
            return Err(EngineError::InvalidState {
                expected: OperationState::Created,
                actual: op.state,
            });
        }

        let cluster_snapshot = self
            .provider
            .describe_cluster(&op.cluster_id)
            .await
            .map_err(EngineError::Provider)?;
        op.steps = build_steps(&op.params, &cluster_snapshot)?;
        op.state = OperationState::Running;
        op.started_at = Some(Utc::now());

        let event = Event::new(
            EventType::OperationStarted,
            format!("operation {id} started with {} steps", op.steps.len()),
        );
        self.apply_transition(op.clone(), event).await?;
        self.spawn_worker(id);
        info!(operation_id = %id, steps = op.steps.len(), "operation started");
        Ok(op)
    }

    pub async fn pause(self: &Arc<Self>, id: Uuid, reason: impl Into<String>) -> Result<Operation, EngineError> {
        let op = self.get(id)?;
        if op.state != OperationState::Running {
            return Err(EngineError::InvalidState {
                expected: OperationState::Running,
                actual: op.state,
            });
        }

        let (wake, ack) = {
            let workers = self.workers.lock();
            let handle = workers.get(&id).ok_or(EngineError::WorkerGone(id))?;
            *handle.pause_requested.lock() = Some(reason.into());
            (handle.wake.clone(), Arc::clone(&handle.ack))
        };
        let _ = wake.send(true);
        ack.notified().await;
        info!(operation_id = %id, "operation paused");
        self.get(id)
    }

    pub async fn resume(self: &Arc<Self>, id: Uuid, response: InterventionResponse) -> Result<Operation, EngineError> {
        let op = self.get(id)?;
        if op.state != OperationState::Paused {
            return Err(EngineError::InvalidState {
                expected: OperationState::Paused,
                actual: op.state,
            });
        }

        let (tx, ack) = {
            let workers = self.workers.lock();
            let handle = workers.get(&id).ok_or(EngineError::WorkerGone(id))?;
            (handle.intervention_tx.clone(), Arc::clone(&handle.ack))
        };
        tx.send(response).await.map_err(|_| EngineError::WorkerGone(id))?;
        ack.notified().await;
        info!(operation_id = %id, "intervention applied");
        self.get(id)
    }

    pub async fn update_timeout(&self, id: Uuid, wait_timeout_secs: u64) -> Result<Operation, EngineError> {
        let mut op = self.get(id)?;
        if op.state.is_terminal() {
            return Err(EngineError::Validation(format!(
                "operation {id} is already in terminal state {:?}",
                op.state
            )));
        }
        validate_wait_timeout(wait_timeout_secs).map_err(EngineError::Validation)?;
        op.wait_timeout_secs = wait_timeout_secs;
        self.store.save_operation(&op).await?;
        self.replace(op.clone());
        Ok(op)
    }

    pub async fn update_pause_before_steps(
        &self,
        id: Uuid,
        pause_before_steps: std::collections::BTreeSet<usize>,
    ) -> Result<Operation, EngineError> {
        let mut op = self.get(id)?;
        if op.state.is_terminal() {
            return Err(EngineError::Validation(format!(
                "operation {id} is already in terminal state {:?}",
                op.state
            )));
        }
        op.pause_before_steps = pause_before_steps;
        self.store.save_operation(&op).await?;
        self.replace(op.clone());
        Ok(op)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), EngineError> {
        let op = self.get(id)?;
        if op.state != OperationState::Created {
            return Err(EngineError::InvalidState {
                expected: OperationState::Created,
                actual: op.state,
            });
        }
        self.store.delete_operation(id).await?;
        self.operations.write().remove(&id);
        Ok(())
    }

    pub async fn force_delete(self: &Arc<Self>, id: Uuid) -> Result<(), EngineError> {
        self.get(id)?;
        let handle = self.workers.lock().remove(&id);
        if let Some(handle) = handle {
            handle.cancel_requested.store(true, Ordering::SeqCst);
            let _ = handle.wake.send(true);
            let _ = handle.task.await;
        }
        self.store.delete_operation(id).await?;
        self.operations.write().remove(&id);
        Ok(())
    }

    // ---- worker plumbing ----

    fn spawn_worker(self: &Arc<Self>, id: Uuid) {
        let (wake_tx, wake_rx) = watch::channel(false);
        let (intervention_tx, intervention_rx) = mpsc::channel(1);
        let cancel_requested = Arc::new(AtomicBool::new(false));
        let pause_requested = Arc::new(Mutex::new(None));
        let ack = Arc::new(Notify::new());

        let engine = Arc::clone(self);
        let cancel_for_task = Arc::clone(&cancel_requested);
        let pause_for_task = Arc::clone(&pause_requested);
        let ack_for_task = Arc::clone(&ack);

        let task = tokio::spawn(async move {
            engine
                .run_worker(id, wake_rx, intervention_rx, cancel_for_task, pause_for_task, ack_for_task)
                .await;
        });

        self.workers.lock().insert(
            id,
            WorkerHandle {
                task,
                wake: wake_tx,
                cancel_requested,
                pause_requested,
                intervention_tx,
                ack,
            },
        );
    }

    async fn run_worker(
        self: Arc<Self>,
        id: Uuid,
        wake_rx: watch::Receiver<bool>,
        intervention_rx: mpsc::Receiver<InterventionResponse>,
        cancel_requested: Arc<AtomicBool>,
        pause_requested: Arc<Mutex<Option<String>>>,
        ack: Arc<Notify>,
    ) {
        self.run_worker_inner(id, wake_rx, intervention_rx, &cancel_requested, &pause_requested, &ack)
            .await;
        self.workers.lock().remove(&id);
    }

    async fn run_worker_inner(
        &self,
        id: Uuid,
        mut wake_rx: watch::Receiver<bool>,
        mut intervention_rx: mpsc::Receiver<InterventionResponse>,
        cancel_requested: &AtomicBool,
        pause_requested: &Mutex<Option<String>>,
        ack: &Notify,
    ) {
        loop {
            if cancel_requested.load(Ordering::SeqCst) {
                return;
            }

            let mut op = match self.snapshot(id) {
                Ok(op) => op,
                Err(_) => return,
            };

            if op.current_step_index >= op.steps.len() {
                op.state = OperationState::Completed;
                op.completed_at = Some(Utc::now());
                let event = Event::new(EventType::OperationCompleted, "all steps completed");
                let _ = self.apply_transition(op, event).await;
                return;
            }

            let requested_pause = pause_requested.lock().take();
            let pause_before = op.pause_before_steps.contains(&op.current_step_index);
            if let Some(reason) = requested_pause.or_else(|| {
                pause_before.then(|| format!("paused before step {}", op.current_step_index))
            }) {
                op.state = OperationState::Paused;
                op.pause_reason = Some(reason.clone());
                let event = Event::new(EventType::OperationPaused, reason);
                if self.apply_transition(op, event).await.is_err() {
                    return;
                }
                ack.notify_one();
                match intervention_rx.recv().await {
                    Some(response) => {
                        if self.apply_intervention(id, response, ack).await.is_none() {
                            return;
                        }
                        continue;
                    }
                    None => return,
                }
            }

            let step_index = op.current_step_index;
            let cluster_id = op.cluster_id.clone();
            let retry_policy = RetryPolicy::capped_at_poll_interval(self.config.poll_interval, 5);
            let wait_timeout = std::time::Duration::from_secs(op.wait_timeout_secs);

            let outcome = {
                let mut ctx = StepContext {
                    cluster_id: &cluster_id,
                    wait_timeout,
                    poll_interval: self.config.poll_interval,
                    retry_policy: &retry_policy,
                    cancel: &mut wake_rx,
                };
                dispatch_step(&mut op.steps[step_index], &mut ctx, self.provider.as_ref()).await
            };

            match outcome {
                StepOutcome::Cancelled => {
                    let _ = self.store.save_operation(&op).await;
                    self.replace(op);
                }
                StepOutcome::Completed => {
                    if matches!(op.steps[step_index].action, StepAction::CreateBlueGreenDeployment { .. }) {
                        if let Some(result) = op.steps[step_index].result.clone() {
                            if let Ok(info) = serde_json::from_value::<BlueGreenDeploymentInfo>(result) {
                                propagate_blue_green_deployment_id(&mut op.steps, step_index + 1, &info.deployment_id);
                            }
                        }
                    }
                    op.current_step_index += 1;
                    let event = Event::new(EventType::StepCompleted, format!("step {step_index} completed"));
                    if self.apply_transition(op, event).await.is_err() {
                        return;
                    }
                }
                StepOutcome::Failed { reason } => {
                    let step_event = Event::new(EventType::StepFailed, reason.clone());
                    if self.store.append_event(id, step_event).await.is_err() {
                        return;
                    }
                    op.last_error = Some(reason.clone());
                    op.state = OperationState::Paused;
                    op.pause_reason = Some(format!("step failed: {reason}"));
                    let event = Event::new(EventType::OperationPaused, op.pause_reason.clone().unwrap());
                    if self.apply_transition(op, event).await.is_err() {
                        return;
                    }
                    ack.notify_one();
                    match intervention_rx.recv().await {
                        Some(response) => {
                            if self.apply_intervention(id, response, ack).await.is_none() {
                                return;
                            }
                        }
                        None => return,
                    }
                }
                StepOutcome::Intervention { reason } => {
                    op.state = OperationState::Paused;
                    op.pause_reason = Some(reason.clone());
                    let event = Event::new(EventType::InterventionRequested, reason);
                    if self.apply_transition(op, event).await.is_err() {
                        return;
                    }
                    ack.notify_one();
                    match intervention_rx.recv().await {
                        Some(response) => {
                            if self.apply_intervention(id, response, ack).await.is_none() {
                                return;
                            }
                        }
                        None => return,
                    }
                }
            }
        }
    }

    /// Apply an operator's decision on a paused operation. `None` means the
    /// worker should stop (a terminal state was reached); `Some(())` means
    /// the worker loop should continue.
    async fn apply_intervention(&self, id: Uuid, response: InterventionResponse, ack: &Notify) -> Option<()> {
        let mut op = self.snapshot(id).ok()?;
        match response.action {
            InterventionAction::Continue => {
                op.state = OperationState::Running;
                op.pause_reason = None;
                let event = Event::new(EventType::InterventionResolved, "continue");
                self.apply_transition(op, event).await.ok()?;
                ack.notify_one();
                Some(())
            }
            InterventionAction::Abort => {
                op.state = OperationState::Failed;
                op.pause_reason = None;
                if op.last_error.is_none() {
                    op.last_error = Some("aborted by operator".to_string());
                }
                let event = Event::new(EventType::OperationFailed, "aborted by operator");
                self.apply_transition(op, event).await.ok()?;
                ack.notify_one();
                None
            }
            InterventionAction::MarkComplete => {
                op.state = OperationState::Completed;
                op.pause_reason = None;
                op.completed_at = Some(Utc::now());
                let event = Event::new(EventType::OperationCompleted, "marked complete by operator");
                self.apply_transition(op, event).await.ok()?;
                ack.notify_one();
                None
            }
            InterventionAction::Rollback => {
                op.state = OperationState::RollingBack;
                op.pause_reason = None;
                let event = Event::new(EventType::InterventionResolved, "rollback");
                self.apply_transition(op.clone(), event).await.ok()?;

                for idx in (0..op.current_step_index).rev() {
                    if op.steps[idx].rollback_hint.is_none() {
                        let event = Event::new(
                            EventType::StepSkippedDuringRollback,
                            format!("step {idx} had no compensator defined, skipped"),
                        );
                        let _ = self.store.append_event(id, event).await;
                    }
                    op.steps[idx].state = StepState::Skipped;
                }

                op.state = OperationState::RolledBack;
                op.completed_at = Some(Utc::now());
                let event = Event::new(EventType::OperationRolledBack, "rollback complete");
                self.apply_transition(op, event).await.ok()?;
                ack.notify_one();
                None
            }
        }
    }
}

fn validate_params(params: &OperationParams) -> Result<(), EngineError> {
    match params {
        OperationParams::InstanceTypeChange(p) if p.target_instance_type.trim().is_empty() => {
            Err(EngineError::Validation("target_instance_type must not be empty".into()))
        }
        OperationParams::EngineUpgrade(p) if p.target_engine_version.trim().is_empty() => {
            Err(EngineError::Validation("target_engine_version must not be empty".into()))
        }
        _ => Ok(()),
    }
}
