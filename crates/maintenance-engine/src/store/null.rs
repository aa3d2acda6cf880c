use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::types::{Event, Operation};

struct Record {
    operation: Operation,
    events: Vec<Event>,
}

/// In-memory store satisfying the [`Store`] contract without persistence.
///
/// Grounded on `durable/src/persistence/memory.rs`'s `InMemoryWorkflowEventStore`
/// (`parking_lot::RwLock`-guarded map, same overall shape). Used for unit tests and
/// ephemeral/demo runs; all state is lost on process exit, by design.
pub struct NullStore {
    records: RwLock<HashMap<Uuid, Record>>,
}

impl NullStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Number of operations currently held (test/demo introspection only).
    pub fn operation_count(&self) -> usize {
        self.records.read().len()
    }
}

impl Default for NullStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for NullStore {
    async fn save_operation(&self, op: &Operation) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let entry = records.entry(op.id).or_insert_with(|| Record {
            operation: op.clone(),
            events: Vec::new(),
        });
        entry.operation = op.clone();
        Ok(())
    }

    async fn load_operation(&self, id: Uuid) -> Result<Operation, StoreError> {
        self.records
            .read()
            .get(&id)
            .map(|r| r.operation.clone())
            .ok_or(StoreError::OperationNotFound(id))
    }

    async fn list_operations(&self) -> Result<Vec<Operation>, StoreError> {
        Ok(self.records.read().values().map(|r| r.operation.clone()).collect())
    }

    async fn delete_operation(&self, id: Uuid) -> Result<(), StoreError> {
        self.records
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::OperationNotFound(id))
    }

    async fn append_event(&self, operation_id: Uuid, event: Event) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(&operation_id)
            .ok_or(StoreError::OperationNotFound(operation_id))?;
        record.events.push(event);
        Ok(())
    }

    async fn load_events(&self, operation_id: Uuid) -> Result<Vec<Event>, StoreError> {
        self.records
            .read()
            .get(&operation_id)
            .map(|r| r.events.clone())
            .ok_or(StoreError::OperationNotFound(operation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventType, InstanceCycleParams, OperationParams, OperationRequest};
    use chrono::Utc;

    fn sample_operation() -> Operation {
        Operation::new(
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
        )
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let store = NullStore::new();
        let op = sample_operation();
        store.save_operation(&op).await.unwrap();

        let loaded = store.load_operation(op.id).await.unwrap();
        assert_eq!(loaded.id, op.id);
        assert_eq!(loaded.cluster_id, op.cluster_id);
    }

    #[tokio::test]
    async fn load_missing_operation_errors() {
        let store = NullStore::new();
        let err = store.load_operation(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, StoreError::OperationNotFound(_)));
    }

    #[tokio::test]
    async fn events_append_in_order() {
        let store = NullStore::new();
        let op = sample_operation();
        store.save_operation(&op).await.unwrap();

        store
            .append_event(op.id, Event::new(EventType::OperationCreated, "created"))
            .await
            .unwrap();
        store
            .append_event(op.id, Event::new(EventType::OperationStarted, "started"))
            .await
            .unwrap();

        let events = store.load_events(op.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::OperationCreated);
        assert_eq!(events[1].event_type, EventType::OperationStarted);
    }

    #[tokio::test]
    async fn delete_removes_operation_and_events() {
        let store = NullStore::new();
        let op = sample_operation();
        store.save_operation(&op).await.unwrap();
        store
            .append_event(op.id, Event::new(EventType::OperationCreated, "created"))
            .await
            .unwrap();

        store.delete_operation(op.id).await.unwrap();
        assert!(matches!(
            store.load_operation(op.id).await.unwrap_err(),
            StoreError::OperationNotFound(_)
        ));
    }

    #[tokio::test]
    async fn list_operations_returns_all() {
        let store = NullStore::new();
        store.save_operation(&sample_operation()).await.unwrap();
        store.save_operation(&sample_operation()).await.unwrap();
        assert_eq!(store.list_operations().await.unwrap().len(), 2);
    }
}
