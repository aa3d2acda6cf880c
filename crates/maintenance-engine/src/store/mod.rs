//! Durable, crash-safe persistence of operations and their event logs.
//!
//! Grounded on the donor's `persistence::store::WorkflowEventStore` trait shape and
//! `persistence::memory::InMemoryWorkflowEventStore` implementation. The donor's
//! `PostgresWorkflowEventStore` has no counterpart here — this spec wants only a
//! `null` and a `file` backend, so the Postgres-specific code was dropped (see
//! DESIGN.md, Trimming).

mod file;
mod null;

pub use file::FileStore;
pub use null::NullStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::{Event, Operation};

/// Errors a [`Store`] implementation can produce.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("operation not found: {0}")]
    OperationNotFound(Uuid),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store corruption: {0}")]
    Corrupt(String),
}

/// Persistence boundary for [`Operation`] snapshots and their append-only
/// [`Event`] logs.
///
/// Implementations must give atomic, durable `save_operation`/`append_event`
/// calls: no reader ever observes a partially written snapshot, and both calls
/// return only once the write is durably committed.
#[async_trait]
pub trait Store: Send + Sync {
    /// Write a full operation snapshot atomically.
    async fn save_operation(&self, op: &Operation) -> Result<(), StoreError>;

    /// Read one operation's current snapshot.
    async fn load_operation(&self, id: Uuid) -> Result<Operation, StoreError>;

    /// Enumerate every persisted operation (used at startup reconciliation).
    async fn list_operations(&self) -> Result<Vec<Operation>, StoreError>;

    /// Remove an operation and its event log.
    async fn delete_operation(&self, id: Uuid) -> Result<(), StoreError>;

    /// Append one event atomically.
    async fn append_event(&self, operation_id: Uuid, event: Event) -> Result<(), StoreError>;

    /// Load an operation's events in write order.
    async fn load_events(&self, operation_id: Uuid) -> Result<Vec<Event>, StoreError>;
}
