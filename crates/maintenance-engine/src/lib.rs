//! # Maintenance Operation Engine
//!
//! Orchestrates multi-step maintenance operations (instance class changes, engine
//! upgrades via blue-green deployment, rolling reboots) against Aurora-style
//! clusters.
//!
//! ## Features
//!
//! - **Event-sourced operations**: every state change is persisted as an event
//!   before it is observable, enabling crash recovery by replay.
//! - **Pure recipe builders**: a typed request expands deterministically into an
//!   ordered step list before any provider call is made.
//! - **Idempotent step handlers**: fixed-interval polling, bounded retries for
//!   transient provider errors, safe resume after a crash mid-step.
//! - **Human intervention**: pause / resume / rollback / abort a running
//!   operation through a single mailbox per operation worker.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                               │
//! │  (owns the operation map, one worker task per running op)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                ┌─────────────┼─────────────┐
//!                ▼             ▼             ▼
//!          builders::*      Store        handlers::dispatch_step
//!       (pure step plan)  (null/file)     (provider + poll loop)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use maintenance_engine::prelude::*;
//!
//! let store = Arc::new(NullStore::new());
//! let provider = Arc::new(MockProviderClient::new());
//! let notifier = Arc::new(NullNotifier);
//! let engine = Engine::new(store, provider, notifier, EngineConfig::default()).await?;
//!
//! let op = engine.create(OperationRequest {
//!     cluster_id: "demo-single".into(),
//!     region: None,
//!     params: OperationParams::InstanceTypeChange(InstanceTypeChangeParams {
//!         target_instance_type: "db.r6g.xlarge".into(),
//!         exclude_instances: vec![],
//!         skip_temp_instance: true,
//!     }),
//!     wait_timeout: None,
//! }).await?;
//! engine.start(op.id).await?;
//! ```

pub mod builders;
pub mod config;
pub mod engine;
pub mod handlers;
pub mod notifier;
pub mod provider;
pub mod retry;
pub mod store;
pub mod types;

/// Prelude for common imports
pub mod prelude {
    pub use crate::builders::{build_steps, BuilderError};
    pub use crate::config::EngineConfig;
    pub use crate::engine::{Engine, EngineError};
    pub use crate::handlers::StepOutcome;
    pub use crate::notifier::{NullNotifier, Notifier};
    pub use crate::provider::{MockProviderClient, ProviderClient, ProviderError};
    pub use crate::retry::RetryPolicy;
    pub use crate::store::{FileStore, NullStore, Store, StoreError};
    pub use crate::types::*;
}

pub use builders::{build_steps, BuilderError};
pub use config::EngineConfig;
pub use engine::{Engine, EngineError};
pub use handlers::StepOutcome;
pub use notifier::{NullNotifier, Notifier};
pub use provider::{MockProviderClient, ProviderClient, ProviderError};
pub use retry::RetryPolicy;
pub use store::{FileStore, NullStore, Store, StoreError};
pub use types::*;
