//! Notifier boundary: a fire-and-forget sink for operation lifecycle events.
//!
//! Chat-platform notification transports (Slack, PagerDuty, email, ...) are external
//! collaborators this repository does not implement; only the trait and a no-op
//! implementation live here.

use async_trait::async_trait;

use crate::types::Event;
use uuid::Uuid;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, operation_id: Uuid, event: &Event);
}

/// Notifier that discards everything; the default when no transport is configured.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _operation_id: Uuid, _event: &Event) {}
}
