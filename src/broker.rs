//! Broker adapter contract (C3).

pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::WorkflowEvent;

/// Errors surfaced by a [`Broker`]. Always treated as an infrastructure
/// failure — retryable at the message level, not at the handler level.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker backend error: {0}")]
    Backend(String),
}

/// Abstraction over emit/retry of workflow events.
///
/// Both operations are fire-and-forget from the orchestrator's
/// perspective: failure is propagated, success carries no payload.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a new workflow event to its natural topic.
    async fn emit(&self, event: WorkflowEvent) -> Result<(), BrokerError>;

    /// Republish the same logical step with `attempt` already incremented.
    ///
    /// `delay` is the backoff calculator's computed wait before this
    /// attempt should become visible again; `max_attempts` is advisory.
    /// A real broker may use `delay` to set a visibility timeout or
    /// scheduled-delivery time. In-memory implementations are free to
    /// ignore both.
    async fn retry(
        &self,
        event: WorkflowEvent,
        max_attempts: u32,
        delay: Duration,
    ) -> Result<(), BrokerError>;
}
