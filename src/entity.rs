//! Entity adapter contract (C2).
//!
//! The orchestrator never persists entities itself; it drives one of
//! these adapters. `status`/`urn` are pure projections, `load`/`update`
//! are the storage suspension points.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::Urn;

/// Errors surfaced by an [`EntityStore`].
///
/// `NotFound` is intentionally distinct from the other variants: per the
/// spec, `load` returning "not found" is a hard, non-retryable bad-urn
/// error, while every other storage failure is treated as an
/// infrastructure failure and is retryable at the message level.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("entity not found for urn {0}")]
    NotFound(Urn),

    #[error("entity store backend error: {0}")]
    Backend(String),
}

/// Abstraction over load/update/status/urn of a business entity.
///
/// Implementations are assumed thread-safe; the orchestrator holds them
/// behind an `Arc` and calls them concurrently across messages in a batch.
#[async_trait]
pub trait EntityStore<T, S>: Send + Sync
where
    T: Send + Sync,
    S: Send + Sync,
{
    /// Load the entity for `urn`, or `Ok(None)` if it does not exist.
    async fn load(&self, urn: &Urn) -> Result<Option<T>, StorageError>;

    /// Persist `entity` with its new status, returning the persisted value.
    async fn update(&self, entity: T, new_state: S) -> Result<T, StorageError>;

    /// Project the current state out of an in-memory entity value.
    fn status(&self, entity: &T) -> S;

    /// Project the identity out of an in-memory entity value.
    fn urn(&self, entity: &T) -> Urn;

    /// Create a fresh entity for a `urn` that does not exist yet.
    ///
    /// Optional: workflows that only ever react to events for
    /// pre-existing entities need not implement this.
    async fn create(&self, urn: &Urn) -> Result<T, StorageError> {
        let _ = urn;
        Err(StorageError::Backend(
            "create() not supported by this entity store".to_string(),
        ))
    }
}
