//! SAGA history store contract and its in-memory reference implementation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use super::SagaContext;

/// Errors surfaced by a [`SagaHistoryStore`].
#[derive(Debug, Error)]
pub enum HistoryStoreError {
    #[error("saga history backend error: {0}")]
    Backend(String),
}

/// Abstraction over persistence of [`SagaContext`] values.
///
/// TTL is recommended but not mandated by the trait itself; the
/// in-memory reference store below applies one on read.
#[async_trait]
pub trait SagaHistoryStore<T, P>: Send + Sync {
    async fn save_saga_context(&self, ctx: &SagaContext<T, P>) -> Result<(), HistoryStoreError>;

    async fn get_saga_context(&self, saga_id: &str) -> Result<Option<SagaContext<T, P>>, HistoryStoreError>;

    async fn delete_saga_context(&self, saga_id: &str) -> Result<(), HistoryStoreError>;
}

struct Entry<T, P> {
    ctx: SagaContext<T, P>,
    last_write: Instant,
}

/// `RwLock<HashMap<..>>`-backed saga history store, with an optional
/// read-time TTL sweep (default reference: 1 hour after last write,
/// matching the spec's recommendation).
pub struct InMemorySagaHistoryStore<T, P> {
    entries: RwLock<HashMap<String, Entry<T, P>>>,
    ttl: Duration,
}

impl<T, P> InMemorySagaHistoryStore<T, P>
where
    T: Clone + Send + Sync,
    P: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(3600),
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }
}

impl<T, P> Default for InMemorySagaHistoryStore<T, P>
where
    T: Clone + Send + Sync,
    P: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T, P> SagaHistoryStore<T, P> for InMemorySagaHistoryStore<T, P>
where
    T: Clone + Send + Sync,
    P: Clone + Send + Sync,
{
    async fn save_saga_context(&self, ctx: &SagaContext<T, P>) -> Result<(), HistoryStoreError> {
        self.entries.write().await.insert(
            ctx.saga_id.clone(),
            Entry {
                ctx: ctx.clone(),
                last_write: Instant::now(),
            },
        );
        Ok(())
    }

    async fn get_saga_context(&self, saga_id: &str) -> Result<Option<SagaContext<T, P>>, HistoryStoreError> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(saga_id) {
            if entry.last_write.elapsed() > self.ttl {
                entries.remove(saga_id);
                return Ok(None);
            }
        }
        Ok(entries.get(saga_id).map(|e| e.ctx.clone()))
    }

    async fn delete_saga_context(&self, saga_id: &str) -> Result<(), HistoryStoreError> {
        self.entries.write().await.remove(saga_id);
        Ok(())
    }
}
