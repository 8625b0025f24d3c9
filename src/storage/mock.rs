//! In-memory [`EntityStore`] used by the test suite and as a template for
//! real adapters (Postgres, DynamoDB, ...), which are out of scope for
//! this core crate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::entity::{EntityStore, StorageError};
use crate::event::Urn;

type StatusFn<T, S> = Arc<dyn Fn(&T) -> S + Send + Sync>;
type UrnFn<T> = Arc<dyn Fn(&T) -> Urn + Send + Sync>;
type ApplyStateFn<T, S> = Arc<dyn Fn(T, S) -> T + Send + Sync>;

/// In-memory entity store backed by a `RwLock<HashMap<Urn, T>>`.
///
/// Since the core has no knowledge of an application's entity shape, the
/// store is handed three pure projections at construction: how to read
/// the status, how to read the urn, and how to apply a new status.
pub struct InMemoryEntityStore<T, S> {
    entities: RwLock<HashMap<Urn, T>>,
    status_fn: StatusFn<T, S>,
    urn_fn: UrnFn<T>,
    apply_state_fn: ApplyStateFn<T, S>,
    fail_on_load: RwLock<bool>,
    fail_on_update: RwLock<bool>,
}

impl<T, S> InMemoryEntityStore<T, S>
where
    T: Clone + Send + Sync,
    S: Send + Sync,
{
    pub fn new(
        status_fn: impl Fn(&T) -> S + Send + Sync + 'static,
        urn_fn: impl Fn(&T) -> Urn + Send + Sync + 'static,
        apply_state_fn: impl Fn(T, S) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            status_fn: Arc::new(status_fn),
            urn_fn: Arc::new(urn_fn),
            apply_state_fn: Arc::new(apply_state_fn),
            fail_on_load: RwLock::new(false),
            fail_on_update: RwLock::new(false),
        }
    }

    /// Seed the store with a pre-existing entity, as a test fixture would.
    pub async fn seed(&self, entity: T) {
        let urn = (self.urn_fn)(&entity);
        self.entities.write().await.insert(urn, entity);
    }

    pub async fn get(&self, urn: &Urn) -> Option<T> {
        self.entities.read().await.get(urn).cloned()
    }

    pub async fn set_fail_on_load(&self, fail: bool) {
        *self.fail_on_load.write().await = fail;
    }

    pub async fn set_fail_on_update(&self, fail: bool) {
        *self.fail_on_update.write().await = fail;
    }
}

#[async_trait]
impl<T, S> EntityStore<T, S> for InMemoryEntityStore<T, S>
where
    T: Clone + Send + Sync,
    S: Send + Sync,
{
    async fn load(&self, urn: &Urn) -> Result<Option<T>, StorageError> {
        if *self.fail_on_load.read().await {
            return Err(StorageError::Backend("injected load failure".to_string()));
        }
        Ok(self.entities.read().await.get(urn).cloned())
    }

    async fn update(&self, entity: T, new_state: S) -> Result<T, StorageError> {
        if *self.fail_on_update.read().await {
            return Err(StorageError::Backend(
                "injected update failure".to_string(),
            ));
        }
        let updated = (self.apply_state_fn)(entity, new_state);
        let urn = (self.urn_fn)(&updated);
        self.entities
            .write()
            .await
            .insert(urn, updated.clone());
        Ok(updated)
    }

    fn status(&self, entity: &T) -> S {
        (self.status_fn)(entity)
    }

    fn urn(&self, entity: &T) -> Urn {
        (self.urn_fn)(entity)
    }

    async fn create(&self, urn: &Urn) -> Result<T, StorageError> {
        Err(StorageError::NotFound(urn.clone()))
    }
}
