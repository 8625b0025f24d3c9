//! SAGA coordinator (C7): records step history and executes
//! compensations when a multi-step business transaction fails partway.

pub mod history;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::definition::{RollbackStrategy, SagaConfig};
use crate::event::Urn;
use crate::handler::{CompensationHandlerFn, HandlerError};
pub use history::{InMemorySagaHistoryStore, SagaHistoryStore};

/// Errors raised by the SAGA coordinator.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("saga history store error: {0}")]
    Store(String),

    #[error("compensation failed: {0}")]
    Compensation(#[from] HandlerError),

    #[error("compensation phase exceeded its deadline")]
    Timeout,

    #[error("{0} compensation(s) failed: {1}")]
    Aggregated(usize, String),
}

/// Lifecycle status of a [`SagaContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStatus {
    Running,
    Completed,
    Compensating,
    Compensated,
    Failed,
}

/// One recorded step of a SAGA instance.
#[derive(Debug, Clone)]
pub struct SagaStep<T, P> {
    pub event: String,
    pub executed_at: DateTime<Utc>,
    pub before_state: T,
    pub after_state: T,
    pub payload: P,
    pub compensated: bool,
}

/// Durable record of one running or completed SAGA instance.
#[derive(Debug, Clone)]
pub struct SagaContext<T, P> {
    pub saga_id: String,
    pub urn: Urn,
    pub executed_steps: Vec<SagaStep<T, P>>,
    pub status: SagaStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl<T, P> SagaContext<T, P> {
    fn new(saga_id: String, urn: Urn, started_at: DateTime<Utc>) -> Self {
        Self {
            saga_id,
            urn,
            executed_steps: Vec::new(),
            status: SagaStatus::Running,
            started_at,
            completed_at: None,
            error: None,
        }
    }
}

/// Default `sagaId` generator: `"saga-<unix-ms>-<rand>"`.
pub fn default_saga_id() -> String {
    format!(
        "saga-{}-{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

/// Coordinates SAGA lifecycle for one or more concurrently running
/// workflow instances, keyed by entity `Urn`.
///
/// Saga contexts are created lazily: the first call to [`record_step`]
/// for a `Urn` allocates a fresh context. Events that never reach a
/// successful transition (e.g. an idle state gated by a false
/// condition) never create one.
///
/// [`record_step`]: SagaCoordinator::record_step
pub struct SagaCoordinator<T, P> {
    history: Arc<dyn SagaHistoryStore<T, P>>,
    active: RwLock<HashMap<Urn, String>>,
    id_generator: Arc<dyn Fn() -> String + Send + Sync>,
}

impl<T, P> SagaCoordinator<T, P>
where
    T: Clone + Send + Sync,
    P: Clone + Send + Sync,
{
    pub fn new(history: Arc<dyn SagaHistoryStore<T, P>>) -> Self {
        Self {
            history,
            active: RwLock::new(HashMap::new()),
            id_generator: Arc::new(default_saga_id),
        }
    }

    pub fn with_id_generator(mut self, generator: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.id_generator = Arc::new(generator);
        self
    }

    async fn context_for(&self, urn: &Urn) -> Result<SagaContext<T, P>, SagaError> {
        let existing_id = self.active.read().await.get(urn).cloned();
        if let Some(saga_id) = existing_id {
            if let Some(ctx) = self
                .history
                .get_saga_context(&saga_id)
                .await
                .map_err(|e| SagaError::Store(e.to_string()))?
            {
                return Ok(ctx);
            }
        }

        let saga_id = (self.id_generator)();
        self.active.write().await.insert(urn.clone(), saga_id.clone());
        Ok(SagaContext::new(saga_id, urn.clone(), Utc::now()))
    }

    /// Record a successful transition as a new SAGA step.
    ///
    /// Creates the context on first call for `urn`, per the lazy
    /// initialization policy.
    pub async fn record_step(
        &self,
        urn: &Urn,
        event: impl Into<String>,
        before_state: T,
        after_state: T,
        payload: P,
    ) -> Result<(), SagaError> {
        let mut ctx = self.context_for(urn).await?;
        ctx.executed_steps.push(SagaStep {
            event: event.into(),
            executed_at: Utc::now(),
            before_state,
            after_state,
            payload,
            compensated: false,
        });
        self.history
            .save_saga_context(&ctx)
            .await
            .map_err(|e| SagaError::Store(e.to_string()))
    }

    /// Mark the active SAGA for `urn` as compensating, ahead of running
    /// compensation handlers.
    pub async fn mark_failed(&self, urn: &Urn, error: impl Into<String>) -> Result<(), SagaError> {
        let mut ctx = self.context_for(urn).await?;
        ctx.status = SagaStatus::Compensating;
        ctx.error = Some(error.into());
        self.history
            .save_saga_context(&ctx)
            .await
            .map_err(|e| SagaError::Store(e.to_string()))
    }

    /// Run compensation handlers for every recorded, not-yet-compensated
    /// step of the active SAGA for `urn`, in the order `config.rollback_strategy`
    /// dictates.
    ///
    /// `compensations` maps a step's event name to its compensation
    /// handler; a step with no matching entry logs a warning and is
    /// skipped (legitimate: not every step has an inverse).
    pub async fn compensate(
        &self,
        urn: &Urn,
        config: &SagaConfig,
        compensations: &HashMap<String, CompensationHandlerFn<T, P>>,
    ) -> Result<(), SagaError>
    where
        T: 'static,
        P: 'static,
    {
        let run = self.run_compensations(urn, config, compensations);
        let result = match config.timeout {
            Some(timeout) => tokio::time::timeout(timeout, run)
                .await
                .map_err(|_| SagaError::Timeout)?,
            None => run.await,
        };

        let mut ctx = self.context_for(urn).await?;
        match &result {
            Ok(()) => {
                ctx.status = SagaStatus::Compensated;
                ctx.completed_at = Some(Utc::now());
            }
            Err(_) => {
                ctx.status = SagaStatus::Failed;
            }
        }
        self.history
            .save_saga_context(&ctx)
            .await
            .map_err(|e| SagaError::Store(e.to_string()))?;

        result
    }

    async fn run_compensations(
        &self,
        urn: &Urn,
        config: &SagaConfig,
        compensations: &HashMap<String, CompensationHandlerFn<T, P>>,
    ) -> Result<(), SagaError> {
        let mut ctx = self.context_for(urn).await?;
        let pending: Vec<usize> = ctx
            .executed_steps
            .iter()
            .enumerate()
            .filter(|(_, step)| !step.compensated)
            .map(|(i, _)| i)
            .collect();

        let ordered_indices: Vec<usize> = match config.rollback_strategy {
            RollbackStrategy::ReverseOrder => pending.into_iter().rev().collect(),
            RollbackStrategy::InOrder => pending,
            RollbackStrategy::Parallel => pending,
        };

        match config.rollback_strategy {
            RollbackStrategy::Parallel => {
                let futures = ordered_indices.iter().map(|&i| {
                    let step = &ctx.executed_steps[i];
                    let handler = compensations.get(&step.event).cloned();
                    let before = step.before_state.clone();
                    let payload = step.payload.clone();
                    async move {
                        match handler {
                            Some(h) => h.call(before, payload).await,
                            None => Ok(()),
                        }
                    }
                });
                let results = join_all(futures).await;
                let failures: Vec<String> = results
                    .into_iter()
                    .filter_map(|r| r.err())
                    .map(|e| e.to_string())
                    .collect();
                for &i in &ordered_indices {
                    ctx.executed_steps[i].compensated = true;
                }
                self.history
                    .save_saga_context(&ctx)
                    .await
                    .map_err(|e| SagaError::Store(e.to_string()))?;
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(SagaError::Aggregated(failures.len(), failures.join("; ")))
                }
            }
            RollbackStrategy::ReverseOrder | RollbackStrategy::InOrder => {
                let mut failures = Vec::new();
                for i in ordered_indices {
                    let step = &ctx.executed_steps[i];
                    let handler = compensations.get(&step.event).cloned();
                    match handler {
                        Some(h) => {
                            let before = step.before_state.clone();
                            let payload = step.payload.clone();
                            match h.call(before, payload).await {
                                Ok(()) => {
                                    ctx.executed_steps[i].compensated = true;
                                    self.history
                                        .save_saga_context(&ctx)
                                        .await
                                        .map_err(|e| SagaError::Store(e.to_string()))?;
                                }
                                Err(e) => {
                                    if config.fail_fast {
                                        return Err(SagaError::Compensation(e));
                                    }
                                    failures.push(e.to_string());
                                    ctx.executed_steps[i].compensated = true;
                                }
                            }
                        }
                        None => {
                            warn!(event = %step.event, "no compensation handler registered, skipping");
                            ctx.executed_steps[i].compensated = true;
                        }
                    }
                }
                self.history
                    .save_saga_context(&ctx)
                    .await
                    .map_err(|e| SagaError::Store(e.to_string()))?;
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(SagaError::Aggregated(failures.len(), failures.join("; ")))
                }
            }
        }
    }
}
