//! Orchestrator (C6): drives the step loop for one incoming event.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::backoff::RandRngSource;
use crate::broker::{Broker, BrokerError};
use crate::definition::{DefinitionError, WorkflowDefinition};
use crate::entity::{EntityStore, StorageError};
use crate::event::{Urn, WorkflowEvent};
use crate::handler::{CompensationHandlerFn, HandlerOutcome, StepHandlerFn};
use crate::matcher::{find_transition, MatchResult};
use crate::registry::RouteHandler;
use crate::saga::{SagaCoordinator, SagaError};

/// What happened as a result of one `transit` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The entity reached a final state (or no further transition chains).
    Done,
    /// A retryable failure was rehomed to the broker; the worker is done
    /// with this delivery.
    RetryEmitted,
    /// The entity was driven into its failed state (freshly, or the
    /// event found it already there) — handled, not left for redelivery.
    Failed,
}

/// Errors that escape `transit` unmodified, for the caller (typically
/// the batch coordinator) to classify.
#[derive(Debug, Error)]
pub enum TransitError {
    #[error("workflow definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("handler signaled unretriable failure: {0}")]
    Unretriable(String),

    #[error("retry attempts exhausted: {0}")]
    RetryExhausted(String),

    #[error("entity store error: {0}")]
    Storage(#[from] StorageError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("saga compensation error: {0}")]
    Compensation(#[from] SagaError),
}

/// The transition currently being executed, captured by value so the
/// loop below never holds a borrow of `self.definition` across an
/// `.await` that also needs `&mut` access to loop-local state.
struct ActiveStep<S> {
    to: S,
    event: String,
    has_conditions: bool,
}

/// Drives a single `WorkflowDefinition<T, S, P>` through its transitions
/// for incoming events.
pub struct Orchestrator<T, S, P> {
    definition: Arc<WorkflowDefinition<T, S, P>>,
    entity_store: Arc<dyn EntityStore<T, S>>,
    broker: Arc<dyn Broker>,
    saga: Option<Arc<SagaCoordinator<T, P>>>,
    handlers: HashMap<String, StepHandlerFn<T, P>>,
    compensations: HashMap<String, CompensationHandlerFn<T, P>>,
}

impl<T, S, P> Clone for Orchestrator<T, S, P> {
    fn clone(&self) -> Self {
        Self {
            definition: self.definition.clone(),
            entity_store: self.entity_store.clone(),
            broker: self.broker.clone(),
            saga: self.saga.clone(),
            handlers: self.handlers.clone(),
            compensations: self.compensations.clone(),
        }
    }
}

impl<T, S, P> Orchestrator<T, S, P>
where
    T: Clone + Send + Sync + 'static,
    S: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    P: Clone + Send + Sync + Serialize + 'static,
{
    pub fn new(
        definition: Arc<WorkflowDefinition<T, S, P>>,
        entity_store: Arc<dyn EntityStore<T, S>>,
        broker: Arc<dyn Broker>,
        handlers: HashMap<String, StepHandlerFn<T, P>>,
        compensations: HashMap<String, CompensationHandlerFn<T, P>>,
        saga: Option<Arc<SagaCoordinator<T, P>>>,
    ) -> Self {
        Self {
            definition,
            entity_store,
            broker,
            saga,
            handlers,
            compensations,
        }
    }

    /// Drive `event` through the state machine until the entity is idle,
    /// final, failed, or a retry has been emitted.
    pub async fn transit(&self, event: WorkflowEvent<P>) -> Result<Outcome, TransitError> {
        let urn = event.urn.clone();
        let entity = self
            .entity_store
            .load(&urn)
            .await?
            .ok_or_else(|| TransitError::BadRequest(format!("no entity found for urn {urn}")))?;

        let status = self.entity_store.status(&entity);
        if status == self.definition.failed {
            warn!(workflow = %self.definition.name, %urn, "event delivered for already-failed entity, accepting for idempotency");
            return Ok(Outcome::Failed);
        }
        if self.definition.finals.contains(&status) {
            warn!(workflow = %self.definition.name, %urn, "event delivered for already-final entity, accepting for idempotency");
            return Ok(Outcome::Done);
        }

        let mut current = match find_transition(
            &self.definition,
            &status,
            &event.topic,
            &entity,
            &event.payload,
            false,
        ) {
            Err(err) => {
                self.fail_entity_only(entity).await;
                return Err(TransitError::Definition(err));
            }
            Ok(MatchResult::None) => {
                if self.definition.idles.contains(&status) {
                    warn!(workflow = %self.definition.name, %urn, event = %event.topic, "idle state, condition not satisfied — no-op");
                    return Ok(Outcome::Done);
                }
                return self.run_default_handler_or_fail(entity, event).await;
            }
            Ok(MatchResult::Found(t)) => ActiveStep {
                to: t.to.clone(),
                event: t.event.clone(),
                has_conditions: !t.conditions.is_empty(),
            },
        };

        let mut step_payload = event.payload.clone();
        let mut attempt = event.attempt;
        let mut entity = entity;

        loop {
            let status = self.entity_store.status(&entity);
            if self.definition.idles.contains(&status) && !current.has_conditions {
                let bad_event = current.event.clone();
                self.fail_and_maybe_compensate(&urn, entity, "idle state left with no conditions")
                    .await?;
                return Err(TransitError::Definition(DefinitionError::UnconditionedIdleExit(
                    self.definition.name.clone(),
                    format!("{:?}", status),
                    bad_event,
                )));
            }

            let before = entity.clone();
            let handler = self.handlers.get(&current.event).cloned();
            let outcome = match handler {
                Some(h) => h.call(entity, step_payload.clone()).await,
                None => {
                    let missing_event = current.event.clone();
                    self.fail_and_maybe_compensate(&urn, before, "no handler registered for event")
                        .await?;
                    return Err(TransitError::Definition(DefinitionError::UnresolvedInjectionKey(
                        self.definition.name.clone(),
                        missing_event,
                        "step handler",
                    )));
                }
            };

            match outcome {
                HandlerOutcome::Done(new_entity, new_payload) => {
                    let updated = self.entity_store.update(new_entity, current.to.clone()).await?;

                    if let Some(saga) = &self.saga {
                        if self.definition.saga.as_ref().is_some_and(|s| s.enabled) {
                            saga.record_step(
                                &urn,
                                current.event.clone(),
                                before,
                                updated.clone(),
                                new_payload.clone(),
                            )
                            .await?;
                        }
                    }

                    info!(workflow = %self.definition.name, %urn, event = %current.event, to = ?self.entity_store.status(&updated), "transition recorded");

                    entity = updated;
                    step_payload = new_payload;

                    let next_status = self.entity_store.status(&entity);
                    if self.definition.finals.contains(&next_status) {
                        return Ok(Outcome::Done);
                    }

                    current = match find_transition(
                        &self.definition,
                        &next_status,
                        "",
                        &entity,
                        &step_payload,
                        true,
                    ) {
                        Err(err) => {
                            self.fail_and_maybe_compensate(&urn, entity, "ambiguous chained transition")
                                .await?;
                            return Err(TransitError::Definition(err));
                        }
                        Ok(MatchResult::None) => return Ok(Outcome::Done),
                        Ok(MatchResult::Found(t)) => ActiveStep {
                            to: t.to.clone(),
                            event: t.event.clone(),
                            has_conditions: !t.conditions.is_empty(),
                        },
                    };
                }
                HandlerOutcome::Retry(err) => {
                    if attempt >= self.definition.retry.max_attempts {
                        self.fail_and_maybe_compensate(
                            &urn,
                            before,
                            format!("retry attempts exhausted: {err}"),
                        )
                        .await?;
                        return Err(TransitError::RetryExhausted(err.to_string()));
                    }

                    let retry_event = WorkflowEvent::new(
                        current.event.clone(),
                        urn.clone(),
                        attempt + 1,
                        serde_json::to_value(&step_payload).map_err(|e| {
                            TransitError::BadRequest(format!("payload encode error: {e}"))
                        })?,
                    );
                    let delay = self
                        .definition
                        .retry
                        .backoff
                        .delay_for_attempt(attempt, None, &RandRngSource);
                    self.broker
                        .retry(retry_event, self.definition.retry.max_attempts, delay)
                        .await?;
                    return Ok(Outcome::RetryEmitted);
                }
                HandlerOutcome::Fatal(err) | HandlerOutcome::Unretriable(err) => {
                    self.fail_and_maybe_compensate(&urn, before, err.to_string())
                        .await?;
                    return Err(TransitError::Unretriable(err.to_string()));
                }
            }
        }
    }

    async fn run_default_handler_or_fail(
        &self,
        entity: T,
        event: WorkflowEvent<P>,
    ) -> Result<Outcome, TransitError> {
        if let Some(default_handler) = &self.definition.default_handler {
            let fallback = entity.clone();
            match default_handler.call(entity, event.topic.clone(), event.payload).await {
                HandlerOutcome::Done(new_entity, _) => {
                    let status = self.entity_store.status(&new_entity);
                    self.entity_store.update(new_entity, status).await?;
                    Ok(Outcome::Done)
                }
                HandlerOutcome::Retry(err) | HandlerOutcome::Fatal(err) | HandlerOutcome::Unretriable(err) => {
                    self.fail_entity_only(fallback).await;
                    Err(TransitError::Unretriable(err.to_string()))
                }
            }
        } else {
            self.fail_entity_only(entity).await;
            Err(TransitError::BadRequest(format!(
                "no matching transition for event '{}'",
                event.topic
            )))
        }
    }

    async fn fail_entity_only(&self, entity: T) {
        let status = self.definition.failed.clone();
        if let Err(err) = self.entity_store.update(entity, status).await {
            warn!(workflow = %self.definition.name, %err, "failed to persist entity into failed state");
        }
    }

    async fn fail_and_maybe_compensate(
        &self,
        urn: &Urn,
        entity: T,
        reason: impl Into<String>,
    ) -> Result<(), TransitError> {
        let reason = reason.into();
        let failed_state = self.definition.failed.clone();
        self.entity_store.update(entity, failed_state).await?;

        if let (Some(saga), Some(saga_config)) = (&self.saga, &self.definition.saga) {
            if saga_config.enabled {
                saga.mark_failed(urn, reason).await?;
                saga.compensate(urn, saga_config, &self.compensations).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<T, S, P> RouteHandler for Orchestrator<T, S, P>
where
    T: Clone + Send + Sync + 'static,
    S: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    P: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    fn workflow_name(&self) -> &str {
        &self.definition.name
    }

    async fn dispatch(&self, event: WorkflowEvent) -> Result<Outcome, TransitError> {
        let payload: P = serde_json::from_value(event.payload)
            .map_err(|e| TransitError::BadRequest(format!("payload decode error: {e}")))?;
        let typed = WorkflowEvent::new(event.topic, event.urn, event.attempt, payload);
        self.transit(typed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffConfig;
    use crate::broker::mock::ChannelBroker;
    use crate::definition::{Condition, RetryPolicy, Transition, WorkflowDefinitionBuilder};
    use crate::handler::{HandlerError, StepHandlerFn};
    use crate::storage::mock::InMemoryEntityStore;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum OrderState {
        Pending,
        Processing,
        Shipped,
        Failed,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Order {
        urn: Urn,
        state: OrderState,
    }

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct Payload {
        approved: bool,
    }

    fn store() -> Arc<InMemoryEntityStore<Order, OrderState>> {
        Arc::new(InMemoryEntityStore::new(
            |o: &Order| o.state.clone(),
            |o: &Order| o.urn.clone(),
            |mut o: Order, s: OrderState| {
                o.state = s;
                o
            },
        ))
    }

    fn definition(max_attempts: u32) -> Arc<WorkflowDefinition<Order, OrderState, Payload>> {
        let approved_condition: Condition<Order, Payload> = Arc::new(|_entity, payload| payload.approved);

        Arc::new(
            WorkflowDefinitionBuilder::new("orders")
                .idles([OrderState::Pending])
                .finals([OrderState::Shipped])
                .failed_state(OrderState::Failed)
                .transition(Transition {
                    from: HashSet::from([OrderState::Pending]),
                    to: OrderState::Processing,
                    event: "order.created".to_string(),
                    conditions: vec![approved_condition],
                })
                .transition(Transition {
                    from: HashSet::from([OrderState::Processing]),
                    to: OrderState::Shipped,
                    event: "order.processing".to_string(),
                    conditions: vec![],
                })
                .retry(RetryPolicy {
                    max_attempts,
                    backoff: BackoffConfig::default(),
                })
                .build()
                .unwrap(),
        )
    }

    fn orchestrator(
        max_attempts: u32,
        handlers: HashMap<String, StepHandlerFn<Order, Payload>>,
    ) -> (Orchestrator<Order, OrderState, Payload>, Arc<InMemoryEntityStore<Order, OrderState>>) {
        let store = store();
        let orchestrator = Orchestrator::new(
            definition(max_attempts),
            store.clone(),
            Arc::new(ChannelBroker::new()),
            handlers,
            HashMap::new(),
            None,
        );
        (orchestrator, store)
    }

    #[tokio::test]
    async fn happy_path_chains_through_to_final_state() {
        let mut handlers: HashMap<String, StepHandlerFn<Order, Payload>> = HashMap::new();
        handlers.insert(
            "order.created".to_string(),
            Arc::new(|entity: Order, payload: Payload| async move { HandlerOutcome::Done(entity, payload) }),
        );
        handlers.insert(
            "order.processing".to_string(),
            Arc::new(|entity: Order, payload: Payload| async move { HandlerOutcome::Done(entity, payload) }),
        );

        let (orchestrator, store) = orchestrator(3, handlers);
        store
            .seed(Order {
                urn: Urn::from("o1"),
                state: OrderState::Pending,
            })
            .await;

        let event = WorkflowEvent::new(
            "order.created",
            Urn::from("o1"),
            0,
            Payload { approved: true },
        );
        let outcome = orchestrator.transit(event).await.unwrap();
        assert_eq!(outcome, Outcome::Done);

        let entity = store.get(&Urn::from("o1")).await.unwrap();
        assert_eq!(entity.state, OrderState::Shipped);
    }

    #[tokio::test]
    async fn gated_idle_stays_put_with_no_handler_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut handlers: HashMap<String, StepHandlerFn<Order, Payload>> = HashMap::new();
        handlers.insert(
            "order.created".to_string(),
            Arc::new(move |entity: Order, payload: Payload| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    HandlerOutcome::Done(entity, payload)
                }
            }),
        );

        let (orchestrator, store) = orchestrator(3, handlers);
        store
            .seed(Order {
                urn: Urn::from("o1"),
                state: OrderState::Pending,
            })
            .await;

        let event = WorkflowEvent::new(
            "order.created",
            Urn::from("o1"),
            0,
            Payload { approved: false },
        );
        let outcome = orchestrator.transit(event).await.unwrap();
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let entity = store.get(&Urn::from("o1")).await.unwrap();
        assert_eq!(entity.state, OrderState::Pending);
    }

    #[tokio::test]
    async fn retryable_failure_emits_a_retry_and_leaves_state_unchanged() {
        let mut handlers: HashMap<String, StepHandlerFn<Order, Payload>> = HashMap::new();
        handlers.insert(
            "order.created".to_string(),
            Arc::new(|entity: Order, payload: Payload| async move { HandlerOutcome::Done(entity, payload) }),
        );
        handlers.insert(
            "order.processing".to_string(),
            Arc::new(|_entity: Order, _payload: Payload| async move {
                HandlerOutcome::Retry(HandlerError::message("downstream unavailable"))
            }),
        );

        let (orchestrator, store) = orchestrator(3, handlers);
        store
            .seed(Order {
                urn: Urn::from("o1"),
                state: OrderState::Pending,
            })
            .await;

        let event = WorkflowEvent::new(
            "order.created",
            Urn::from("o1"),
            0,
            Payload { approved: true },
        );
        let outcome = orchestrator.transit(event).await.unwrap();
        assert_eq!(outcome, Outcome::RetryEmitted);

        let entity = store.get(&Urn::from("o1")).await.unwrap();
        assert_eq!(entity.state, OrderState::Processing);
    }

    #[tokio::test]
    async fn retry_exhaustion_fails_the_entity() {
        let mut handlers: HashMap<String, StepHandlerFn<Order, Payload>> = HashMap::new();
        handlers.insert(
            "order.created".to_string(),
            Arc::new(|entity: Order, payload: Payload| async move { HandlerOutcome::Done(entity, payload) }),
        );
        handlers.insert(
            "order.processing".to_string(),
            Arc::new(|_entity: Order, _payload: Payload| async move {
                HandlerOutcome::Retry(HandlerError::message("downstream unavailable"))
            }),
        );

        let (orchestrator, store) = orchestrator(0, handlers);
        store
            .seed(Order {
                urn: Urn::from("o1"),
                state: OrderState::Pending,
            })
            .await;

        let event = WorkflowEvent::new(
            "order.created",
            Urn::from("o1"),
            0,
            Payload { approved: true },
        );
        let result = orchestrator.transit(event).await;
        assert!(matches!(result, Err(TransitError::RetryExhausted(_))));

        let entity = store.get(&Urn::from("o1")).await.unwrap();
        assert_eq!(entity.state, OrderState::Failed);
    }
}
