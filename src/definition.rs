//! Workflow definition & metadata (C1).
//!
//! A [`WorkflowDefinition`] is built once via [`WorkflowDefinitionBuilder`]
//! and treated as immutable afterward — no attribute/decorator discovery,
//! just an explicit builder that validates invariants at `.build()` time.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::backoff::BackoffConfig;
use crate::handler::{DefaultHandler, DefaultHandlerFn};

/// Errors detected while building a [`WorkflowDefinition`].
///
/// Non-retryable by nature: these represent bugs in the definition
/// itself, not transient runtime conditions.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("workflow '{0}' has no transitions")]
    NoTransitions(String),

    #[error("workflow '{0}': idle state {1:?} is exited by transition on event '{2}' with no conditions")]
    UnconditionedIdleExit(String, String, String),

    #[error("workflow '{0}': states.idles and states.finals overlap on {1:?}")]
    IdleFinalOverlap(String, String),

    #[error("workflow '{0}': two transitions share from={1:?} event='{2}' but differ in destination")]
    AmbiguousTransition(String, String, String),

    #[error("workflow '{0}': duplicate event key '{1}' registered twice")]
    DuplicateEvent(String, String),

    #[error("workflow '{0}': injection key '{1}' for {2} was never resolved")]
    UnresolvedInjectionKey(String, String, &'static str),
}

/// A condition guarding a transition: `(entity, payload) -> bool`.
pub type Condition<T, P> = Arc<dyn Fn(&T, &P) -> bool + Send + Sync>;

/// One rule within a [`WorkflowDefinition`].
pub struct Transition<T, S, P> {
    pub from: HashSet<S>,
    pub to: S,
    pub event: String,
    pub conditions: Vec<Condition<T, P>>,
}

impl<T, S: fmt::Debug, P> fmt::Debug for Transition<T, S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("event", &self.event)
            .field("conditions", &self.conditions.len())
            .finish()
    }
}

/// Retry policy attached to a definition: how many attempts, and the
/// backoff curve between them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

/// How compensations run when a SAGA fails partway through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackStrategy {
    /// Undo the most recent step first.
    ReverseOrder,
    /// Undo steps in the order they were recorded.
    InOrder,
    /// Start every compensation concurrently, await all.
    Parallel,
}

/// SAGA configuration for a definition.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    pub enabled: bool,
    pub rollback_strategy: RollbackStrategy,
    pub fail_fast: bool,
    pub timeout: Option<Duration>,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rollback_strategy: RollbackStrategy::ReverseOrder,
            fail_fast: true,
            timeout: None,
        }
    }
}

/// An immutable, validated workflow definition: states, transitions,
/// retry policy, optional SAGA configuration, and handler fallback.
pub struct WorkflowDefinition<T, S, P> {
    pub name: String,
    pub finals: HashSet<S>,
    pub idles: HashSet<S>,
    pub failed: S,
    pub transitions: Vec<Transition<T, S, P>>,
    pub retry: RetryPolicy,
    pub saga: Option<SagaConfig>,
    pub default_handler: Option<DefaultHandlerFn<T, P>>,
}

impl<T, S: fmt::Debug, P> fmt::Debug for WorkflowDefinition<T, S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field("finals", &self.finals)
            .field("idles", &self.idles)
            .field("failed", &self.failed)
            .field("transitions", &self.transitions.len())
            .field("retry", &self.retry)
            .field("saga", &self.saga)
            .finish()
    }
}

/// Builder for [`WorkflowDefinition`]. See [`WorkflowDefinition`] for the
/// invariants enforced at `.build()`.
pub struct WorkflowDefinitionBuilder<T, S, P> {
    name: String,
    finals: HashSet<S>,
    idles: HashSet<S>,
    failed: Option<S>,
    transitions: Vec<Transition<T, S, P>>,
    retry: RetryPolicy,
    saga: Option<SagaConfig>,
    default_handler: Option<DefaultHandlerFn<T, P>>,
}

impl<T, S, P> WorkflowDefinitionBuilder<T, S, P>
where
    S: Eq + Hash + Clone + fmt::Debug,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            finals: HashSet::new(),
            idles: HashSet::new(),
            failed: None,
            transitions: Vec::new(),
            retry: RetryPolicy::default(),
            saga: None,
            default_handler: None,
        }
    }

    pub fn finals(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.finals.extend(states);
        self
    }

    pub fn idles(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.idles.extend(states);
        self
    }

    pub fn failed_state(mut self, state: S) -> Self {
        self.failed = Some(state);
        self
    }

    pub fn transition(mut self, transition: Transition<T, S, P>) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn saga(mut self, saga: SagaConfig) -> Self {
        self.saga = Some(saga);
        self
    }

    pub fn default_handler(mut self, handler: impl DefaultHandler<T, P> + 'static) -> Self {
        self.default_handler = Some(Arc::new(handler));
        self
    }

    /// Validate invariants and freeze the definition.
    ///
    /// Full ambiguity detection (which requires runtime entity state)
    /// happens in the matcher; this only catches what is staticly
    /// decidable from the transition table alone.
    pub fn build(self) -> Result<WorkflowDefinition<T, S, P>, DefinitionError> {
        if self.transitions.is_empty() {
            return Err(DefinitionError::NoTransitions(self.name));
        }

        let failed = self.failed.ok_or_else(|| {
            DefinitionError::UnresolvedInjectionKey(self.name.clone(), "failed".into(), "state")
        })?;

        for state in self.idles.intersection(&self.finals) {
            return Err(DefinitionError::IdleFinalOverlap(
                self.name,
                format!("{:?}", state),
            ));
        }

        for transition in &self.transitions {
            for from in &transition.from {
                if self.idles.contains(from) && transition.conditions.is_empty() {
                    return Err(DefinitionError::UnconditionedIdleExit(
                        self.name,
                        format!("{:?}", from),
                        transition.event.clone(),
                    ));
                }
            }
        }

        for (i, a) in self.transitions.iter().enumerate() {
            for b in self.transitions.iter().skip(i + 1) {
                if a.event == b.event && a.to != b.to && !a.from.is_disjoint(&b.from) {
                    return Err(DefinitionError::AmbiguousTransition(
                        self.name,
                        format!("{:?}", a.from.intersection(&b.from).collect::<Vec<_>>()),
                        a.event.clone(),
                    ));
                }
            }
        }

        Ok(WorkflowDefinition {
            name: self.name,
            finals: self.finals,
            idles: self.idles,
            failed,
            transitions: self.transitions,
            retry: self.retry,
            saga: self.saga,
            default_handler: self.default_handler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum OrderState {
        Pending,
        Processing,
        Shipped,
        Failed,
    }

    fn transition(
        from: OrderState,
        to: OrderState,
        event: &str,
        conditions: Vec<Condition<(), ()>>,
    ) -> Transition<(), OrderState, ()> {
        Transition {
            from: HashSet::from([from]),
            to,
            event: event.to_string(),
            conditions,
        }
    }

    #[test]
    fn build_fails_without_transitions() {
        let result = WorkflowDefinitionBuilder::<(), OrderState, ()>::new("orders")
            .failed_state(OrderState::Failed)
            .build();
        assert!(matches!(result, Err(DefinitionError::NoTransitions(_))));
    }

    #[test]
    fn build_rejects_unconditioned_idle_exit() {
        let result = WorkflowDefinitionBuilder::<(), OrderState, ()>::new("orders")
            .idles([OrderState::Pending])
            .failed_state(OrderState::Failed)
            .transition(transition(
                OrderState::Pending,
                OrderState::Processing,
                "order.created",
                vec![],
            ))
            .build();
        assert!(matches!(
            result,
            Err(DefinitionError::UnconditionedIdleExit(..))
        ));
    }

    #[test]
    fn build_rejects_ambiguous_transitions() {
        let result = WorkflowDefinitionBuilder::<(), OrderState, ()>::new("orders")
            .failed_state(OrderState::Failed)
            .transition(transition(
                OrderState::Pending,
                OrderState::Processing,
                "order.created",
                vec![Arc::new(|_, _| true)],
            ))
            .transition(transition(
                OrderState::Pending,
                OrderState::Shipped,
                "order.created",
                vec![Arc::new(|_, _| true)],
            ))
            .build();
        assert!(matches!(
            result,
            Err(DefinitionError::AmbiguousTransition(..))
        ));
    }

    #[test]
    fn well_formed_definition_builds() {
        let result = WorkflowDefinitionBuilder::<(), OrderState, ()>::new("orders")
            .idles([OrderState::Pending])
            .finals([OrderState::Shipped])
            .failed_state(OrderState::Failed)
            .transition(transition(
                OrderState::Pending,
                OrderState::Processing,
                "order.created",
                vec![Arc::new(|_, _| true)],
            ))
            .transition(transition(
                OrderState::Processing,
                OrderState::Shipped,
                "order.processing",
                vec![],
            ))
            .build();
        assert!(result.is_ok());
    }
}
