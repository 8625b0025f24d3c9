//! Durable, event-driven workflow orchestration over finite state
//! machines.
//!
//! An [`orchestrator::Orchestrator`] drives a [`definition::WorkflowDefinition`]:
//! it matches an inbound [`event::WorkflowEvent`] against the definition's
//! [`definition::Transition`]s, invokes the matched [`handler::StepHandler`],
//! persists the result through an [`entity::EntityStore`], and chains through
//! any follow-on automatic transitions until it reaches an idle or final
//! state. Retryable handler failures are re-emitted through a [`broker::Broker`]
//! with a backoff delay computed by [`backoff::BackoffConfig`]; multi-step
//! workflows may opt into SAGA-style compensation via
//! [`saga::SagaCoordinator`] when a later step fails. A [`registry::Registry`]
//! maps event topics to type-erased orchestrators for a process hosting many
//! workflows, and [`coordinator::run_batch`] drives a batch of such events
//! against a wall-clock deadline for short-lived worker invocations.
//!
//! ```text
//! event -> matcher -> handler -> entity store
//!                         |
//!                         +-> saga coordinator (optional)
//!                         +-> broker (on retry)
//! ```

pub mod backoff;
pub mod broker;
pub mod config;
pub mod coordinator;
pub mod definition;
pub mod entity;
pub mod event;
pub mod handler;
pub mod matcher;
pub mod orchestrator;
pub mod registry;
pub mod saga;
pub mod storage;

pub use backoff::{BackoffConfig, BackoffStrategy, Jitter};
pub use config::WorkerConfig;
pub use coordinator::{run_batch, BatchMessage, BatchOutcome, DeadlineClock};
pub use definition::{
    RetryPolicy, RollbackStrategy, SagaConfig, Transition, WorkflowDefinition, WorkflowDefinitionBuilder,
};
pub use entity::{EntityStore, StorageError};
pub use event::{Urn, WorkflowEvent};
pub use handler::{CompensationHandler, DefaultHandler, HandlerError, HandlerOutcome, StepHandler};
pub use orchestrator::{Orchestrator, Outcome, TransitError};
pub use registry::{Registry, RegistryBuilder, RouteHandler};
pub use saga::{SagaCoordinator, SagaStatus};
