//! Handler outcome types and the function-type aliases the registry and
//! orchestrator invoke through.
//!
//! Rust has no decorator/reflection-based parameter binding, so the
//! "bag" and "projected arguments" handler-invocation styles collapse
//! into a single explicit signature: `(entity, payload) -> outcome`.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;

/// Error carried by a non-`Ok` [`HandlerOutcome`] or a failed compensation.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }
}

/// The tagged result a step handler returns, replacing exceptions for
/// control flow.
///
/// `Done` carries the (possibly handler-mutated) entity and the next
/// step payload; the orchestrator still performs the actual status
/// transition via the entity store, handlers only touch their own
/// business fields.
pub enum HandlerOutcome<T, P> {
    /// Step succeeded; proceed with this entity and payload.
    Done(T, P),
    /// Transient failure; retry via the broker if attempts remain.
    Retry(HandlerError),
    /// Attempt exhaustion reclassified as terminal by the orchestrator.
    Fatal(HandlerError),
    /// Handler explicitly signals "do not retry".
    Unretriable(HandlerError),
}

/// A step handler: `(entity, payload) -> HandlerOutcome<T, P>`.
///
/// Implemented for any `Fn(T, P) -> impl Future<Output = HandlerOutcome<T, P>>`
/// so plain async closures and free functions can be registered directly.
pub trait StepHandler<T, P>: Send + Sync {
    fn call(&self, entity: T, payload: P) -> BoxFuture<'static, HandlerOutcome<T, P>>;
}

impl<T, P, F, Fut> StepHandler<T, P> for F
where
    F: Fn(T, P) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome<T, P>> + Send + 'static,
{
    fn call(&self, entity: T, payload: P) -> BoxFuture<'static, HandlerOutcome<T, P>> {
        Box::pin(self(entity, payload))
    }
}

/// Shared handle to a registered [`StepHandler`].
pub type StepHandlerFn<T, P> = Arc<dyn StepHandler<T, P>>;

/// Fallback invoked when no transition matches an incoming event.
///
/// Takes the triggering event name in addition to entity/payload, since
/// it has no single transition to anchor its context to.
pub trait DefaultHandler<T, P>: Send + Sync {
    fn call(&self, entity: T, event: String, payload: P) -> BoxFuture<'static, HandlerOutcome<T, P>>;
}

impl<T, P, F, Fut> DefaultHandler<T, P> for F
where
    F: Fn(T, String, P) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome<T, P>> + Send + 'static,
{
    fn call(&self, entity: T, event: String, payload: P) -> BoxFuture<'static, HandlerOutcome<T, P>> {
        Box::pin(self(entity, event, payload))
    }
}

/// Shared handle to a registered [`DefaultHandler`].
pub type DefaultHandlerFn<T, P> = Arc<dyn DefaultHandler<T, P>>;

/// A compensation handler: inverse of a previously executed step.
///
/// Invoked with the step's `beforeState` and recorded payload; has no
/// retry semantics of its own, only success/failure.
pub trait CompensationHandler<T, P>: Send + Sync {
    fn call(&self, entity: T, payload: P) -> BoxFuture<'static, Result<(), HandlerError>>;
}

impl<T, P, F, Fut> CompensationHandler<T, P> for F
where
    F: Fn(T, P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn call(&self, entity: T, payload: P) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin(self(entity, payload))
    }
}

/// Shared handle to a registered [`CompensationHandler`].
pub type CompensationHandlerFn<T, P> = Arc<dyn CompensationHandler<T, P>>;
