//! Registry (C8): explicit, startup-time discovery of workflow routes.
//!
//! Rust has no runtime attribute scanning or DI container, so discovery
//! is a builder the application populates once, then freezes: no
//! hot-reload, no implicit global bus.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::WorkflowEvent;

/// Errors raised while building a [`Registry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("event '{0}' is already routed to a different workflow")]
    DuplicateEvent(String),

    #[error("no route registered for event '{0}'")]
    NotFound(String),
}

/// Type-erased dispatch boundary.
///
/// Each concrete `Orchestrator<T, S, P>` implements this by deserializing
/// the opaque JSON payload into its own `P`, running `transit`, and
/// re-erasing the outcome — the registry itself never needs to know `T`,
/// `S`, or `P`.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// The workflow name this handler was registered under, for logging.
    fn workflow_name(&self) -> &str;

    async fn dispatch(&self, event: WorkflowEvent) -> Result<crate::orchestrator::Outcome, crate::orchestrator::TransitError>;
}

/// Immutable, `Arc`-shareable event-name → handler index.
///
/// Built once at process start; `lookup` is a plain `HashMap` read, safe
/// for concurrent access without locking.
pub struct Registry {
    routes: HashMap<String, Arc<dyn RouteHandler>>,
}

impl Registry {
    pub fn lookup(&self, event_name: &str) -> Result<Arc<dyn RouteHandler>, RegistryError> {
        self.routes
            .get(event_name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(event_name.to_string()))
    }
}

/// Builder for [`Registry`]. Populate with `.register(event, handler)`
/// calls, then `.build()`, which rejects duplicate event keys eagerly.
#[derive(Default)]
pub struct RegistryBuilder {
    routes: HashMap<String, Arc<dyn RouteHandler>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every event name it claims to own.
    pub fn register(
        mut self,
        event_names: impl IntoIterator<Item = impl Into<String>>,
        handler: Arc<dyn RouteHandler>,
    ) -> Result<Self, RegistryError> {
        for event_name in event_names {
            let event_name = event_name.into();
            if self.routes.contains_key(&event_name) {
                return Err(RegistryError::DuplicateEvent(event_name));
            }
            self.routes.insert(event_name, handler.clone());
        }
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry {
            routes: self.routes,
        }
    }
}
