//! The explicit context handed to every component of a deployment run.

use crate::backend::{ObjectStore, StackBackend};
use crate::config::DeployConfig;
use crate::events::{DeployEvent, EventSink, LoggingEventSink};
use std::fmt;
use std::sync::Arc;

/// Remote clients, configuration and the event sink for one deployment run.
///
/// Built once and cloned into every worker; clones share the same clients.
#[derive(Clone)]
pub struct DeployContext {
    backend: Arc<dyn StackBackend>,
    object_store: Arc<dyn ObjectStore>,
    config: Arc<DeployConfig>,
    events: Arc<dyn EventSink>,
}

impl DeployContext {
    /// Creates a context that logs events through tracing.
    #[must_use]
    pub fn new(
        backend: Arc<dyn StackBackend>,
        object_store: Arc<dyn ObjectStore>,
        config: DeployConfig,
    ) -> Self {
        Self {
            backend,
            object_store,
            config: Arc::new(config),
            events: Arc::new(LoggingEventSink::default()),
        }
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the declarative engine client.
    #[must_use]
    pub fn backend(&self) -> &dyn StackBackend {
        self.backend.as_ref()
    }

    /// Returns the object store client.
    #[must_use]
    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.object_store
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Reports an event to the sink.
    pub fn emit(&self, event: DeployEvent) {
        self.events.emit(&event);
    }
}

impl fmt::Debug for DeployContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
