//! In-memory stand-ins for the remote services.
//!
//! [`InMemoryEngine`] and [`InMemoryObjectStore`] implement the backend traits
//! entirely in memory so the orchestrator can be exercised end to end without
//! network access.

mod engine;
mod object_store;

pub use engine::{stack_arn, InMemoryEngine};
pub use object_store::InMemoryObjectStore;

use crate::config::DeployConfig;
use crate::context::DeployContext;
use crate::events::CollectingEventSink;
use std::sync::Arc;
use std::time::Duration;

/// A context wired to fresh in-memory services.
pub struct TestHarness {
    /// The simulated engine.
    pub engine: Arc<InMemoryEngine>,
    /// The simulated object store.
    pub store: Arc<InMemoryObjectStore>,
    /// Every event emitted during the run.
    pub events: Arc<CollectingEventSink>,
    /// Context wired to the services above.
    pub ctx: DeployContext,
}

impl TestHarness {
    /// Creates a harness with millisecond poll intervals.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    /// Creates a harness with the given configuration.
    #[must_use]
    pub fn with_config(config: DeployConfig) -> Self {
        let engine = Arc::new(InMemoryEngine::new());
        let store = Arc::new(InMemoryObjectStore::new());
        let events = Arc::new(CollectingEventSink::new());
        let ctx = DeployContext::new(engine.clone(), store.clone(), config)
            .with_event_sink(events.clone());
        Self {
            engine,
            store,
            events,
            ctx,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A configuration suited to tests: 1 ms polling and a known bucket.
#[must_use]
pub fn fast_config() -> DeployConfig {
    DeployConfig::new()
        .with_artifact_bucket("test-artifacts")
        .with_version("1.0.0")
        .with_poll_interval(Duration::from_millis(1))
}
