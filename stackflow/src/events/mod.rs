//! Deployment progress events.
//!
//! Components report what they are doing through an [`EventSink`] held by the
//! [`DeployContext`](crate::context::DeployContext). The default sink writes
//! every event to the tracing log; tests use [`CollectingEventSink`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::StackStatus;
use serde::Serialize;

/// Something worth reporting about a deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeployEvent {
    /// A stack deployment started.
    StackStarted {
        /// Stack name.
        stack: String,
    },
    /// A stack deployment finished successfully.
    StackCompleted {
        /// Stack name.
        stack: String,
        /// True when the change set was empty and nothing was applied.
        unchanged: bool,
    },
    /// A stack deployment failed.
    StackFailed {
        /// Stack name.
        stack: String,
        /// Rendered error.
        error: String,
    },
    /// A stack was not attempted because a dependency failed.
    StackSkipped {
        /// Stack name.
        stack: String,
        /// Why it was skipped.
        reason: String,
    },
    /// A stack was deleted.
    StackDeleted {
        /// Stack name.
        stack: String,
    },
    /// Resource failures found after a stack operation failed.
    StackDiagnostics {
        /// Stack name.
        stack: String,
        /// One line per failed resource, nested stacks included.
        failures: Vec<String>,
    },
    /// A waiter is still polling a stack.
    StillWaiting {
        /// Stack name.
        stack: String,
        /// Last status seen.
        status: StackStatus,
        /// Seconds spent waiting so far.
        elapsed_secs: u64,
    },
    /// A scheduled unit of work finished.
    Progress {
        /// Units finished so far.
        completed: usize,
        /// Units in the run.
        total: usize,
        /// The stack that just finished.
        stack: String,
    },
}

impl DeployEvent {
    /// Returns the dotted event type, e.g. `stack.completed`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StackStarted { .. } => "stack.started",
            Self::StackCompleted { .. } => "stack.completed",
            Self::StackFailed { .. } => "stack.failed",
            Self::StackSkipped { .. } => "stack.skipped",
            Self::StackDeleted { .. } => "stack.deleted",
            Self::StackDiagnostics { .. } => "stack.diagnostics",
            Self::StillWaiting { .. } => "stack.waiting",
            Self::Progress { .. } => "deployment.progress",
        }
    }

    /// Returns the stack the event is about.
    #[must_use]
    pub fn stack(&self) -> &str {
        match self {
            Self::StackStarted { stack }
            | Self::StackCompleted { stack, .. }
            | Self::StackFailed { stack, .. }
            | Self::StackSkipped { stack, .. }
            | Self::StackDeleted { stack }
            | Self::StackDiagnostics { stack, .. }
            | Self::StillWaiting { stack, .. }
            | Self::Progress { stack, .. } => stack,
        }
    }
}
