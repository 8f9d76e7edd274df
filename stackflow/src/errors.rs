//! Error types for stackflow.
//!
//! Two layers are kept apart: [`BackendError`] is what the declarative engine and
//! the object store report, and [`StackflowError`] is what the orchestrator
//! surfaces to callers after classifying those failures.

use crate::core::StackStatus;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for stackflow operations.
pub type Result<T> = std::result::Result<T, StackflowError>;

/// Messages the remote services use when something is absent.
const NOT_FOUND_MARKERS: &[&str] = &["does not exist", "not found", "NoSuchKey", "NotFound"];

/// Messages the remote services use when the caller's session has lapsed.
const EXPIRED_TOKEN_MARKERS: &[&str] = &[
    "ExpiredToken",
    "security token included in the request is expired",
    "RequestExpired",
];

/// Errors reported by a [`StackBackend`](crate::backend::StackBackend) or
/// [`ObjectStore`](crate::backend::ObjectStore) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The addressed stack, change set or object is absent.
    #[error("{resource} does not exist")]
    NotFound {
        /// What was looked up.
        resource: String,
    },

    /// The session credentials expired.
    #[error("security token expired: {message}")]
    ExpiredToken {
        /// Message from the service.
        message: String,
    },

    /// Any other service or transport failure.
    #[error("{message}")]
    Other {
        /// Message from the service.
        message: String,
    },
}

impl BackendError {
    /// Creates a not-found error for a resource.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates a generic error.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Returns true if the error means the resource does not exist.
    ///
    /// Some backends only report absence through the message text, so
    /// generic errors are matched against the known phrasings too.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Other { message } => NOT_FOUND_MARKERS.iter().any(|m| message.contains(m)),
            _ => false,
        }
    }

    /// Returns true if the caller's credentials have expired.
    #[must_use]
    pub fn is_expired_token(&self) -> bool {
        match self {
            Self::ExpiredToken { .. } => true,
            Self::Other { message } => EXPIRED_TOKEN_MARKERS.iter().any(|m| message.contains(m)),
            _ => false,
        }
    }
}

/// The main error type for stackflow operations.
#[derive(Debug, Error)]
pub enum StackflowError {
    /// A remote call failed for a reason that is not otherwise classified.
    #[error("{operation} failed for '{target}': {source}")]
    Backend {
        /// The remote operation, e.g. `DescribeStack`.
        operation: &'static str,
        /// The stack, change set or object key involved.
        target: String,
        /// The underlying backend error.
        #[source]
        source: BackendError,
    },

    /// Credentials expired while talking to the engine.
    #[error(
        "security credentials expired while working on stack '{stack}'; \
         refresh your credentials and re-run the deployment"
    )]
    CredentialsExpired {
        /// The stack being worked on.
        stack: String,
    },

    /// A stack operation settled in a status other than the expected one.
    #[error("stack '{stack}' finished in {status}{}", fmt_reason(.reason))]
    StackOperationFailed {
        /// The stack name.
        stack: String,
        /// The final status observed.
        status: StackStatus,
        /// The status reason reported by the engine, if any.
        reason: Option<String>,
    },

    /// The stack needs manual intervention before it can be deployed again.
    #[error(
        "stack '{stack}' is in {status} and cannot be recovered automatically; \
         continue the rollback or delete the stack manually, then re-run the deployment"
    )]
    UnrecoverableStack {
        /// The stack name.
        stack: String,
        /// The blocking status.
        status: StackStatus,
    },

    /// The foundation stack is broken and the whole deployment has to be removed.
    #[error(
        "foundation stack '{stack}' is in {status}; every stack of the deployment must be torn \
         down before retrying. Set `allow_full_teardown` to confirm the teardown"
    )]
    TeardownRequired {
        /// The foundation stack name.
        stack: String,
        /// The blocking status.
        status: StackStatus,
    },

    /// A change set could not be created.
    #[error("change set for stack '{stack}' failed: {reason}")]
    ChangeSetFailed {
        /// The stack name.
        stack: String,
        /// The status reason.
        reason: String,
    },

    /// The target environment has not been bootstrapped yet.
    #[error("stack '{stack}' requires '{missing}' which has not been deployed; run a full deployment first")]
    NotBootstrapped {
        /// The stack that was requested.
        stack: String,
        /// The dependency that is missing.
        missing: String,
    },

    /// The deployment plan is invalid.
    #[error("{0}")]
    Validation(#[from] PlanValidationError),

    /// A template or asset could not be read.
    #[error("failed to read {path:?}: {source}")]
    Io {
        /// The path being read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// One or more stacks of a deployment failed.
    #[error("deployment failed for {} stack(s): {}", .failures.len(), fmt_failures(.failures))]
    DeploymentFailed {
        /// Every failed stack with its message.
        failures: Vec<StackFailure>,
    },

    /// A generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StackflowError {
    /// Classifies a backend error raised while working on `target`.
    ///
    /// Expired credentials are lifted into their own variant so they are never
    /// mistaken for a failed stack.
    #[must_use]
    pub fn backend(operation: &'static str, target: impl Into<String>, source: BackendError) -> Self {
        let target = target.into();
        if source.is_expired_token() {
            return Self::CredentialsExpired { stack: target };
        }
        Self::Backend {
            operation,
            target,
            source,
        }
    }

    /// Returns true if the error came from expired credentials.
    #[must_use]
    pub fn is_credentials_expired(&self) -> bool {
        matches!(self, Self::CredentialsExpired { .. })
    }
}

/// A single failed stack within an aggregated deployment error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFailure {
    /// The stack name.
    pub stack: String,
    /// Rendered error message, including the last known status or reason.
    pub message: String,
}

impl StackFailure {
    /// Creates a new stack failure.
    #[must_use]
    pub fn new(stack: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for StackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.stack, self.message)
    }
}

fn fmt_reason(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {r}"))
        .unwrap_or_default()
}

fn fmt_failures(failures: &[StackFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error raised when a deployment plan fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PlanValidationError {
    /// The error message.
    pub message: String,
    /// The stacks involved in the error.
    pub stacks: Vec<String>,
}

impl PlanValidationError {
    /// Creates a new plan validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stacks: Vec::new(),
        }
    }

    /// Sets the stacks involved.
    #[must_use]
    pub fn with_stacks(mut self, stacks: Vec<String>) -> Self {
        self.stacks = stacks;
        self
    }
}

/// Error raised when the stack dependency graph contains a cycle.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in deployment plan: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stacks forming the cycle.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

impl From<CycleDetectedError> for PlanValidationError {
    fn from(err: CycleDetectedError) -> Self {
        PlanValidationError {
            message: err.to_string(),
            stacks: err.cycle_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_by_variant_and_message() {
        assert!(BackendError::not_found("stack foo").is_not_found());
        assert!(BackendError::other("Stack with id foo does not exist").is_not_found());
        assert!(!BackendError::other("Rate exceeded").is_not_found());
        assert!(!BackendError::ExpiredToken {
            message: "does not exist".into()
        }
        .is_not_found());
    }

    #[test]
    fn test_expired_token_is_lifted() {
        let err = StackflowError::backend(
            "DescribeStack",
            "core",
            BackendError::other("ExpiredToken: The security token included in the request is expired"),
        );
        assert!(err.is_credentials_expired());
        assert!(err.to_string().contains("refresh your credentials"));

        let err = StackflowError::backend("DescribeStack", "core", BackendError::other("boom"));
        assert!(!err.is_credentials_expired());
    }

    #[test]
    fn test_stack_operation_failed_display() {
        let err = StackflowError::StackOperationFailed {
            stack: "core".into(),
            status: StackStatus::UpdateRollbackComplete,
            reason: Some("Resource creation cancelled".into()),
        };
        assert_eq!(
            err.to_string(),
            "stack 'core' finished in UPDATE_ROLLBACK_COMPLETE: Resource creation cancelled"
        );
    }

    #[test]
    fn test_deployment_failed_lists_every_stack() {
        let err = StackflowError::DeploymentFailed {
            failures: vec![
                StackFailure::new("api", "stack 'api' finished in ROLLBACK_COMPLETE"),
                StackFailure::new("web", "boom"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("deployment failed for 2 stack(s)"));
        assert!(msg.contains("api (stack 'api' finished in ROLLBACK_COMPLETE)"));
        assert!(msg.contains("web (boom)"));
    }

    #[test]
    fn test_cycle_converts_to_validation() {
        let err: PlanValidationError =
            CycleDetectedError::new(vec!["a".into(), "b".into(), "a".into()]).into();
        assert_eq!(err.stacks, vec!["a", "b", "a"]);
        assert!(err.message.contains("a -> b -> a"));
    }
}
