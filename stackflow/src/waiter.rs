//! Polls a stack until it leaves its in-progress states.

use crate::context::DeployContext;
use crate::core::{StackDescription, StackStatus};
use crate::diagnostics::FailureDiagnostics;
use crate::errors::{Result, StackflowError};
use crate::events::DeployEvent;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, error, info};

/// What a wait is waiting for.
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    /// Status that counts as success. `None` accepts any settled status.
    pub success: Option<StackStatus>,
    /// Statuses that mean "keep polling". Defaults to
    /// [`StackStatus::default_in_progress`].
    pub in_progress: Option<HashSet<StackStatus>>,
    /// Start of the operation being waited on, for failure diagnostics.
    /// Defaults to the moment the wait starts.
    pub since: Option<DateTime<Utc>>,
}

impl WaitOptions {
    /// Waits for any settled status.
    #[must_use]
    pub fn any_terminal() -> Self {
        Self::default()
    }

    /// Waits for a settled status and requires it to be `success`.
    #[must_use]
    pub fn until(success: StackStatus) -> Self {
        Self {
            success: Some(success),
            ..Self::default()
        }
    }

    /// Overrides the set of in-progress statuses.
    #[must_use]
    pub fn with_in_progress(mut self, statuses: HashSet<StackStatus>) -> Self {
        self.in_progress = Some(statuses);
        self
    }

    /// Sets the start of the operation being waited on.
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }
}

/// Waits for stacks to settle.
#[derive(Debug, Clone)]
pub struct StackStatusWaiter {
    ctx: DeployContext,
}

impl StackStatusWaiter {
    /// Creates a waiter.
    #[must_use]
    pub fn new(ctx: DeployContext) -> Self {
        Self { ctx }
    }

    /// Describes a stack, reporting an absent stack as `DELETE_COMPLETE`.
    pub async fn describe(&self, stack_name: &str) -> Result<StackDescription> {
        match self.ctx.backend().describe_stack(stack_name).await {
            Ok(stack) => Ok(stack),
            Err(e) if e.is_not_found() => {
                debug!(stack = stack_name, "Stack does not exist");
                Ok(StackDescription::deleted(stack_name))
            }
            Err(e) => {
                let err = StackflowError::backend("DescribeStack", stack_name, e);
                if err.is_credentials_expired() {
                    error!(stack = stack_name, "Credentials expired while describing stack");
                }
                Err(err)
            }
        }
    }

    /// Blocks until the stack's status is outside the in-progress set.
    ///
    /// Returns the final description when no success status was requested or
    /// the final status matches it. Otherwise the failing resources are logged
    /// and [`StackflowError::StackOperationFailed`] is returned.
    pub async fn wait(&self, stack_name: &str, options: &WaitOptions) -> Result<StackDescription> {
        let config = self.ctx.config();
        let since = options.since.unwrap_or_else(Utc::now);
        let in_progress = options
            .in_progress
            .clone()
            .unwrap_or_else(StackStatus::default_in_progress);

        let started = Instant::now();
        let mut last_report = started;
        let mut first_poll = true;

        let stack = loop {
            let stack = self.describe(stack_name).await?;
            if !in_progress.contains(&stack.status) {
                break stack;
            }

            if first_poll {
                if options.success.is_none() {
                    info!(
                        stack = stack_name,
                        status = %stack.status,
                        "Stack already has an operation in progress, waiting for it to finish"
                    );
                }
            } else if last_report.elapsed() >= config.progress_interval() {
                let elapsed_secs = started.elapsed().as_secs();
                info!(stack = stack_name, status = %stack.status, elapsed_secs, "Still waiting on stack");
                self.ctx.emit(DeployEvent::StillWaiting {
                    stack: stack_name.to_string(),
                    status: stack.status,
                    elapsed_secs,
                });
                last_report = Instant::now();
            }
            first_poll = false;

            tokio::time::sleep(config.stack_poll_interval()).await;
        };

        match options.success {
            None => Ok(stack),
            Some(expected) if expected == stack.status => Ok(stack),
            Some(expected) => {
                error!(
                    stack = stack_name,
                    status = %stack.status,
                    expected = %expected,
                    reason = stack.status_reason.as_deref().unwrap_or(""),
                    "Stack operation failed"
                );
                FailureDiagnostics::new(self.ctx.clone())
                    .report(&stack.stack_id, since)
                    .await;
                Err(StackflowError::StackOperationFailed {
                    stack: stack_name.to_string(),
                    status: stack.status,
                    reason: stack.status_reason,
                })
            }
        }
    }
}
