//! Reports the resources responsible for a failed stack operation.
//!
//! After a stack settles in an unexpected status, its event history is walked
//! newest first back to the start of the operation. Every resource failure is
//! reported, and failures of nested stacks are followed into the nested
//! stack's own history since that is where the root cause lives.

use crate::backend::event_pages;
use crate::context::DeployContext;
use crate::core::StackEvent;
use crate::events::DeployEvent;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::TryStreamExt;
use tracing::{error, warn};

/// Resource type of a nested stack.
pub const NESTED_STACK_TYPE: &str = "AWS::CloudFormation::Stack";

const FAILURE_STATUSES: &[&str] = &["CREATE_FAILED", "UPDATE_FAILED", "DELETE_FAILED"];

/// Reasons reported for resources that were stopped because something else failed.
const CANCELLATION_MARKERS: &[&str] = &[
    "Resource creation cancelled",
    "Resource update cancelled",
    "Resource deletion cancelled",
    "cancelled due to other resource failure",
];

/// Walks stack event histories to find failing resources.
#[derive(Debug, Clone)]
pub struct FailureDiagnostics {
    ctx: DeployContext,
}

impl FailureDiagnostics {
    /// Creates a diagnostics walker.
    #[must_use]
    pub fn new(ctx: DeployContext) -> Self {
        Self { ctx }
    }

    /// Logs every resource failure of `stack_id` since `since`, emits them as
    /// one diagnostics event and returns the reported lines.
    ///
    /// Never fails: listing errors are logged as warnings and whatever was
    /// found up to that point is returned.
    pub async fn report(&self, stack_id: &str, since: DateTime<Utc>) -> Vec<String> {
        let mut lines = Vec::new();
        self.walk(stack_id, since, &mut lines).await;
        let stack = display_name(stack_id);
        for line in &lines {
            error!(stack, "{line}");
        }
        if !lines.is_empty() {
            self.ctx.emit(DeployEvent::StackDiagnostics {
                stack: stack.to_string(),
                failures: lines.clone(),
            });
        }
        lines
    }

    fn walk<'a>(
        &'a self,
        stack_id: &'a str,
        since: DateTime<Utc>,
        lines: &'a mut Vec<String>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut pages = std::pin::pin!(event_pages(self.ctx.backend(), stack_id));
            'pages: loop {
                let page = match pages.try_next().await {
                    Ok(Some(page)) => page,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(stack = display_name(stack_id), error = %e, "Could not list stack events");
                        break;
                    }
                };

                for event in page {
                    if event.timestamp < since {
                        break 'pages;
                    }
                    if !is_root_failure(&event) {
                        continue;
                    }
                    lines.push(describe_failure(&event));

                    if event.resource_type == NESTED_STACK_TYPE {
                        if let Some(nested) = event.physical_resource_id.as_deref() {
                            if !nested.is_empty() && nested != stack_id {
                                self.walk(nested, since, lines).await;
                            }
                        }
                    }
                }
            }
        })
    }
}

fn is_root_failure(event: &StackEvent) -> bool {
    if !FAILURE_STATUSES.contains(&event.resource_status.as_str()) {
        return false;
    }
    let reason = event.resource_status_reason.as_deref().unwrap_or("");
    !CANCELLATION_MARKERS.iter().any(|m| reason.contains(m))
}

fn describe_failure(event: &StackEvent) -> String {
    format!(
        "{} {} {} {}: {}",
        display_name(&event.stack_id),
        event.resource_type,
        event.logical_resource_id,
        event.resource_status,
        event.resource_status_reason.as_deref().unwrap_or("no reason given"),
    )
}

/// Shortens a fully qualified stack id to the stack name.
///
/// `arn:aws:cloudformation:us-east-1:123:stack/core/0f1e` becomes `core`;
/// anything that is not a stack id is returned unchanged.
#[must_use]
pub fn display_name(stack_id: &str) -> &str {
    if !stack_id.starts_with("arn:") {
        return stack_id;
    }
    stack_id
        .split_once(":stack/")
        .and_then(|(_, rest)| rest.split('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or(stack_id)
}
