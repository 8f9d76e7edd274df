//! Interfaces to the remote services the orchestrator drives.
//!
//! [`StackBackend`] is the narrow surface of a declarative infrastructure
//! engine and [`ObjectStore`] the object storage used for large templates and
//! artifacts. Both are object-safe so a [`DeployContext`](crate::context::DeployContext)
//! can hold any implementation behind an `Arc`.

use crate::core::{
    ChangeSetDescription, ChangeSetType, Parameters, StackDescription, StackEvent, Tag,
};
use crate::errors::BackendError;
use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};

/// Where the engine reads a template from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateSource {
    /// The template body is sent inline.
    Body(String),
    /// The template was uploaded to object storage.
    Url {
        /// Bucket holding the template.
        bucket: String,
        /// Object key.
        key: String,
        /// Object version, when the bucket is versioned.
        version: Option<String>,
    },
}

/// Everything needed to create a change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetRequest {
    /// Target stack.
    pub stack_name: String,
    /// Change set name, unique per stack.
    pub change_set_name: String,
    /// Create or update.
    pub change_set_type: ChangeSetType,
    /// Template to apply.
    pub template: TemplateSource,
    /// Template parameters.
    pub parameters: Parameters,
    /// Tags applied to the stack.
    pub tags: Vec<Tag>,
    /// Token making the request idempotent on retries.
    pub client_token: String,
}

/// One page of a stack's event history, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPage {
    /// Events on this page.
    pub events: Vec<StackEvent>,
    /// Token for the next (older) page.
    pub next_token: Option<String>,
}

/// The declarative infrastructure engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StackBackend: Send + Sync {
    /// Describes a stack. Absent stacks are reported as [`BackendError::NotFound`].
    async fn describe_stack(&self, stack_name: &str) -> Result<StackDescription, BackendError>;

    /// Creates a change set and returns its id.
    async fn create_change_set(&self, request: &ChangeSetRequest) -> Result<String, BackendError>;

    /// Describes a change set.
    async fn describe_change_set(
        &self,
        change_set_id: &str,
    ) -> Result<ChangeSetDescription, BackendError>;

    /// Deletes a change set without executing it.
    async fn delete_change_set(&self, change_set_id: &str) -> Result<(), BackendError>;

    /// Starts executing a change set.
    async fn execute_change_set(&self, change_set_id: &str) -> Result<(), BackendError>;

    /// Starts deleting a stack.
    async fn delete_stack(&self, stack_name: &str) -> Result<(), BackendError>;

    /// Lists one page of a stack's events, newest first.
    async fn list_stack_events(
        &self,
        stack_id: &str,
        next_token: Option<String>,
    ) -> Result<EventPage, BackendError>;
}

/// Object storage for templates and artifacts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns the version of an existing object, or [`BackendError::NotFound`].
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<String>, BackendError>;

    /// Stores an object and returns its version.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<Option<String>, BackendError>;
}

/// Lazily pages through a stack's event history, newest first.
///
/// Each item is one page. The stream ends after the last page; callers that
/// have seen enough simply stop polling it.
pub fn event_pages<'a>(
    backend: &'a dyn StackBackend,
    stack_id: &'a str,
) -> impl Stream<Item = Result<Vec<StackEvent>, BackendError>> + Send + 'a {
    // `None` once the last page has been read; `Some(token)` otherwise.
    stream::try_unfold(Some(None), move |cursor: Option<Option<String>>| async move {
        let Some(token) = cursor else {
            return Ok::<_, BackendError>(None);
        };
        let page = backend.list_stack_events(stack_id, token).await?;
        let next = page.next_token.map(Some);
        Ok(Some((page.events, next)))
    })
}
