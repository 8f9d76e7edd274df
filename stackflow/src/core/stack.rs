//! Stack, change set and event records exchanged with the declarative engine.

use super::{ChangeSetStatus, ChangeSetType, StackStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flattened stack outputs: output key to value.
pub type Outputs = BTreeMap<String, String>;

/// Template parameters: parameter key to value.
pub type Parameters = BTreeMap<String, String>;

/// A single output exposed by a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOutput {
    /// Output key.
    pub key: String,
    /// Output value.
    pub value: String,
    /// Optional description from the template.
    #[serde(default)]
    pub description: Option<String>,
    /// Export name, when the output is exported.
    #[serde(default)]
    pub export_name: Option<String>,
}

impl StackOutput {
    /// Creates a new output.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            description: None,
            export_name: None,
        }
    }
}

/// A key/value tag applied to a stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Creates a new tag.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The engine's view of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDescription {
    /// Fully qualified stack identifier.
    pub stack_id: String,
    /// Stack name.
    pub stack_name: String,
    /// Current status.
    pub status: StackStatus,
    /// Reason attached to the current status.
    #[serde(default)]
    pub status_reason: Option<String>,
    /// Outputs exposed by the stack.
    #[serde(default)]
    pub outputs: Vec<StackOutput>,
    /// Tags applied to the stack.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// When the stack was created.
    #[serde(default)]
    pub creation_time: Option<DateTime<Utc>>,
    /// When the stack was last updated.
    #[serde(default)]
    pub last_updated_time: Option<DateTime<Utc>>,
}

impl StackDescription {
    /// Creates a description with no outputs or tags.
    #[must_use]
    pub fn new(stack_name: impl Into<String>, status: StackStatus) -> Self {
        let stack_name = stack_name.into();
        Self {
            stack_id: stack_name.clone(),
            stack_name,
            status,
            status_reason: None,
            outputs: Vec::new(),
            tags: Vec::new(),
            creation_time: None,
            last_updated_time: None,
        }
    }

    /// Synthesizes the description of a stack that does not exist.
    #[must_use]
    pub fn deleted(stack_name: impl Into<String>) -> Self {
        Self::new(stack_name, StackStatus::DeleteComplete)
    }

    /// Returns true if this describes a stack that does not exist.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.status == StackStatus::DeleteComplete
    }

    /// Returns the outputs as a key/value map.
    #[must_use]
    pub fn flat_outputs(&self) -> Outputs {
        self.outputs
            .iter()
            .map(|o| (o.key.clone(), o.value.clone()))
            .collect()
    }
}

/// The engine's view of a change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetDescription {
    /// Change set identifier.
    pub change_set_id: String,
    /// Owning stack.
    pub stack_name: String,
    /// Create or update.
    pub change_set_type: ChangeSetType,
    /// Current status.
    pub status: ChangeSetStatus,
    /// Reason attached to the current status.
    #[serde(default)]
    pub status_reason: Option<String>,
}

/// One entry of a stack's operation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEvent {
    /// Event identifier.
    pub event_id: String,
    /// Identifier of the stack that recorded the event.
    pub stack_id: String,
    /// Name of the stack that recorded the event.
    pub stack_name: String,
    /// Logical id of the resource within its template.
    pub logical_resource_id: String,
    /// Physical id of the resource; for nested stacks, the nested stack id.
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    /// Resource type, e.g. `AWS::CloudFormation::Stack`.
    pub resource_type: String,
    /// Resource status, e.g. `CREATE_FAILED`.
    pub resource_status: String,
    /// Reason attached to the status.
    #[serde(default)]
    pub resource_status_reason: Option<String>,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
}
