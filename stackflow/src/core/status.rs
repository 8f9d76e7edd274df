//! Stack and change set status enums.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a status string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown status: {0}")]
pub struct UnknownStatusError(pub String);

macro_rules! status_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// All known values.
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];

            /// Returns the wire representation.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownStatusError(other.to_string())),
                }
            }
        }
    };
}

status_enum! {
    /// The status of a stack as reported by the declarative engine.
    StackStatus {
        /// Stack creation is running.
        CreateInProgress => "CREATE_IN_PROGRESS",
        /// Stack creation failed and was not rolled back.
        CreateFailed => "CREATE_FAILED",
        /// Stack creation succeeded.
        CreateComplete => "CREATE_COMPLETE",
        /// A failed creation is being rolled back.
        RollbackInProgress => "ROLLBACK_IN_PROGRESS",
        /// Rolling back a failed creation failed.
        RollbackFailed => "ROLLBACK_FAILED",
        /// A failed creation was rolled back; the stack is an empty shell.
        RollbackComplete => "ROLLBACK_COMPLETE",
        /// Stack deletion is running.
        DeleteInProgress => "DELETE_IN_PROGRESS",
        /// Stack deletion failed.
        DeleteFailed => "DELETE_FAILED",
        /// The stack is deleted or does not exist.
        DeleteComplete => "DELETE_COMPLETE",
        /// Stack update is running.
        UpdateInProgress => "UPDATE_IN_PROGRESS",
        /// Old resources are being removed after an update.
        UpdateCompleteCleanupInProgress => "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
        /// Stack update succeeded.
        UpdateComplete => "UPDATE_COMPLETE",
        /// Stack update failed.
        UpdateFailed => "UPDATE_FAILED",
        /// A failed update is being rolled back.
        UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
        /// Rolling back a failed update failed; needs manual intervention.
        UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
        /// New resources are being removed after an update rollback.
        UpdateRollbackCompleteCleanupInProgress => "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS",
        /// A failed update was rolled back to the previous state.
        UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
        /// A change set exists but was never executed.
        ReviewInProgress => "REVIEW_IN_PROGRESS",
        /// Resource import is running.
        ImportInProgress => "IMPORT_IN_PROGRESS",
        /// Resource import succeeded.
        ImportComplete => "IMPORT_COMPLETE",
        /// A failed import is being rolled back.
        ImportRollbackInProgress => "IMPORT_ROLLBACK_IN_PROGRESS",
        /// Rolling back a failed import failed.
        ImportRollbackFailed => "IMPORT_ROLLBACK_FAILED",
        /// A failed import was rolled back.
        ImportRollbackComplete => "IMPORT_ROLLBACK_COMPLETE",
    }
}

impl StackStatus {
    /// Returns true if the engine is still working on the stack.
    #[must_use]
    pub fn is_in_progress(self) -> bool {
        self.as_str().ends_with("_IN_PROGRESS")
    }

    /// Returns the statuses a waiter treats as "still running" when the caller
    /// does not supply its own set.
    ///
    /// `REVIEW_IN_PROGRESS` is excluded: a stack holding only an unexecuted
    /// change set never leaves that status on its own.
    #[must_use]
    pub fn default_in_progress() -> HashSet<Self> {
        Self::ALL
            .iter()
            .copied()
            .filter(|s| s.is_in_progress() && *s != Self::ReviewInProgress)
            .collect()
    }

    /// Returns true if the stack must be deleted before a change set can be applied.
    #[must_use]
    pub fn requires_delete(self) -> bool {
        matches!(
            self,
            Self::CreateFailed
                | Self::DeleteFailed
                | Self::ReviewInProgress
                | Self::RollbackComplete
                | Self::RollbackFailed
        )
    }

    /// Returns true if the status is a successful settled state whose outputs can be trusted.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::CreateComplete | Self::UpdateComplete | Self::ImportComplete
        )
    }

    /// Returns true if the stack is settled on a working configuration: a
    /// success status, or an update that was rolled back to the previous one.
    #[must_use]
    pub fn is_stable(self) -> bool {
        self.is_success() || self == Self::UpdateRollbackComplete
    }
}

status_enum! {
    /// The status of a change set.
    ChangeSetStatus {
        /// Queued for creation.
        CreatePending => "CREATE_PENDING",
        /// Being computed.
        CreateInProgress => "CREATE_IN_PROGRESS",
        /// Computed and ready to execute.
        CreateComplete => "CREATE_COMPLETE",
        /// Queued for deletion.
        DeletePending => "DELETE_PENDING",
        /// Being deleted.
        DeleteInProgress => "DELETE_IN_PROGRESS",
        /// Deleted.
        DeleteComplete => "DELETE_COMPLETE",
        /// Deletion failed.
        DeleteFailed => "DELETE_FAILED",
        /// Creation failed; see the status reason.
        Failed => "FAILED",
    }
}

impl ChangeSetStatus {
    /// Returns true while the engine is still computing the change set.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::CreatePending | Self::CreateInProgress)
    }

    /// Returns true if the change set was removed, or is being removed, by the engine.
    #[must_use]
    pub fn is_deleted(self) -> bool {
        matches!(
            self,
            Self::DeletePending | Self::DeleteInProgress | Self::DeleteComplete
        )
    }
}

status_enum! {
    /// Whether a change set creates a new stack or updates an existing one.
    ChangeSetType {
        /// The stack does not exist yet.
        Create => "CREATE",
        /// The stack exists and is updated in place.
        Update => "UPDATE",
    }
}

impl ChangeSetType {
    /// The stack status that marks a successful execution of this change set.
    #[must_use]
    pub const fn success_status(self) -> StackStatus {
        match self {
            Self::Create => StackStatus::CreateComplete,
            Self::Update => StackStatus::UpdateComplete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in StackStatus::ALL {
            assert_eq!(status.as_str().parse::<StackStatus>().unwrap(), *status);
        }
        assert!("SIDEWAYS".parse::<StackStatus>().is_err());
    }

    #[test]
    fn test_default_in_progress_excludes_review() {
        let set = StackStatus::default_in_progress();
        assert!(set.contains(&StackStatus::CreateInProgress));
        assert!(set.contains(&StackStatus::UpdateRollbackCompleteCleanupInProgress));
        assert!(!set.contains(&StackStatus::ReviewInProgress));
        assert!(!set.contains(&StackStatus::CreateComplete));
    }

    #[test]
    fn test_requires_delete() {
        assert!(StackStatus::RollbackComplete.requires_delete());
        assert!(StackStatus::ReviewInProgress.requires_delete());
        assert!(!StackStatus::UpdateRollbackFailed.requires_delete());
        assert!(!StackStatus::UpdateRollbackComplete.requires_delete());
    }

    #[test]
    fn test_stable_statuses() {
        assert!(StackStatus::UpdateComplete.is_stable());
        assert!(StackStatus::UpdateRollbackComplete.is_stable());
        assert!(!StackStatus::UpdateRollbackComplete.is_success());
        assert!(!StackStatus::UpdateInProgress.is_stable());
        assert!(!StackStatus::RollbackComplete.is_stable());
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&StackStatus::UpdateRollbackFailed).unwrap();
        assert_eq!(json, "\"UPDATE_ROLLBACK_FAILED\"");
        let parsed: ChangeSetStatus = serde_json::from_str("\"CREATE_PENDING\"").unwrap();
        assert!(parsed.is_pending());
    }

    #[test]
    fn test_change_set_type_success_status() {
        assert_eq!(ChangeSetType::Create.success_status(), StackStatus::CreateComplete);
        assert_eq!(ChangeSetType::Update.success_status(), StackStatus::UpdateComplete);
    }
}
