//! Core types: statuses and the records exchanged with the declarative engine.

mod stack;
mod status;

pub use stack::{
    ChangeSetDescription, Outputs, Parameters, StackDescription, StackEvent, StackOutput, Tag,
};
pub use status::{ChangeSetStatus, ChangeSetType, StackStatus, UnknownStatusError};
