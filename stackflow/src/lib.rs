//! # Stackflow
//!
//! Change-set driven deployment of multi-stack infrastructure.
//!
//! Stackflow drives a declarative infrastructure engine through create and
//! update operations for a set of dependent stacks:
//!
//! - **Change sets**: every stack is deployed through a change set; empty
//!   change sets are detected and discarded
//! - **Recovery**: stacks left in a failed state are deleted and recreated,
//!   stacks needing manual repair are reported as such
//! - **Content-addressed assets**: large templates and artifacts are uploaded
//!   once per content hash
//! - **Waves**: independent stacks deploy concurrently, dependents wait for
//!   their dependencies' outputs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stackflow::prelude::*;
//!
//! let plan = DeploymentPlan::new(vec![
//!     StackDefinition::from_path("base", "templates/base.json"),
//!     StackDefinition::from_path("api", "templates/api.json").depends_on(&["base"]),
//! ])?;
//!
//! let ctx = DeployContext::new(engine, object_store, DeployConfig::load("deploy.json")?);
//! let outputs = DeploymentScheduler::new(ctx).deploy(&plan).await?.into_result()?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod assets;
pub mod backend;
pub mod changeset;
pub mod config;
pub mod context;
pub mod core;
pub mod diagnostics;
pub mod errors;
pub mod events;
pub mod observability;
pub mod scheduler;
pub mod testing;
pub mod waiter;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::assets::{AssetPackager, EmbeddedAsset, UploadedAsset};
    pub use crate::backend::{ChangeSetRequest, ObjectStore, StackBackend, TemplateSource};
    pub use crate::changeset::{ChangeSetEngine, DeployOutcome, DeployPhase, StackDeployRequest};
    pub use crate::config::DeployConfig;
    pub use crate::context::DeployContext;
    pub use crate::core::{
        ChangeSetStatus, ChangeSetType, Outputs, Parameters, StackDescription, StackStatus,
    };
    pub use crate::diagnostics::FailureDiagnostics;
    pub use crate::errors::{BackendError, Result, StackFailure, StackflowError};
    pub use crate::events::{DeployEvent, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::scheduler::{DeploymentPlan, DeploymentReport, DeploymentScheduler, StackDefinition};
    pub use crate::waiter::{StackStatusWaiter, WaitOptions};
}
