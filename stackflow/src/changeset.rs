//! The per-stack deployment state machine.
//!
//! A deployment moves through these phases:
//!
//! ```text
//! NoStack -> Preparing -> ChangeSetPending -> NoChanges
//!                                          -> Ready -> Executing -> Done
//! Preparing -> BlockedNeedsDelete -> NoStack (after the stack is deleted)
//! ```
//!
//! Preparing waits for any operation already running on the stack and decides
//! between a CREATE and an UPDATE change set. A change set without changes is
//! deleted and the stack's current outputs are returned as they are.

use crate::assets::{AssetPackager, EmbeddedAsset};
use crate::backend::{ChangeSetRequest, TemplateSource};
use crate::context::DeployContext;
use crate::core::{ChangeSetStatus, ChangeSetType, Outputs, Parameters, StackStatus};
use crate::errors::{Result, StackflowError};
use crate::events::DeployEvent;
use crate::observability::stack_span;
use crate::waiter::{StackStatusWaiter, WaitOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Status reasons the engine gives for a change set without changes.
const NO_CHANGES_MARKERS: &[&str] = &[
    "didn't contain changes",
    "No updates are to be performed",
];

/// A phase of a single stack deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeployPhase {
    /// Nothing is known about the stack yet, or it was just deleted.
    NoStack,
    /// Waiting for the stack to settle and classifying its status.
    Preparing,
    /// The stack must be deleted before a change set can be applied.
    BlockedNeedsDelete,
    /// A change set was submitted and is being computed.
    ChangeSetPending,
    /// The change set turned out empty.
    NoChanges,
    /// The change set is ready to execute.
    Ready,
    /// The change set is being applied.
    Executing,
    /// The stack reached its success status.
    Done,
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoStack => "NO_STACK",
            Self::Preparing => "PREPARING",
            Self::BlockedNeedsDelete => "BLOCKED_NEEDS_DELETE",
            Self::ChangeSetPending => "CHANGESET_PENDING",
            Self::NoChanges => "NO_CHANGES",
            Self::Ready => "READY",
            Self::Executing => "EXECUTING",
            Self::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// Where a stack's template comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateInput {
    /// A template file on disk.
    Path(PathBuf),
    /// A template body held in memory.
    Body(String),
}

/// Everything needed to deploy one stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDeployRequest {
    /// Stack name.
    pub stack_name: String,
    /// Template to apply.
    pub template: TemplateInput,
    /// Template parameters.
    #[serde(default)]
    pub parameters: Parameters,
    /// Local artifacts uploaded and passed to the template as parameters.
    #[serde(default)]
    pub assets: Vec<EmbeddedAsset>,
    /// True for the first stack of a deployment, which everything else builds on.
    #[serde(default)]
    pub foundational: bool,
}

impl StackDeployRequest {
    /// Creates a request for a template held in memory.
    #[must_use]
    pub fn from_body(stack_name: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(stack_name, TemplateInput::Body(body.into()))
    }

    /// Creates a request for a template file.
    #[must_use]
    pub fn from_path(stack_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(stack_name, TemplateInput::Path(path.into()))
    }

    fn new(stack_name: impl Into<String>, template: TemplateInput) -> Self {
        Self {
            stack_name: stack_name.into(),
            template,
            parameters: Parameters::new(),
            assets: Vec::new(),
            foundational: false,
        }
    }

    /// Sets one parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Merges parameters, replacing existing keys.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters.extend(parameters);
        self
    }

    /// Adds an embedded asset.
    #[must_use]
    pub fn with_asset(mut self, asset: EmbeddedAsset) -> Self {
        self.assets.push(asset);
        self
    }

    /// Marks the stack as the foundation of the deployment.
    #[must_use]
    pub fn foundational(mut self, foundational: bool) -> Self {
        self.foundational = foundational;
        self
    }
}

/// The settled state of a stack before a change set is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedStack {
    /// The stack does not exist.
    Absent,
    /// The stack exists in an updatable status.
    Existing {
        /// The status it settled in.
        status: StackStatus,
        /// Its current outputs.
        outputs: Outputs,
    },
}

impl PreparedStack {
    /// Returns the change set type needed to deploy onto this stack.
    #[must_use]
    pub fn change_set_type(&self) -> ChangeSetType {
        match self {
            Self::Absent => ChangeSetType::Create,
            Self::Existing { .. } => ChangeSetType::Update,
        }
    }

    fn into_outputs(self) -> Outputs {
        match self {
            Self::Absent => Outputs::new(),
            Self::Existing { outputs, .. } => outputs,
        }
    }
}

/// What a change set turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSetOutcome {
    /// Computed and ready to execute.
    Ready {
        /// Change set id.
        change_set_id: String,
    },
    /// Empty; already cleaned up.
    NoChanges,
}

/// The result of deploying one stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    /// Stack name.
    pub stack_name: String,
    /// The change set type that was submitted.
    pub change_set_type: ChangeSetType,
    /// The stack's outputs after the deployment.
    pub outputs: Outputs,
    /// True when the change set was empty.
    pub unchanged: bool,
    /// Phases the deployment went through, in order.
    pub phases: Vec<DeployPhase>,
}

#[derive(Debug)]
struct PhaseLog<'a> {
    stack: &'a str,
    phases: Vec<DeployPhase>,
}

impl<'a> PhaseLog<'a> {
    fn new(stack: &'a str) -> Self {
        Self {
            stack,
            phases: vec![DeployPhase::NoStack],
        }
    }

    fn enter(&mut self, phase: DeployPhase) {
        debug!(stack = self.stack, %phase, "Entering phase");
        self.phases.push(phase);
    }
}

/// Deploys single stacks through change sets.
#[derive(Debug, Clone)]
pub struct ChangeSetEngine {
    ctx: DeployContext,
    waiter: StackStatusWaiter,
    packager: AssetPackager,
}

impl ChangeSetEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(ctx: DeployContext) -> Self {
        Self {
            waiter: StackStatusWaiter::new(ctx.clone()),
            packager: AssetPackager::from_context(&ctx),
            ctx,
        }
    }

    /// Deploys a stack and returns its outputs.
    pub async fn deploy_stack(&self, request: &StackDeployRequest) -> Result<DeployOutcome> {
        let span = stack_span(&request.stack_name);
        self.deploy_stack_inner(request).instrument(span).await
    }

    async fn deploy_stack_inner(&self, request: &StackDeployRequest) -> Result<DeployOutcome> {
        let name = request.stack_name.as_str();
        let mut phases = PhaseLog::new(name);

        let (template, parameters) = self.package(request).await?;

        phases.enter(DeployPhase::Preparing);
        let prepared = self
            .prepare(name, request.foundational, &mut phases)
            .await?;
        let change_set_type = prepared.change_set_type();

        phases.enter(DeployPhase::ChangeSetPending);
        let outcome = self
            .create_change_set(name, change_set_type, template, parameters)
            .await?;

        let change_set_id = match outcome {
            ChangeSetOutcome::NoChanges => {
                phases.enter(DeployPhase::NoChanges);
                debug!(stack = name, "No changes to deploy");
                return Ok(DeployOutcome {
                    stack_name: name.to_string(),
                    change_set_type,
                    outputs: prepared.into_outputs(),
                    unchanged: true,
                    phases: phases.phases,
                });
            }
            ChangeSetOutcome::Ready { change_set_id } => change_set_id,
        };

        phases.enter(DeployPhase::Ready);
        phases.enter(DeployPhase::Executing);
        let outputs = self
            .execute_change_set(name, &change_set_id, change_set_type)
            .await?;

        phases.enter(DeployPhase::Done);
        info!(stack = name, change_set_type = %change_set_type, "Stack deployed");
        Ok(DeployOutcome {
            stack_name: name.to_string(),
            change_set_type,
            outputs,
            unchanged: false,
            phases: phases.phases,
        })
    }

    /// Reads the template, uploads embedded assets and decides between
    /// an inline body and an uploaded template.
    async fn package(&self, request: &StackDeployRequest) -> Result<(TemplateSource, Parameters)> {
        let config = self.ctx.config();
        let body = match &request.template {
            TemplateInput::Body(body) => body.clone(),
            TemplateInput::Path(path) => {
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| StackflowError::Io {
                        path: path.clone(),
                        source,
                    })?
            }
        };

        let prefix = config.stack_prefix(&request.stack_name);
        let mut parameters = request.parameters.clone();
        self.packager
            .inject_assets(&request.assets, &prefix, &mut parameters)
            .await?;
        let template = self
            .packager
            .prepare_template(body, &prefix, config.inline_template_limit)
            .await?;
        Ok((template, parameters))
    }

    async fn prepare(
        &self,
        name: &str,
        foundational: bool,
        phases: &mut PhaseLog<'_>,
    ) -> Result<PreparedStack> {
        let stack = self.waiter.wait(name, &WaitOptions::any_terminal()).await?;

        match stack.status {
            StackStatus::DeleteComplete => Ok(PreparedStack::Absent),
            StackStatus::UpdateRollbackFailed => Err(StackflowError::UnrecoverableStack {
                stack: name.to_string(),
                status: stack.status,
            }),
            status if status.requires_delete() => {
                phases.enter(DeployPhase::BlockedNeedsDelete);
                if foundational {
                    warn!(stack = name, %status, "Foundation stack cannot be updated");
                    return Err(StackflowError::TeardownRequired {
                        stack: name.to_string(),
                        status,
                    });
                }
                warn!(stack = name, %status, "Deleting stack before recreating it");
                self.delete_stack(name).await?;
                phases.enter(DeployPhase::NoStack);
                Ok(PreparedStack::Absent)
            }
            status => Ok(PreparedStack::Existing {
                status,
                outputs: stack.flat_outputs(),
            }),
        }
    }

    /// Submits a change set and polls it until it is computed.
    ///
    /// An empty change set is deleted and reported as
    /// [`ChangeSetOutcome::NoChanges`].
    pub async fn create_change_set(
        &self,
        name: &str,
        change_set_type: ChangeSetType,
        template: TemplateSource,
        parameters: Parameters,
    ) -> Result<ChangeSetOutcome> {
        let config = self.ctx.config();
        let backend = self.ctx.backend();
        let request = ChangeSetRequest {
            stack_name: name.to_string(),
            change_set_name: change_set_name(name, Utc::now()),
            change_set_type,
            template,
            parameters,
            tags: config.stack_tags(name),
            client_token: Uuid::new_v4().to_string(),
        };

        let change_set_id = backend
            .create_change_set(&request)
            .await
            .map_err(|e| StackflowError::backend("CreateChangeSet", name, e))?;
        info!(
            stack = name,
            change_set = %request.change_set_name,
            change_set_type = %change_set_type,
            "Created change set"
        );

        loop {
            let change_set = backend
                .describe_change_set(&change_set_id)
                .await
                .map_err(|e| StackflowError::backend("DescribeChangeSet", name, e))?;

            if change_set.status.is_pending() {
                tokio::time::sleep(config.change_set_poll_interval()).await;
                continue;
            }
            if change_set.status == ChangeSetStatus::CreateComplete {
                return Ok(ChangeSetOutcome::Ready { change_set_id });
            }

            let reason = change_set.status_reason.unwrap_or_default();
            if is_no_changes(&reason) {
                if !change_set.status.is_deleted() {
                    backend
                        .delete_change_set(&change_set_id)
                        .await
                        .map_err(|e| StackflowError::backend("DeleteChangeSet", name, e))?;
                }
                return Ok(ChangeSetOutcome::NoChanges);
            }

            let reason = if reason.is_empty() {
                format!("change set ended in {}", change_set.status)
            } else {
                reason
            };
            return Err(StackflowError::ChangeSetFailed {
                stack: name.to_string(),
                reason,
            });
        }
    }

    async fn execute_change_set(
        &self,
        name: &str,
        change_set_id: &str,
        change_set_type: ChangeSetType,
    ) -> Result<Outputs> {
        let since = Utc::now();
        self.ctx
            .backend()
            .execute_change_set(change_set_id)
            .await
            .map_err(|e| StackflowError::backend("ExecuteChangeSet", name, e))?;
        info!(stack = name, "Executing change set");

        let options = WaitOptions::until(change_set_type.success_status()).since(since);
        let stack = self.waiter.wait(name, &options).await?;
        Ok(stack.flat_outputs())
    }

    /// Deletes a stack and waits until it is gone.
    pub async fn delete_stack(&self, name: &str) -> Result<()> {
        let since = Utc::now();
        self.ctx
            .backend()
            .delete_stack(name)
            .await
            .map_err(|e| StackflowError::backend("DeleteStack", name, e))?;

        let options = WaitOptions::until(StackStatus::DeleteComplete).since(since);
        self.waiter.wait(name, &options).await?;
        info!(stack = name, "Stack deleted");
        self.ctx.emit(DeployEvent::StackDeleted {
            stack: name.to_string(),
        });
        Ok(())
    }
}

/// Returns true if a change set status reason means "nothing to do".
#[must_use]
pub fn is_no_changes(reason: &str) -> bool {
    NO_CHANGES_MARKERS.iter().any(|m| reason.contains(m))
}

/// Builds a change set name unique per stack and second.
#[must_use]
pub fn change_set_name(stack_name: &str, at: DateTime<Utc>) -> String {
    format!("{stack_name}-{}", at.format("%Y%m%d%H%M%S"))
}
