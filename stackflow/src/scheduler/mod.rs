//! Deploys a whole plan of stacks.
//!
//! Stacks are deployed wave by wave. The stacks of a wave run concurrently,
//! bounded by `max_parallel`, and the next wave starts only once every stack of
//! the current one has settled. A failed stack never stops its siblings; the
//! stacks that depend on it are skipped and everything is reported together.
//! Stacks that succeeded stay deployed.

mod plan;
mod task_group;

pub use plan::{DeploymentPlan, StackDefinition};
pub use task_group::{BoundedTaskGroup, TaskResult};

use crate::changeset::{ChangeSetEngine, DeployOutcome, StackDeployRequest};
use crate::context::DeployContext;
use crate::core::{Outputs, Parameters};
use crate::errors::{PlanValidationError, Result, StackFailure, StackflowError};
use crate::events::DeployEvent;
use crate::waiter::StackStatusWaiter;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// What a deployment run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentReport {
    /// Flattened outputs of every stack that is deployed after the run.
    pub outputs: BTreeMap<String, Outputs>,
    /// Stacks whose change set was empty.
    pub unchanged: Vec<String>,
    /// Stacks that failed, with their error.
    pub failures: Vec<StackFailure>,
    /// Stacks not attempted because a dependency failed.
    pub skipped: Vec<String>,
}

impl DeploymentReport {
    /// Returns true if every stack was deployed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }

    /// Returns the outputs of one stack.
    #[must_use]
    pub fn outputs_of(&self, stack: &str) -> Option<&Outputs> {
        self.outputs.get(stack)
    }

    fn is_blocked(&self, stack: &str) -> bool {
        self.skipped.iter().any(|s| s == stack) || self.failures.iter().any(|f| f.stack == stack)
    }

    /// Returns the outputs, or a combined error naming every stack that was
    /// not deployed.
    pub fn into_result(self) -> Result<BTreeMap<String, Outputs>> {
        if self.is_success() {
            return Ok(self.outputs);
        }
        let mut failures = self.failures;
        failures.extend(
            self.skipped
                .into_iter()
                .map(|stack| StackFailure::new(stack, "skipped because a dependency failed")),
        );
        Err(StackflowError::DeploymentFailed { failures })
    }
}

/// Deploys plans of stacks.
#[derive(Debug, Clone)]
pub struct DeploymentScheduler {
    ctx: DeployContext,
    engine: ChangeSetEngine,
}

impl DeploymentScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(ctx: DeployContext) -> Self {
        Self {
            engine: ChangeSetEngine::new(ctx.clone()),
            ctx,
        }
    }

    /// Deploys every stack of the plan.
    ///
    /// Stack failures are collected in the report. An `Err` is returned only
    /// when the run could not proceed at all, e.g. because the foundation stack
    /// is broken and a full teardown was not allowed.
    pub async fn deploy(&self, plan: &DeploymentPlan) -> Result<DeploymentReport> {
        match self.deploy_once(plan).await {
            Err(StackflowError::TeardownRequired { stack, status })
                if self.ctx.config().allow_full_teardown =>
            {
                warn!(
                    stack = %stack,
                    %status,
                    "Foundation stack is broken, tearing down the whole deployment"
                );
                self.teardown(plan).await?;
                self.deploy_once(plan).await
            }
            other => other,
        }
    }

    async fn deploy_once(&self, plan: &DeploymentPlan) -> Result<DeploymentReport> {
        let total = plan.len();
        let foundation = plan.foundation();
        let mut report = DeploymentReport::default();
        let mut completed = 0;

        info!(stacks = total, waves = plan.waves().len(), "Starting deployment");

        for wave in plan.waves() {
            let mut group = BoundedTaskGroup::new(self.ctx.config().max_parallel);

            for name in wave {
                let Some(definition) = plan.get(name) else {
                    continue;
                };
                if let Some(blocked) = definition.depends_on.iter().find(|d| report.is_blocked(d)) {
                    completed += 1;
                    warn!(stack = %name, dependency = %blocked, "({completed}/{total}) Skipping stack");
                    self.ctx.emit(DeployEvent::StackSkipped {
                        stack: name.clone(),
                        reason: format!("dependency '{blocked}' was not deployed"),
                    });
                    self.ctx.emit(DeployEvent::Progress {
                        completed,
                        total,
                        stack: name.clone(),
                    });
                    report.skipped.push(name.clone());
                    continue;
                }

                let request = request_for(definition, &report.outputs, foundation == Some(name.as_str()));
                let engine = self.engine.clone();
                self.ctx.emit(DeployEvent::StackStarted {
                    stack: name.clone(),
                });
                group.spawn(name.clone(), async move { engine.deploy_stack(&request).await });
            }

            let results = group
                .join(|_, result| {
                    completed += 1;
                    let status = if result.result.is_ok() { "deployed" } else { "failed" };
                    info!(stack = %result.label, "({completed}/{total}) Stack {status}");
                    self.ctx.emit(DeployEvent::Progress {
                        completed,
                        total,
                        stack: result.label.clone(),
                    });
                })
                .await;

            let mut teardown = None;
            for TaskResult { label, result } in results {
                match result {
                    Ok(outcome) => self.record_success(&mut report, label, outcome),
                    Err(e) => {
                        error!(stack = %label, error = %e, "Stack deployment failed");
                        self.ctx.emit(DeployEvent::StackFailed {
                            stack: label.clone(),
                            error: e.to_string(),
                        });
                        report.failures.push(StackFailure::new(label, e.to_string()));
                        if matches!(e, StackflowError::TeardownRequired { .. }) {
                            teardown = Some(e);
                        }
                    }
                }
            }
            if let Some(e) = teardown {
                return Err(e);
            }
        }

        if report.is_success() {
            info!(stacks = total, "Deployment finished");
        } else {
            error!(
                failed = report.failures.len(),
                skipped = report.skipped.len(),
                "Deployment finished with failures"
            );
        }
        Ok(report)
    }

    fn record_success(&self, report: &mut DeploymentReport, stack: String, outcome: DeployOutcome) {
        self.ctx.emit(DeployEvent::StackCompleted {
            stack: stack.clone(),
            unchanged: outcome.unchanged,
        });
        if outcome.unchanged {
            report.unchanged.push(stack.clone());
        }
        report.outputs.insert(stack, outcome.outputs);
    }

    /// Deploys one stack of the plan using the current outputs of its
    /// dependencies, leaving every other stack alone.
    ///
    /// Refuses to run until the foundation stack and every dependency are
    /// deployed, so the foundation itself can only be redeployed this way.
    pub async fn deploy_single(&self, plan: &DeploymentPlan, stack: &str) -> Result<DeployOutcome> {
        let definition = plan.get(stack).ok_or_else(|| {
            PlanValidationError::new(format!("Unknown stack '{stack}'")).with_stacks(vec![stack.to_string()])
        })?;
        let foundation = plan.foundation();

        // The foundation is required even when it is the stack being deployed:
        // a first bootstrap goes through a full deployment.
        let mut required: Vec<&str> = definition.depends_on.iter().map(String::as_str).collect();
        if let Some(foundation) = foundation {
            if !required.contains(&foundation) {
                required.insert(0, foundation);
            }
        }

        let outputs = self.fetch_outputs(&required).await?;
        if let Some(missing) = required.iter().find(|r| !outputs.contains_key(**r)) {
            return Err(StackflowError::NotBootstrapped {
                stack: stack.to_string(),
                missing: (*missing).to_string(),
            });
        }

        info!(stack, "Deploying single stack");
        let request = request_for(definition, &outputs, foundation == Some(stack));
        let outcome = self.engine.deploy_stack(&request).await?;
        self.ctx.emit(DeployEvent::StackCompleted {
            stack: stack.to_string(),
            unchanged: outcome.unchanged,
        });
        Ok(outcome)
    }

    /// Reads the outputs of deployed stacks.
    ///
    /// Stacks that are absent or not settled on a working configuration are
    /// left out of the result.
    pub async fn fetch_outputs(&self, stacks: &[&str]) -> Result<BTreeMap<String, Outputs>> {
        let waiter = StackStatusWaiter::new(self.ctx.clone());
        let descriptions =
            futures::future::try_join_all(stacks.iter().map(|name| waiter.describe(name))).await?;

        Ok(descriptions
            .into_iter()
            .filter(|d| d.status.is_stable())
            .map(|d| {
                let outputs = d.flat_outputs();
                (d.stack_name, outputs)
            })
            .collect())
    }

    /// Deletes every stack of the plan, dependents first.
    ///
    /// Stacks of one wave are deleted concurrently. Deletion stops after a
    /// wave with failures, since the stacks of earlier waves are still in use.
    pub async fn teardown(&self, plan: &DeploymentPlan) -> Result<()> {
        info!(stacks = plan.len(), "Tearing down deployment");
        let waiter = StackStatusWaiter::new(self.ctx.clone());

        for wave in plan.teardown_waves() {
            let mut group = BoundedTaskGroup::new(self.ctx.config().max_parallel);
            for name in wave {
                let engine = self.engine.clone();
                let waiter = waiter.clone();
                let stack = name.clone();
                group.spawn(name, async move {
                    if waiter.describe(&stack).await?.is_deleted() {
                        return Ok(());
                    }
                    engine.delete_stack(&stack).await
                });
            }

            let failures: Vec<StackFailure> = group
                .join(|_, _| {})
                .await
                .into_iter()
                .filter_map(|r| r.result.err().map(|e| StackFailure::new(r.label, e.to_string())))
                .collect();
            if !failures.is_empty() {
                return Err(StackflowError::DeploymentFailed { failures });
            }
        }
        Ok(())
    }
}

/// Builds the request for one stack: dependency outputs, overridden by the
/// stack's own parameters.
fn request_for(
    definition: &StackDefinition,
    outputs: &BTreeMap<String, Outputs>,
    foundational: bool,
) -> StackDeployRequest {
    let mut parameters = Parameters::new();
    for dep in &definition.depends_on {
        if let Some(dep_outputs) = outputs.get(dep) {
            parameters.extend(dep_outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
    parameters.extend(definition.parameters.iter().map(|(k, v)| (k.clone(), v.clone())));

    StackDeployRequest {
        stack_name: definition.name.clone(),
        template: definition.template.clone(),
        parameters,
        assets: definition.assets.clone(),
        foundational,
    }
}

#[cfg(test)]
mod tests;
