//! Stack definitions and the dependency graph between them.

use crate::assets::EmbeddedAsset;
use crate::changeset::TemplateInput;
use crate::core::Parameters;
use crate::errors::{CycleDetectedError, PlanValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// One stack of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDefinition {
    /// Stack name.
    pub name: String,
    /// Template to apply.
    pub template: TemplateInput,
    /// Parameters set explicitly. They win over dependency outputs.
    #[serde(default)]
    pub parameters: Parameters,
    /// Local artifacts uploaded for this stack.
    #[serde(default)]
    pub assets: Vec<EmbeddedAsset>,
    /// Stacks whose outputs this stack consumes.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl StackDefinition {
    /// Creates a definition for a template file.
    #[must_use]
    pub fn from_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(name, TemplateInput::Path(path.into()))
    }

    /// Creates a definition for a template held in memory.
    #[must_use]
    pub fn from_body(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(name, TemplateInput::Body(body.into()))
    }

    fn new(name: impl Into<String>, template: TemplateInput) -> Self {
        Self {
            name: name.into(),
            template,
            parameters: Parameters::new(),
            assets: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    /// Sets one parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Adds an embedded asset.
    #[must_use]
    pub fn with_asset(mut self, asset: EmbeddedAsset) -> Self {
        self.assets.push(asset);
        self
    }

    /// Adds dependencies.
    #[must_use]
    pub fn depends_on(mut self, stacks: &[&str]) -> Self {
        self.depends_on
            .extend(stacks.iter().map(|s| (*s).to_string()));
        self
    }
}

/// A validated set of stacks, grouped into dependency waves.
///
/// Every stack of a wave depends only on stacks of earlier waves, so the
/// stacks of one wave can be deployed concurrently.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    stacks: Vec<StackDefinition>,
    index: HashMap<String, usize>,
    waves: Vec<Vec<String>>,
}

impl DeploymentPlan {
    /// Validates the definitions and computes the waves.
    ///
    /// Rejects empty plans, duplicate names, unknown dependencies and cycles.
    pub fn new(stacks: Vec<StackDefinition>) -> Result<Self, PlanValidationError> {
        if stacks.is_empty() {
            return Err(PlanValidationError::new("Deployment plan has no stacks"));
        }

        let mut index = HashMap::with_capacity(stacks.len());
        for (i, stack) in stacks.iter().enumerate() {
            if stack.name.trim().is_empty() {
                return Err(PlanValidationError::new("Stack names must not be empty"));
            }
            if index.insert(stack.name.clone(), i).is_some() {
                return Err(PlanValidationError::new(format!(
                    "Stack '{}' is defined more than once",
                    stack.name
                ))
                .with_stacks(vec![stack.name.clone()]));
            }
        }

        for stack in &stacks {
            for dep in &stack.depends_on {
                if !index.contains_key(dep) {
                    return Err(PlanValidationError::new(format!(
                        "Stack '{}' depends on unknown stack '{dep}'",
                        stack.name
                    ))
                    .with_stacks(vec![stack.name.clone(), dep.clone()]));
                }
            }
        }

        let mut plan = Self {
            stacks,
            index,
            waves: Vec::new(),
        };
        plan.detect_cycles()?;
        plan.waves = plan.compute_waves();
        Ok(plan)
    }

    /// Returns a stack definition by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StackDefinition> {
        self.index.get(name).map(|&i| &self.stacks[i])
    }

    /// Returns the definitions in declaration order.
    #[must_use]
    pub fn stacks(&self) -> &[StackDefinition] {
        &self.stacks
    }

    /// Returns the dependency waves, earliest first.
    #[must_use]
    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    /// Number of stacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    /// Always false for a validated plan.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    /// The stack everything else builds on: the first stack of the first wave.
    #[must_use]
    pub fn foundation(&self) -> Option<&str> {
        self.waves
            .first()
            .and_then(|wave| wave.first())
            .map(String::as_str)
    }

    /// Returns the order in which stacks can be deleted: dependents first.
    #[must_use]
    pub fn teardown_waves(&self) -> Vec<Vec<String>> {
        self.waves.iter().rev().cloned().collect()
    }

    fn detect_cycles(&self) -> Result<(), CycleDetectedError> {
        let mut visited = HashSet::new();
        let mut on_path = HashSet::new();
        let mut path = Vec::new();

        for stack in &self.stacks {
            if !visited.contains(stack.name.as_str()) {
                if let Some(cycle) = self.dfs_cycle(&stack.name, &mut visited, &mut on_path, &mut path) {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }
        Ok(())
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        on_path: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        on_path.insert(node);
        path.push(node);

        if let Some(stack) = self.get(node) {
            for dep in &stack.depends_on {
                if on_path.contains(dep.as_str()) {
                    let start = path.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(|s| (*s).to_string()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                if !visited.contains(dep.as_str()) {
                    if let Some(cycle) = self.dfs_cycle(dep, visited, on_path, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        on_path.remove(node);
        None
    }

    /// Layers the graph: a stack's wave is one past the latest wave of its
    /// dependencies. Within a wave, declaration order is kept.
    fn compute_waves(&self) -> Vec<Vec<String>> {
        fn visit<'a>(plan: &'a DeploymentPlan, name: &'a str, level: &mut HashMap<&'a str, usize>) -> usize {
            if let Some(&l) = level.get(name) {
                return l;
            }
            let l = plan.get(name).map_or(0, |stack| {
                stack
                    .depends_on
                    .iter()
                    .map(|dep| visit(plan, dep, level) + 1)
                    .max()
                    .unwrap_or(0)
            });
            level.insert(name, l);
            l
        }

        let mut level: HashMap<&str, usize> = HashMap::with_capacity(self.stacks.len());

        for stack in &self.stacks {
            visit(self, &stack.name, &mut level);
        }

        let depth = level.values().copied().max().map_or(0, |d| d + 1);
        let mut waves = vec![Vec::new(); depth];
        for stack in &self.stacks {
            if let Some(&l) = level.get(stack.name.as_str()) {
                waves[l].push(stack.name.clone());
            }
        }
        waves
    }
}
