//! Deployment configuration.

use crate::core::Tag;
use crate::errors::{Result, StackflowError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest template body the engine accepts inline, in bytes.
pub const INLINE_TEMPLATE_LIMIT: usize = 51_200;

/// Configuration shared by every component of a deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Application identity, applied as a tag to every stack.
    #[serde(default = "default_application")]
    pub application: String,
    /// Product edition, applied as a tag to every stack.
    #[serde(default = "default_edition")]
    pub edition: String,
    /// Version string being deployed.
    #[serde(default = "default_version")]
    pub version: String,
    /// Bucket receiving large templates and artifacts.
    #[serde(default)]
    pub artifact_bucket: String,
    /// Key prefix for uploaded objects; the stack name is appended per stack.
    #[serde(default = "default_asset_prefix")]
    pub asset_prefix: String,
    /// Delay between stack status checks, in milliseconds.
    #[serde(default = "default_stack_poll_ms")]
    pub stack_poll_ms: u64,
    /// Delay between change set status checks, in milliseconds.
    #[serde(default = "default_change_set_poll_ms")]
    pub change_set_poll_ms: u64,
    /// Minimum delay between two "still waiting" messages, in milliseconds.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Maximum number of stacks deployed at the same time within a wave.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Templates larger than this are uploaded instead of sent inline.
    #[serde(default = "default_inline_template_limit")]
    pub inline_template_limit: usize,
    /// Allows tearing down the whole deployment when the foundation stack is broken.
    #[serde(default)]
    pub allow_full_teardown: bool,
}

fn default_application() -> String {
    "stackflow".to_string()
}

fn default_edition() -> String {
    "standard".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_asset_prefix() -> String {
    "assets".to_string()
}

fn default_stack_poll_ms() -> u64 {
    5_000
}

fn default_change_set_poll_ms() -> u64 {
    2_000
}

fn default_progress_interval_ms() -> u64 {
    120_000
}

fn default_max_parallel() -> usize {
    8
}

fn default_inline_template_limit() -> usize {
    INLINE_TEMPLATE_LIMIT
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            application: default_application(),
            edition: default_edition(),
            version: default_version(),
            artifact_bucket: String::new(),
            asset_prefix: default_asset_prefix(),
            stack_poll_ms: default_stack_poll_ms(),
            change_set_poll_ms: default_change_set_poll_ms(),
            progress_interval_ms: default_progress_interval_ms(),
            max_parallel: default_max_parallel(),
            inline_template_limit: default_inline_template_limit(),
            allow_full_teardown: false,
        }
    }
}

impl DeployConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| StackflowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| StackflowError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Checks the values that would otherwise fail late in a run.
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(StackflowError::Config(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        if self.version.trim().is_empty() {
            return Err(StackflowError::Config("version must not be empty".to_string()));
        }
        Ok(())
    }

    /// Sets the application name.
    #[must_use]
    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = application.into();
        self
    }

    /// Sets the version being deployed.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the artifact bucket.
    #[must_use]
    pub fn with_artifact_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.artifact_bucket = bucket.into();
        self
    }

    /// Sets both poll intervals.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self.stack_poll_ms = ms;
        self.change_set_poll_ms = ms;
        self
    }

    /// Sets the progress report interval.
    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the maximum number of concurrent stack deployments.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Sets the inline template limit.
    #[must_use]
    pub fn with_inline_template_limit(mut self, limit: usize) -> Self {
        self.inline_template_limit = limit;
        self
    }

    /// Allows or forbids tearing down the whole deployment.
    #[must_use]
    pub fn with_full_teardown(mut self, allow: bool) -> Self {
        self.allow_full_teardown = allow;
        self
    }

    /// Gets the stack poll interval as Duration.
    #[must_use]
    pub fn stack_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stack_poll_ms)
    }

    /// Gets the change set poll interval as Duration.
    #[must_use]
    pub fn change_set_poll_interval(&self) -> Duration {
        Duration::from_millis(self.change_set_poll_ms)
    }

    /// Gets the progress interval as Duration.
    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Returns the key prefix for objects uploaded on behalf of a stack.
    #[must_use]
    pub fn stack_prefix(&self, stack_name: &str) -> String {
        format!("{}/{stack_name}", self.asset_prefix.trim_end_matches('/'))
    }

    /// Returns the tags applied to a stack.
    #[must_use]
    pub fn stack_tags(&self, stack_name: &str) -> Vec<Tag> {
        vec![
            Tag::new("Application", &self.application),
            Tag::new("Edition", &self.edition),
            Tag::new("Version", &self.version),
            Tag::new("StackName", stack_name),
        ]
    }
}
