//! Profiler configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ProfilerError, Result};

/// Configuration for a [`MemoryProfiler`](crate::MemoryProfiler).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilerConfig {
    /// Surface recording-hook failures as an error after the step.
    ///
    /// Hooks never abort the instrumented step itself; with this flag set,
    /// a session whose hooks failed to snapshot returns
    /// [`ProfilerError::HookCallback`] once the step has finished and every
    /// hook has been detached. Default `false` (log and continue).
    pub strict_hooks: bool,

    /// Prefix for derived experiment identifiers.
    ///
    /// When no explicit identifier is given, a session labels its records
    /// `"{prefix}_{n}"` where `n` is the number of records already in the
    /// log. Default `"exp"`.
    pub experiment_prefix: String,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            strict_hooks: false,
            experiment_prefix: "exp".to_string(),
        }
    }
}

impl ProfilerConfig {
    /// Returns a builder with default values.
    #[must_use]
    pub fn builder() -> ProfilerConfigBuilder {
        ProfilerConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// [`ProfilerError::Config`] when the experiment prefix is empty.
    pub fn validate(&self) -> Result<()> {
        if self.experiment_prefix.is_empty() {
            return Err(ProfilerError::Config {
                detail: "experiment_prefix must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`ProfilerConfig`].
#[derive(Debug, Default)]
pub struct ProfilerConfigBuilder {
    strict_hooks: bool,
    experiment_prefix: Option<String>,
}

impl ProfilerConfigBuilder {
    /// Sets whether hook failures are surfaced after the step.
    #[must_use]
    pub fn strict_hooks(mut self, strict: bool) -> Self {
        self.strict_hooks = strict;
        self
    }

    /// Sets the prefix for derived experiment identifiers.
    #[must_use]
    pub fn experiment_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.experiment_prefix = Some(prefix.into());
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ProfilerConfig {
        ProfilerConfig {
            strict_hooks: self.strict_hooks,
            experiment_prefix: self
                .experiment_prefix
                .unwrap_or_else(|| "exp".to_string()),
        }
    }
}
