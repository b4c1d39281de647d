//! Error types for memory profiling sessions.
//!
//! The taxonomy is deliberately small: a missing device is fatal and never
//! retried, a failed training step is re-raised to the caller after hook
//! cleanup, and a failed recording hook is only surfaced when the caller
//! opted into strict mode. There is no retry logic anywhere in this crate;
//! profiling is a single deterministic pass.

use thiserror::Error;

/// The main error type for memory profiling.
#[derive(Debug, Error)]
pub enum ProfilerError {
    /// No usable memory-reporting device at snapshot time.
    ///
    /// Surfaced immediately rather than returning zero counts, so callers
    /// never mistake "no device" for "no usage."
    #[error("no usable memory-reporting device: {detail}")]
    DeviceUnavailable {
        /// What went wrong while reaching the device.
        detail: String,
    },

    /// Forward/backward/optimizer failure during the instrumented step.
    ///
    /// Not recovered locally: hooks are still released, then this error is
    /// propagated to the caller unchanged.
    #[error("training step failed: {detail}")]
    StepExecution {
        /// Description of the step failure.
        detail: String,
    },

    /// One or more recording hooks failed during the step.
    ///
    /// Only returned when [`ProfilerConfig::strict_hooks`] is set; the
    /// default policy is to log and continue, since instrumentation must
    /// stay transparent to the model's correctness.
    ///
    /// [`ProfilerConfig::strict_hooks`]: crate::config::ProfilerConfig
    #[error("{failures} recording hook invocation(s) failed during the step")]
    HookCallback {
        /// Number of hook invocations that failed.
        failures: usize,
    },

    /// Invalid profiler configuration.
    #[error("invalid profiler configuration: {detail}")]
    Config {
        /// Description of the configuration issue.
        detail: String,
    },
}

impl ProfilerError {
    /// Shorthand for a [`ProfilerError::StepExecution`] error.
    ///
    /// Intended for [`Model`](crate::Model) and [`Optimizer`](crate::Optimizer)
    /// implementations reporting failures out of the instrumented step.
    pub fn step(detail: impl Into<String>) -> Self {
        Self::StepExecution {
            detail: detail.into(),
        }
    }

    /// Shorthand for a [`ProfilerError::DeviceUnavailable`] error.
    pub fn device_unavailable(detail: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            detail: detail.into(),
        }
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, ProfilerError>;
