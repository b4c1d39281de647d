//! The instrumentation session: attach recorders, run one step, detach.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::ProfilerConfig;
use crate::error::{ProfilerError, Result};
use crate::hooks::{recorder, HookHandle};
use crate::record::{HookPhase, MemoryLog};
use crate::snapshot::DeviceMemory;
use crate::{Batch, Model, Optimizer};

/// Profiles GPU memory across one training step.
///
/// A profiler owns a snapshot source and a [`ProfilerConfig`]; each call to
/// [`profile_step`](Self::profile_step) is one self-contained session that
/// walks the model's module tree, installs one recording hook per lifecycle
/// point per module, runs exactly one zero-grad/forward/backward/step cycle
/// and detaches every hook before returning, whatever the outcome.
pub struct MemoryProfiler {
    device: Arc<dyn DeviceMemory>,
    config: ProfilerConfig,
}

impl MemoryProfiler {
    /// Creates a profiler with the default configuration.
    pub fn new(device: impl DeviceMemory + 'static) -> Self {
        Self {
            device: Arc::new(device),
            config: ProfilerConfig::default(),
        }
    }

    /// Creates a profiler with an explicit configuration.
    ///
    /// # Errors
    ///
    /// [`ProfilerError::Config`] when the configuration is invalid.
    pub fn with_config(
        device: impl DeviceMemory + 'static,
        config: ProfilerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            device: Arc::new(device),
            config,
        })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Runs one instrumented training step, appending records to `log`.
    ///
    /// `exp` labels every record this session appends; when `None`, the
    /// label is derived from the number of records already in the log
    /// (`"{prefix}_{n}"`), so repeated calls against a growing shared log
    /// get distinct labels without caller bookkeeping.
    ///
    /// Hooks installed by this session never outlive it: they are detached
    /// on every exit path before the step's result is surfaced, including
    /// when the step panics (the panic is resumed after cleanup). On
    /// failure the records appended before the failure point stay in
    /// `log`; there is no rollback.
    ///
    /// # Errors
    ///
    /// The step's own error, unchanged, when forward/backward/optimizer
    /// fails; [`ProfilerError::HookCallback`] when hooks failed to snapshot
    /// and [`ProfilerConfig::strict_hooks`] is set.
    pub fn profile_step<M, O, B>(
        &self,
        model: &mut M,
        optimizer: &mut O,
        batch: &B,
        log: &mut MemoryLog,
        exp: Option<&str>,
    ) -> Result<()>
    where
        B: Batch,
        M: Model<B>,
        O: Optimizer<M, B>,
    {
        let exp: Arc<str> = match exp {
            Some(exp) => Arc::from(exp),
            None => Arc::from(
                format!("{}_{}", self.config.experiment_prefix, log.len()).as_str(),
            ),
        };

        let shared = Arc::new(Mutex::new(std::mem::take(log)));
        let failures = Arc::new(AtomicUsize::new(0));

        let handles = self.attach_recorders(model, &shared, &exp, &failures);
        debug!(modules = handles.len(), exp = %exp, "attached memory recording hooks");

        // Catch unwinds as well as errors: a panicking forward/backward
        // must not leak hooks or strand the caller's log inside the Arc.
        let step = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            run_one_step(model, optimizer, batch)
        }));

        // Release every hook before surfacing the step result, so leaked
        // closures can never keep appending to the caller's log.
        detach_recorders(model, &handles);

        // Hand the log back to the caller on every path; a failed step
        // keeps its partial records.
        *log = match Arc::try_unwrap(shared) {
            Ok(inner) => inner.into_inner(),
            Err(shared) => shared.lock().clone(),
        };

        match step {
            Ok(result) => result?,
            Err(payload) => std::panic::resume_unwind(payload),
        }

        let failed = failures.load(Ordering::Relaxed);
        if failed > 0 {
            warn!(failures = failed, exp = %exp, "recording hooks failed during step");
            if self.config.strict_hooks {
                return Err(ProfilerError::HookCallback { failures: failed });
            }
        }

        debug!(records = log.len(), exp = %exp, "profiling step complete");
        Ok(())
    }

    /// Walks the module tree in traversal order, installing one recorder
    /// per lifecycle point per module. Returns the handles grouped by
    /// traversal position.
    fn attach_recorders<M, B>(
        &self,
        model: &mut M,
        shared: &crate::hooks::SharedLog,
        exp: &Arc<str>,
        failures: &Arc<AtomicUsize>,
    ) -> Vec<Vec<HookHandle>>
    where
        B: Batch,
        M: Model<B>,
    {
        let mut handles: Vec<Vec<HookHandle>> = Vec::new();
        model.visit_modules(&mut |module| {
            let layer_idx = handles.len();
            let module_handles = HookPhase::ALL
                .iter()
                .map(|&phase| {
                    let hook = recorder(
                        Arc::clone(shared),
                        layer_idx,
                        phase,
                        Arc::clone(exp),
                        Arc::clone(&self.device),
                        Arc::clone(failures),
                    );
                    module.hooks().register(phase, hook)
                })
                .collect();
            handles.push(module_handles);
        });
        handles
    }
}

/// Removes the session's hooks, relying on the traversal being
/// deterministic: position `i` in a second walk is the module that got
/// `handles[i]` in the first.
fn detach_recorders<M, B>(model: &mut M, handles: &[Vec<HookHandle>])
where
    B: Batch,
    M: Model<B>,
{
    let mut pos = 0usize;
    model.visit_modules(&mut |module| {
        if let Some(module_handles) = handles.get(pos) {
            for handle in module_handles {
                module.hooks().remove(handle);
            }
        }
        pos += 1;
    });
}

/// Exactly one optimization step: zero-grad, forward, backward, update.
fn run_one_step<M, O, B>(model: &mut M, optimizer: &mut O, batch: &B) -> Result<()>
where
    B: Batch,
    M: Model<B>,
    O: Optimizer<M, B>,
{
    optimizer.zero_grad();
    let loss = model.forward(batch)?;
    debug!(loss, "forward pass complete");
    model.backward()?;
    optimizer.step(model)?;
    Ok(())
}
