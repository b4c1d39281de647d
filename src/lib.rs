//! # memprof-rs
//!
//! Per-layer GPU memory profiling for a single training step.
//!
//! The profiler walks a model's module tree, installs one observational
//! hook at each of three lifecycle points per module (`pre`-forward,
//! post-`fwd`, post-`bwd`), runs exactly one zero-grad → forward →
//! backward → optimizer-step cycle, and appends one [`MemoryRecord`] per
//! hook firing to an append-only [`MemoryLog`]. Every record carries the
//! module's traversal index, a per-experiment firing-order counter, the
//! module's concrete type name and the device's allocated/cached byte
//! counts, which is enough to localize the layer responsible for peak
//! memory during training.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use memprof_rs::prelude::*;
//! use memprof_rs::NvidiaSmiMemory;
//!
//! let profiler = MemoryProfiler::new(NvidiaSmiMemory::new(0));
//! let mut log = MemoryLog::new();
//!
//! // One instrumented step; the log fills with 3 records per module.
//! profiler.profile_step(&mut model, &mut optimizer, &batch, &mut log, None)?;
//!
//! // A second run against the same log gets a fresh experiment label.
//! profiler.profile_step(&mut model, &mut optimizer, &batch, &mut log, None)?;
//!
//! if let Some(peak) = log.peak_allocated() {
//!     println!("peak {} bytes at {} ({})", peak.mem_all, peak.layer_type, peak.hook_type);
//! }
//! ```
//!
//! ## The framework seam
//!
//! The profiler is framework-agnostic: it only needs the [`Model`],
//! [`Optimizer`], [`Batch`] and [`Module`] traits below. A model exposes
//! its module tree through [`Model::visit_modules`] (depth-first,
//! pre-order, deterministic); each module embeds a [`HookSet`] and fires
//! it from its own forward/backward code. Hooks are removed via the
//! [`HookHandle`] tokens the session keeps, never by garbage collection,
//! and a session detaches all of its hooks on every exit path.
//!
//! ## Feature flags
//!
//! - `candle` enables [`CandleDeviceMemory`], a snapshot source wrapper
//!   issuing an explicit `candle_core::Device::synchronize()` barrier
//!   before reading counters.
//!
//! ## Concurrency
//!
//! Sessions are single-threaded and synchronous. A log may be shared
//! across *sequential* sessions to compare experiments; concurrent
//! sessions over one log are unsupported and would corrupt the `call_idx`
//! sequencing invariant.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod hooks;
pub mod record;
pub mod session;
pub mod snapshot;

pub use config::{ProfilerConfig, ProfilerConfigBuilder};
pub use error::{ProfilerError, Result};
pub use hooks::{HookFn, HookHandle, HookSet, SharedLog};
pub use record::{HookPhase, MemoryLog, MemoryRecord};
pub use session::MemoryProfiler;
#[cfg(feature = "candle")]
pub use snapshot::CandleDeviceMemory;
pub use snapshot::{DeviceMemory, MemSnapshot, NvidiaSmiMemory};

/// Batch of training data fed to the model for the instrumented step.
pub trait Batch: Send + Sync {
    /// Number of samples in the batch.
    fn batch_size(&self) -> usize;
}

/// One node in a model's module tree.
///
/// Implementations embed a [`HookSet`] and fire it from their own
/// computation: [`HookPhase::Pre`] immediately before the forward
/// computation, [`HookPhase::Fwd`] immediately after it completes, and
/// [`HookPhase::Bwd`] after the module's gradient computation during the
/// backward pass. Each firing passes the module's own [`type_name`].
///
/// [`type_name`]: Module::type_name
pub trait Module {
    /// Concrete type name of this module, recorded as `layer_type`.
    fn type_name(&self) -> &'static str;

    /// The module's hook registry.
    fn hooks(&mut self) -> &mut HookSet;

    /// Direct children, in structural order.
    fn children_mut(&mut self) -> Vec<&mut dyn Module> {
        Vec::new()
    }
}

/// Visits `root` and its descendants depth-first, pre-order.
///
/// This is the traversal a [`Model`] whose root is itself a [`Module`]
/// should delegate [`Model::visit_modules`] to.
pub fn walk_modules(root: &mut dyn Module, f: &mut dyn FnMut(&mut dyn Module)) {
    f(&mut *root);
    for child in root.children_mut() {
        walk_modules(child, &mut *f);
    }
}

/// Trait for models that can be profiled.
///
/// Mirrors the forward/backward split of a training framework: `forward`
/// runs the full forward pass and returns the scalar loss, `backward`
/// propagates gradients for the most recent forward pass. Both drive the
/// hook firings described on [`Module`].
pub trait Model<B: Batch>: Send {
    /// Runs the forward pass and returns the loss.
    ///
    /// # Errors
    ///
    /// [`ProfilerError::StepExecution`] on forward failure (shape
    /// mismatch, device OOM, ...).
    fn forward(&mut self, batch: &B) -> Result<f32>;

    /// Propagates gradients for the most recent forward pass.
    ///
    /// Modules fire their [`HookPhase::Bwd`] hooks here, in reverse of
    /// the forward traversal.
    ///
    /// # Errors
    ///
    /// [`ProfilerError::StepExecution`] on backward failure.
    fn backward(&mut self) -> Result<()>;

    /// Visits every module in a fixed, deterministic depth-first
    /// pre-order traversal.
    ///
    /// The profiler assigns `layer_idx` in this order and relies on a
    /// second walk visiting the same modules at the same positions.
    fn visit_modules(&mut self, f: &mut dyn FnMut(&mut dyn Module));
}

/// Trait for optimizers updating a profiled model.
pub trait Optimizer<M, B>: Send
where
    B: Batch,
    M: Model<B>,
{
    /// Clears previously accumulated gradients.
    fn zero_grad(&mut self);

    /// Applies one parameter update.
    ///
    /// # Errors
    ///
    /// [`ProfilerError::StepExecution`] on update failure.
    fn step(&mut self, model: &mut M) -> Result<()>;
}

/// Prelude for convenient imports.
///
/// ```
/// use memprof_rs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Batch, DeviceMemory, HookPhase, HookSet, MemSnapshot, MemoryLog, MemoryProfiler,
        MemoryRecord, Model, Module, Optimizer, ProfilerConfig, ProfilerError, Result,
    };
}
