//! Hook registry and the recording-hook factory.
//!
//! Each module carries a [`HookSet`]: three lifecycle slots (`pre`, `fwd`,
//! `bwd`) holding observational callbacks. Registration hands back a
//! [`HookHandle`] capability token; removal requires the token, never
//! garbage collection. [`recorder`] is the factory producing the memory
//! recording callback a profiling session installs in every slot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::record::{HookPhase, MemoryLog, MemoryRecord};
use crate::snapshot::DeviceMemory;

/// A hook callback, invoked with the type name of the firing module.
///
/// Hooks are observational only: they take no return value and must not
/// alter the computation that fired them.
pub type HookFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Log shared between a session and the hooks it installed.
pub type SharedLog = Arc<Mutex<MemoryLog>>;

/// Opaque ownership token for one attached hook.
///
/// The session that registered the hook owns the handle and is responsible
/// for passing it back to [`HookSet::remove`], whatever the outcome of the
/// instrumented step.
#[derive(Debug)]
pub struct HookHandle {
    phase: HookPhase,
    id: u64,
}

/// Per-module registry with one slot list per lifecycle point.
///
/// Module implementations embed one of these and fire it from their own
/// forward/backward code; see [`Module`](crate::Module).
#[derive(Default)]
pub struct HookSet {
    next_id: u64,
    pre: Vec<(u64, HookFn)>,
    fwd: Vec<(u64, HookFn)>,
    bwd: Vec<(u64, HookFn)>,
}

impl std::fmt::Debug for HookSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSet")
            .field("pre", &self.pre.len())
            .field("fwd", &self.fwd.len())
            .field("bwd", &self.bwd.len())
            .finish()
    }
}

impl HookSet {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook at the given lifecycle point.
    ///
    /// Hooks at one point fire in registration order.
    pub fn register(&mut self, phase: HookPhase, hook: HookFn) -> HookHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.slot_mut(phase).push((id, hook));
        HookHandle { phase, id }
    }

    /// Detaches the hook the handle refers to.
    ///
    /// Returns `false` if the hook was already removed.
    pub fn remove(&mut self, handle: &HookHandle) -> bool {
        let slot = self.slot_mut(handle.phase);
        match slot.iter().position(|(id, _)| *id == handle.id) {
            Some(pos) => {
                slot.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Fires every hook registered at `phase`, in registration order.
    ///
    /// `module_type` is the concrete type name of the firing module.
    pub fn fire(&self, phase: HookPhase, module_type: &str) {
        for (_, hook) in self.slot(phase) {
            hook(module_type);
        }
    }

    /// Total number of attached hooks across all lifecycle points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pre.len() + self.fwd.len() + self.bwd.len()
    }

    /// Whether no hooks are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, phase: HookPhase) -> &[(u64, HookFn)] {
        match phase {
            HookPhase::Pre => &self.pre,
            HookPhase::Fwd => &self.fwd,
            HookPhase::Bwd => &self.bwd,
        }
    }

    fn slot_mut(&mut self, phase: HookPhase) -> &mut Vec<(u64, HookFn)> {
        match phase {
            HookPhase::Pre => &mut self.pre,
            HookPhase::Fwd => &mut self.fwd,
            HookPhase::Bwd => &mut self.bwd,
        }
    }
}

/// Builds the memory-recording hook for one module slot.
///
/// The returned callback, when fired, derives the next `call_idx` from the
/// log tail, snapshots the device, and appends one [`MemoryRecord`] tagged
/// with `layer_idx`, `phase`, `exp` and the firing module's type name.
///
/// A snapshot failure never propagates into the computation: it is logged
/// via `tracing::warn!` and counted in `failures`, which the session
/// inspects after the step.
pub fn recorder(
    log: SharedLog,
    layer_idx: usize,
    phase: HookPhase,
    exp: Arc<str>,
    device: Arc<dyn DeviceMemory>,
    failures: Arc<AtomicUsize>,
) -> HookFn {
    Arc::new(move |module_type: &str| match device.snapshot() {
        Ok(snap) => {
            let mut log = log.lock();
            let call_idx = log.next_call_idx(&exp);
            log.push(MemoryRecord {
                layer_idx,
                call_idx,
                layer_type: module_type.to_string(),
                exp: exp.as_ref().to_string(),
                hook_type: phase,
                mem_all: snap.allocated,
                mem_cached: snap.cached,
            });
        }
        Err(err) => {
            failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                layer_idx,
                phase = %phase,
                module_type,
                %err,
                "memory hook failed to snapshot; record skipped"
            );
        }
    })
}
