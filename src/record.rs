//! Memory records and the append-only log they accumulate in.
//!
//! A [`MemoryRecord`] is one device-memory snapshot tagged with the module
//! and lifecycle point that produced it. The [`MemoryLog`] keeps records in
//! firing order and owns the `call_idx` sequencing rule, so the counter
//! semantics live in exactly one place.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle point at which a hook fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    /// Immediately before the module's forward computation.
    Pre,
    /// Immediately after the module's forward computation completes.
    Fwd,
    /// After the module's gradient computation during the backward pass.
    Bwd,
}

impl HookPhase {
    /// All phases, in the order they are attached per module.
    pub const ALL: [HookPhase; 3] = [HookPhase::Pre, HookPhase::Fwd, HookPhase::Bwd];

    /// Short tag used in records and log output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::Pre => "pre",
            HookPhase::Fwd => "fwd",
            HookPhase::Bwd => "bwd",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One memory snapshot, immutable once appended to a [`MemoryLog`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Position of the module in the session's traversal order.
    ///
    /// Valid only within one session's traversal of one model; not a
    /// stable key across different models.
    pub layer_idx: usize,
    /// Zero-based firing-order counter, scoped to one experiment.
    ///
    /// Increases by exactly 1 per record within an experiment and resets
    /// to 0 when the experiment identifier changes from the previous
    /// record's.
    pub call_idx: u64,
    /// Concrete type name of the module that fired the hook.
    pub layer_type: String,
    /// Experiment identifier shared by every record of one session.
    pub exp: String,
    /// Which lifecycle point produced this record.
    pub hook_type: HookPhase,
    /// Bytes currently allocated on the device.
    pub mem_all: u64,
    /// Bytes currently reserved/cached by the allocator.
    pub mem_cached: u64,
}

/// Ordered, append-only sequence of [`MemoryRecord`]s.
///
/// Insertion order is the causal order of hook firing. A log returned by
/// one session may be fed into the next to accumulate comparable records
/// across experiments; sessions sharing a log must be sequential, never
/// concurrent, or the `call_idx` sequencing invariant breaks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryLog {
    records: Vec<MemoryRecord>,
}

impl MemoryLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the log holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in firing order.
    #[must_use]
    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    /// The most recently appended record, if any.
    #[must_use]
    pub fn last(&self) -> Option<&MemoryRecord> {
        self.records.last()
    }

    /// Iterates over records in firing order.
    pub fn iter(&self) -> std::slice::Iter<'_, MemoryRecord> {
        self.records.iter()
    }

    /// Appends a record. Records are never mutated or removed afterwards.
    pub fn push(&mut self, record: MemoryRecord) {
        self.records.push(record);
    }

    /// The `call_idx` the next record of experiment `exp` must carry.
    ///
    /// 0 when the log is empty or the last record belongs to a different
    /// experiment, otherwise the last record's `call_idx + 1`.
    #[must_use]
    pub fn next_call_idx(&self, exp: &str) -> u64 {
        match self.records.last() {
            Some(last) if last.exp == exp => last.call_idx + 1,
            _ => 0,
        }
    }

    /// The record with the highest allocated byte count, if any.
    ///
    /// Ties resolve to the earliest such record, which is the first time
    /// the peak was reached.
    #[must_use]
    pub fn peak_allocated(&self) -> Option<&MemoryRecord> {
        self.records.iter().reduce(|best, r| {
            if r.mem_all > best.mem_all {
                r
            } else {
                best
            }
        })
    }

    /// Maximum allocated bytes observed per module type.
    ///
    /// Attribution by type rather than by `layer_idx`, so it stays
    /// meaningful across models with different traversal orders.
    #[must_use]
    pub fn peak_by_layer_type(&self) -> HashMap<&str, u64> {
        let mut peaks: HashMap<&str, u64> = HashMap::new();
        for record in &self.records {
            let entry = peaks.entry(record.layer_type.as_str()).or_insert(0);
            *entry = (*entry).max(record.mem_all);
        }
        peaks
    }
}

impl<'a> IntoIterator for &'a MemoryLog {
    type Item = &'a MemoryRecord;
    type IntoIter = std::slice::Iter<'a, MemoryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
