//! Device memory snapshot sources.
//!
//! A [`DeviceMemory`] implementation answers one question: how many bytes
//! are allocated and how many are reserved by the allocator, right now,
//! reflecting every device operation enqueued before the call. A source
//! with no usable device must fail with
//! [`ProfilerError::DeviceUnavailable`] rather than report zeros.

use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::{ProfilerError, Result};

/// One reading of the device allocator's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemSnapshot {
    /// Bytes currently allocated.
    pub allocated: u64,
    /// Bytes currently reserved/cached by the allocator.
    pub cached: u64,
}

/// A queryable source of device memory counters.
///
/// `snapshot` must block until the counters reflect completed device work,
/// not just queued work. Other than that wait it has no side effects.
pub trait DeviceMemory: Send + Sync {
    /// Current allocated and cached byte counts.
    ///
    /// # Errors
    ///
    /// [`ProfilerError::DeviceUnavailable`] when no memory-reporting
    /// device can be reached.
    fn snapshot(&self) -> Result<MemSnapshot>;
}

/// Memory counters read from `nvidia-smi`.
///
/// `memory.used` is reported as allocated bytes and `memory.total -
/// memory.free` as cached bytes (the driver's reserved footprint). The
/// query is a blocking round-trip to the driver, so the counters it
/// returns are ordered with respect to the calling thread; for an explicit
/// device-side barrier wrap this in [`CandleDeviceMemory`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NvidiaSmiMemory {
    device_idx: usize,
}

impl NvidiaSmiMemory {
    /// Queries the GPU with the given index.
    #[must_use]
    pub fn new(device_idx: usize) -> Self {
        Self { device_idx }
    }
}

impl DeviceMemory for NvidiaSmiMemory {
    fn snapshot(&self) -> Result<MemSnapshot> {
        let output = Command::new("nvidia-smi")
            .args([
                "--query-gpu=memory.total,memory.used,memory.free",
                "--format=csv,noheader,nounits",
                &format!("--id={}", self.device_idx),
            ])
            .output()
            .map_err(|e| ProfilerError::device_unavailable(format!("nvidia-smi: {e}")))?;

        if !output.status.success() {
            return Err(ProfilerError::device_unavailable(format!(
                "nvidia-smi exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_query_output(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            ProfilerError::device_unavailable("unparseable nvidia-smi output".to_string())
        })
    }
}

/// Parses one `memory.total,memory.used,memory.free` CSV line (MiB values).
fn parse_query_output(stdout: &str) -> Option<MemSnapshot> {
    const MIB: u64 = 1024 * 1024;

    let parts: Vec<&str> = stdout.trim().split(',').map(str::trim).collect();
    if parts.len() < 3 {
        return None;
    }

    let total = parts[0].parse::<u64>().ok()? * MIB;
    let used = parts[1].parse::<u64>().ok()? * MIB;
    let free = parts[2].parse::<u64>().ok()? * MIB;

    Some(MemSnapshot {
        allocated: used,
        cached: total.saturating_sub(free),
    })
}

/// Snapshot source with an explicit candle device barrier.
///
/// Calls [`candle_core::Device::synchronize`] before delegating to the
/// inner source, so the counters reflect completed device operations
/// rather than queued ones.
#[cfg(feature = "candle")]
pub struct CandleDeviceMemory<S> {
    device: candle_core::Device,
    source: S,
}

#[cfg(feature = "candle")]
impl<S: DeviceMemory> CandleDeviceMemory<S> {
    /// Wraps `source` with a synchronization barrier on `device`.
    pub fn new(device: candle_core::Device, source: S) -> Self {
        Self { device, source }
    }
}

#[cfg(feature = "candle")]
impl<S: DeviceMemory> DeviceMemory for CandleDeviceMemory<S> {
    fn snapshot(&self) -> Result<MemSnapshot> {
        self.device
            .synchronize()
            .map_err(|e| ProfilerError::device_unavailable(format!("device synchronize: {e}")))?;
        self.source.snapshot()
    }
}
