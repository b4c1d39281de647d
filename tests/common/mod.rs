//! Shared mocks: a fake device, toy modules and a toy model/optimizer
//! implementing the profiling traits.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};

use memprof_rs::prelude::*;
use memprof_rs::walk_modules;

/// Routes `tracing` output through the test harness, so the profiler's
/// `debug!`/`warn!` events show up under `--nocapture`. Safe to call from
/// every test; only the first registration wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Mock batch.
#[derive(Debug, Clone)]
pub struct TestBatch {
    size: usize,
}

impl TestBatch {
    pub fn new(size: usize) -> Self {
        Self { size }
    }
}

impl Batch for TestBatch {
    fn batch_size(&self) -> usize {
        self.size
    }
}

/// Device whose allocated count grows by a fixed amount per snapshot, so
/// firing order is visible in the recorded byte counts.
pub struct GrowingDevice {
    allocated: AtomicU64,
    growth: u64,
}

impl GrowingDevice {
    pub fn new(start: u64, growth: u64) -> Self {
        Self {
            allocated: AtomicU64::new(start),
            growth,
        }
    }
}

impl DeviceMemory for GrowingDevice {
    fn snapshot(&self) -> Result<MemSnapshot> {
        let allocated = self.allocated.fetch_add(self.growth, Ordering::Relaxed) + self.growth;
        Ok(MemSnapshot {
            allocated,
            cached: allocated + 512,
        })
    }
}

/// Device with no GPU behind it.
pub struct DeadDevice;

impl DeviceMemory for DeadDevice {
    fn snapshot(&self) -> Result<MemSnapshot> {
        Err(ProfilerError::device_unavailable("no cuda device"))
    }
}

/// Leaf module standing in for an embedding layer.
pub struct Embedding {
    hooks: HookSet,
}

impl Embedding {
    pub fn new() -> Self {
        Self {
            hooks: HookSet::new(),
        }
    }

    pub fn call(&self) {
        self.hooks.fire(HookPhase::Pre, self.type_name());
        self.hooks.fire(HookPhase::Fwd, self.type_name());
    }

    pub fn fire_bwd(&self) {
        self.hooks.fire(HookPhase::Bwd, self.type_name());
    }
}

impl Module for Embedding {
    fn type_name(&self) -> &'static str {
        "Embedding"
    }

    fn hooks(&mut self) -> &mut HookSet {
        &mut self.hooks
    }
}

/// Leaf module standing in for a linear layer.
pub struct Linear {
    hooks: HookSet,
}

impl Linear {
    pub fn new() -> Self {
        Self {
            hooks: HookSet::new(),
        }
    }

    pub fn call(&self) {
        self.hooks.fire(HookPhase::Pre, self.type_name());
        self.hooks.fire(HookPhase::Fwd, self.type_name());
    }

    pub fn fire_bwd(&self) {
        self.hooks.fire(HookPhase::Bwd, self.type_name());
    }
}

impl Module for Linear {
    fn type_name(&self) -> &'static str {
        "Linear"
    }

    fn hooks(&mut self) -> &mut HookSet {
        &mut self.hooks
    }
}

/// Two-module toy model: an `Embedding` feeding a `Linear` feeding the
/// loss. Traversal order is embedding (idx 0) then linear (idx 1); the
/// backward pass visits them in reverse.
pub struct TinyNet {
    pub embedding: Embedding,
    pub linear: Linear,
    /// Fail the forward pass after the embedding has run, simulating a
    /// shape mismatch between the two modules.
    pub fail_forward_midway: bool,
    /// Panic in the forward pass after the embedding has run, for
    /// unwind-path coverage.
    pub panic_forward_midway: bool,
}

impl TinyNet {
    pub fn new() -> Self {
        Self {
            embedding: Embedding::new(),
            linear: Linear::new(),
            fail_forward_midway: false,
            panic_forward_midway: false,
        }
    }
}

impl Model<TestBatch> for TinyNet {
    fn forward(&mut self, _batch: &TestBatch) -> Result<f32> {
        self.embedding.call();
        if self.fail_forward_midway {
            return Err(ProfilerError::step("input tensor shape mismatch"));
        }
        if self.panic_forward_midway {
            panic!("index out of bounds in embedding lookup");
        }
        self.linear.call();
        Ok(0.25)
    }

    fn backward(&mut self) -> Result<()> {
        self.linear.fire_bwd();
        self.embedding.fire_bwd();
        Ok(())
    }

    fn visit_modules(&mut self, f: &mut dyn FnMut(&mut dyn Module)) {
        f(&mut self.embedding);
        f(&mut self.linear);
    }
}

/// Container module wrapping a `Linear`, for nested-tree traversal tests.
pub struct Block {
    hooks: HookSet,
    pub inner: Linear,
}

impl Block {
    pub fn new() -> Self {
        Self {
            hooks: HookSet::new(),
            inner: Linear::new(),
        }
    }

    pub fn call(&self) {
        self.hooks.fire(HookPhase::Pre, self.type_name());
        self.inner.call();
        self.hooks.fire(HookPhase::Fwd, self.type_name());
    }

    pub fn fire_bwd(&self) {
        self.hooks.fire(HookPhase::Bwd, self.type_name());
        self.inner.fire_bwd();
    }
}

impl Module for Block {
    fn type_name(&self) -> &'static str {
        "Block"
    }

    fn hooks(&mut self) -> &mut HookSet {
        &mut self.hooks
    }

    fn children_mut(&mut self) -> Vec<&mut dyn Module> {
        vec![&mut self.inner]
    }
}

/// Model with a nested module tree: a `Block` (containing a `Linear`)
/// followed by a `Linear` head. Traversal: Block, inner Linear, head.
pub struct DeepNet {
    pub block: Block,
    pub head: Linear,
}

impl DeepNet {
    pub fn new() -> Self {
        Self {
            block: Block::new(),
            head: Linear::new(),
        }
    }
}

impl Model<TestBatch> for DeepNet {
    fn forward(&mut self, _batch: &TestBatch) -> Result<f32> {
        self.block.call();
        self.head.call();
        Ok(1.5)
    }

    fn backward(&mut self) -> Result<()> {
        self.head.fire_bwd();
        self.block.fire_bwd();
        Ok(())
    }

    fn visit_modules(&mut self, f: &mut dyn FnMut(&mut dyn Module)) {
        walk_modules(&mut self.block, f);
        f(&mut self.head);
    }
}

/// Mock optimizer counting its calls.
pub struct TestOptimizer {
    pub zero_grad_calls: usize,
    pub step_calls: usize,
    pub fail_step: bool,
}

impl TestOptimizer {
    pub fn new() -> Self {
        Self {
            zero_grad_calls: 0,
            step_calls: 0,
            fail_step: false,
        }
    }
}

impl<M, B> Optimizer<M, B> for TestOptimizer
where
    B: Batch,
    M: Model<B>,
{
    fn zero_grad(&mut self) {
        self.zero_grad_calls += 1;
    }

    fn step(&mut self, _model: &mut M) -> Result<()> {
        if self.fail_step {
            return Err(ProfilerError::step("optimizer state is poisoned"));
        }
        self.step_calls += 1;
        Ok(())
    }
}

/// Asserts that no instrumentation hooks remain anywhere in the tree.
pub fn assert_no_hooks<M: Model<TestBatch>>(model: &mut M) {
    model.visit_modules(&mut |module| {
        assert!(
            module.hooks().is_empty(),
            "module {} still has attached hooks",
            module.type_name()
        );
    });
}
