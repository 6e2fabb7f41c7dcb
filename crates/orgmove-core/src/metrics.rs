//! Global atomic counters for migration runs.
//!
//! Counters are incremented at the call site. [`Metrics::flush`] emits the
//! current values as a single `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    stages_completed: AtomicU64,
    stage_failures: AtomicU64,
    rollbacks: AtomicU64,
    operator_overrides: AtomicU64,
    device_warnings: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            stages_completed: AtomicU64::new(0),
            stage_failures: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            operator_overrides: AtomicU64::new(0),
            device_warnings: AtomicU64::new(0),
        }
    }

    pub fn inc_stages_completed(&self) {
        self.stages_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stages_completed", "counter incremented");
    }

    pub fn inc_stage_failures(&self) {
        self.stage_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stage_failures", "counter incremented");
    }

    pub fn inc_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rollbacks", "counter incremented");
    }

    pub fn inc_operator_overrides(&self) {
        self.operator_overrides.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "operator_overrides", "counter incremented");
    }

    /// Add `n` soft per-device or compensation warnings.
    pub fn add_device_warnings(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.device_warnings.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "device_warnings", n, "counter incremented");
    }

    /// Emit all counters as one `info!` event. Call at run boundaries.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            stages_completed = self.stages_completed(),
            stage_failures = self.stage_failures(),
            rollbacks = self.rollbacks(),
            operator_overrides = self.operator_overrides(),
            device_warnings = self.device_warnings(),
        );
    }

    pub fn stages_completed(&self) -> u64 {
        self.stages_completed.load(Ordering::Relaxed)
    }

    pub fn stage_failures(&self) -> u64 {
        self.stage_failures.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    pub fn operator_overrides(&self) -> u64 {
        self.operator_overrides.load(Ordering::Relaxed)
    }

    pub fn device_warnings(&self) -> u64 {
        self.device_warnings.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.stages_completed.store(0, Ordering::Relaxed);
        self.stage_failures.store(0, Ordering::Relaxed);
        self.rollbacks.store(0, Ordering::Relaxed);
        self.operator_overrides.store(0, Ordering::Relaxed);
        self.device_warnings.store(0, Ordering::Relaxed);
    }
}
