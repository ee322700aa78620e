//! Global atomic counters for ensemble activity.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a training job).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters. No allocations, no locking.
pub struct Metrics {
    models_trained: AtomicU64,
    models_saved: AtomicU64,
    models_loaded: AtomicU64,
    rows_predicted: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            models_trained: AtomicU64::new(0),
            models_saved: AtomicU64::new(0),
            models_loaded: AtomicU64::new(0),
            rows_predicted: AtomicU64::new(0),
        }
    }

    pub fn inc_models_trained(&self) {
        self.models_trained.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "models_trained", "counter incremented");
    }

    pub fn inc_models_saved(&self) {
        self.models_saved.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "models_saved", "counter incremented");
    }

    pub fn add_models_loaded(&self, n: u64) {
        self.models_loaded.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "models_loaded", n = n, "counter incremented");
    }

    pub fn add_rows_predicted(&self, n: u64) {
        self.rows_predicted.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "rows_predicted", n = n, "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            models_trained = self.models_trained(),
            models_saved = self.models_saved(),
            models_loaded = self.models_loaded(),
            rows_predicted = self.rows_predicted(),
        );
    }

    pub fn models_trained(&self) -> u64 {
        self.models_trained.load(Ordering::Relaxed)
    }

    pub fn models_saved(&self) -> u64 {
        self.models_saved.load(Ordering::Relaxed)
    }

    pub fn models_loaded(&self) -> u64 {
        self.models_loaded.load(Ordering::Relaxed)
    }

    pub fn rows_predicted(&self) -> u64 {
        self.rows_predicted.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.models_trained.store(0, Ordering::Relaxed);
        self.models_saved.store(0, Ordering::Relaxed);
        self.models_loaded.store(0, Ordering::Relaxed);
        self.rows_predicted.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_models_trained();
        m.inc_models_trained();
        assert_eq!(m.models_trained(), 2);

        m.inc_models_saved();
        assert_eq!(m.models_saved(), 1);

        m.add_models_loaded(3);
        m.add_rows_predicted(50);
        assert_eq!(m.models_loaded(), 3);
        assert_eq!(m.rows_predicted(), 50);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_models_trained();
        m.inc_models_saved();
        m.add_models_loaded(1);
        m.add_rows_predicted(7);
        m.reset();
        assert_eq!(m.models_trained(), 0);
        assert_eq!(m.models_saved(), 0);
        assert_eq!(m.models_loaded(), 0);
        assert_eq!(m.rows_predicted(), 0);
    }
}
