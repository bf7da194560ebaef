use std::sync::atomic::{AtomicU64, Ordering};

/// Lightweight counters for trigger/queue accounting.
///
/// # Example
/// ```rust
/// use cadence_core::metrics::Metrics;
///
/// let metrics = Metrics::default();
/// metrics.signal();
/// assert_eq!(metrics.signals(), 1);
/// ```
#[derive(Debug, Default)]
pub struct Metrics {
    signals: AtomicU64,
    supersessions: AtomicU64,
    timeouts: AtomicU64,
    drops: AtomicU64,
}

impl Metrics {
    /// Count a delivered signal.
    pub fn signal(&self) {
        self.signals.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a pending value replaced before consumption.
    pub fn supersede(&self) {
        self.supersessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a bounded wait that expired.
    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a value discarded on teardown or overflow.
    pub fn drop_one(&self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of delivered signals.
    pub fn signals(&self) -> u64 {
        self.signals.load(Ordering::Relaxed)
    }

    /// Snapshot of supersessions.
    pub fn supersessions(&self) -> u64 {
        self.supersessions.load(Ordering::Relaxed)
    }

    /// Snapshot of expired waits.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Snapshot of discarded values.
    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}

impl Clone for Metrics {
    fn clone(&self) -> Self {
        let cloned = Metrics::default();
        cloned.signals.store(self.signals(), Ordering::Relaxed);
        cloned
            .supersessions
            .store(self.supersessions(), Ordering::Relaxed);
        cloned.timeouts.store(self.timeouts(), Ordering::Relaxed);
        cloned.drops.store(self.drops(), Ordering::Relaxed);
        cloned
    }
}
