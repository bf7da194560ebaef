use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;

const DEFAULT_WINDOW: usize = 120;

/// Rolling timing metrics for one pipeline stage (request dispatch, an
/// executor's tick processing).
///
/// # Example
/// ```rust
/// use cadence::prelude::TimingMetrics;
///
/// let metrics = TimingMetrics::default();
/// metrics.record(std::time::Duration::from_millis(4));
/// assert_eq!(metrics.total_samples(), 1);
/// ```
#[derive(Default, Clone)]
pub struct TimingMetrics {
    inner: Arc<TimingState>,
}

#[derive(Default)]
struct TimingState {
    count: AtomicU64,
    last_nanos: AtomicU64,
    window: Mutex<WindowState>,
}

struct WindowState {
    samples: VecDeque<(Instant, u64)>,
    max: usize,
}

impl Default for WindowState {
    fn default() -> Self {
        Self {
            samples: VecDeque::new(),
            max: DEFAULT_WINDOW,
        }
    }
}

impl TimingMetrics {
    /// Record a single duration sample.
    pub fn record(&self, duration: Duration) {
        let nanos = duration.as_nanos().min(u64::MAX as u128) as u64;
        self.inner.count.fetch_add(1, Ordering::Relaxed);
        self.inner.last_nanos.store(nanos, Ordering::Relaxed);
        let mut window = self.inner.window.lock();
        window.samples.push_back((Instant::now(), nanos));
        while window.samples.len() > window.max {
            window.samples.pop_front();
        }
    }

    /// Total samples recorded over the lifetime.
    pub fn total_samples(&self) -> u64 {
        self.inner.count.load(Ordering::Relaxed)
    }

    /// Rolling average of samples in milliseconds.
    pub fn avg_millis(&self) -> Option<f64> {
        let window = self.inner.window.lock();
        if window.samples.is_empty() {
            return None;
        }
        let total: u128 = window.samples.iter().map(|(_, n)| *n as u128).sum();
        Some(total as f64 / 1_000_000.0 / window.samples.len() as f64)
    }

    /// Most recent sample in milliseconds.
    pub fn last_millis(&self) -> Option<f64> {
        let last = self.inner.last_nanos.load(Ordering::Relaxed);
        if last == 0 {
            None
        } else {
            Some(last as f64 / 1_000_000.0)
        }
    }

    /// Rolling rate based on sample timestamps, in events per second.
    pub fn rate_hz(&self) -> Option<f64> {
        let window = self.inner.window.lock();
        if window.samples.len() < 2 {
            return None;
        }
        let first = window.samples.front()?.0;
        let last = window.samples.back()?.0;
        let span = last.saturating_duration_since(first).as_secs_f64();
        if span > 0.0 {
            Some(window.samples.len() as f64 / span)
        } else {
            None
        }
    }
}
