use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cadence_core::prelude::Metrics;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::errors::WaitOutcome;
use crate::events::{MAX_STREAMS, OutputBuffer};

struct StreamQueue {
    frames: Mutex<VecDeque<OutputBuffer>>,
    available: Condvar,
}

impl StreamQueue {
    fn new() -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }
}

/// Completed-frame queues, one per output stream.
///
/// Each stream has its own lock and condition variable so one stream's
/// consumer can never stall another's producer. Waits are bounded and
/// re-check the active flag after every wake.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use cadence::frames::FrameRouter;
/// use cadence::prelude::{OutputBuffer, StreamUsage, WaitOutcome};
///
/// let router = FrameRouter::new(2);
/// router.set_active(true);
/// router.push(OutputBuffer::new(1, StreamUsage::Preview, 9));
/// match router.wait(1, Duration::from_millis(10)) {
///     WaitOutcome::Data(buffer) => assert_eq!(buffer.cookie, 9),
///     _ => unreachable!(),
/// }
/// ```
pub struct FrameRouter {
    queues: Vec<StreamQueue>,
    active: AtomicBool,
    metrics: Metrics,
}

impl FrameRouter {
    /// Router for `stream_count` streams (capped at [`MAX_STREAMS`]).
    pub fn new(stream_count: usize) -> Self {
        let count = stream_count.clamp(1, MAX_STREAMS);
        Self {
            queues: (0..count).map(|_| StreamQueue::new()).collect(),
            active: AtomicBool::new(false),
            metrics: Metrics::default(),
        }
    }

    /// Number of configured streams.
    pub fn stream_count(&self) -> usize {
        self.queues.len()
    }

    /// Flip the active flag; inactive waits return not-initialized.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Queue a completed buffer for its stream's consumer.
    ///
    /// An out-of-range stream id is a logged no-op.
    pub fn push(&self, buffer: OutputBuffer) -> bool {
        let Some(queue) = self.queues.get(buffer.stream_id) else {
            warn!(stream_id = buffer.stream_id, "frame for unknown stream");
            self.metrics.drop_one();
            return false;
        };
        let mut frames = queue.frames.lock();
        let was_empty = frames.is_empty();
        frames.push_back(buffer);
        if was_empty {
            queue.available.notify_one();
        }
        true
    }

    /// Block until the stream's next completed frame.
    ///
    /// A timeout is surfaced to the caller as retryable; teardown (or an
    /// unknown stream id) yields `NotInitialized`.
    pub fn wait(&self, stream_id: usize, timeout: Duration) -> WaitOutcome<OutputBuffer> {
        let Some(queue) = self.queues.get(stream_id) else {
            warn!(stream_id, "wait on unknown stream");
            return WaitOutcome::NotInitialized;
        };
        if !self.active.load(Ordering::Acquire) {
            return WaitOutcome::NotInitialized;
        }

        let mut frames = queue.frames.lock();
        while frames.is_empty() {
            let timed_out = queue.available.wait_for(&mut frames, timeout).timed_out();
            if !self.active.load(Ordering::Acquire) {
                return WaitOutcome::NotInitialized;
            }
            if timed_out && frames.is_empty() {
                self.metrics.timeout();
                warn!(stream_id, "frame wait timed out, wait recovery");
                return WaitOutcome::TimedOut;
            }
        }

        let buffer = frames.pop_front().expect("queue checked non-empty");
        debug!(stream_id, sequence = buffer.sequence, "frame returned");
        WaitOutcome::Data(buffer)
    }

    /// Drop all queued frames and wake every blocked consumer.
    pub fn clear(&self) {
        self.set_active(false);
        for queue in &self.queues {
            let mut frames = queue.frames.lock();
            while frames.pop_front().is_some() {
                self.metrics.drop_one();
            }
            queue.available.notify_all();
        }
    }

    /// Drop/timeout counters for this router.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StreamUsage;
    use std::sync::Arc;
    use std::thread;

    fn buffer(stream_id: usize, cookie: u64) -> OutputBuffer {
        OutputBuffer::new(stream_id, StreamUsage::Preview, cookie)
    }

    #[test]
    fn streams_are_independent() {
        let router = FrameRouter::new(3);
        router.set_active(true);
        assert!(router.push(buffer(2, 11)));

        // A frame on stream 2 must not satisfy stream 0.
        assert!(
            router
                .wait(0, Duration::from_millis(20))
                .is_timed_out()
        );
        match router.wait(2, Duration::from_millis(20)) {
            WaitOutcome::Data(b) => assert_eq!(b.cookie, 11),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn unknown_stream_is_rejected() {
        let router = FrameRouter::new(1);
        router.set_active(true);
        assert!(!router.push(buffer(5, 0)));
        assert_eq!(
            router.wait(5, Duration::from_millis(1)),
            WaitOutcome::NotInitialized
        );
    }

    #[test]
    fn clear_wakes_blocked_consumer() {
        let router = Arc::new(FrameRouter::new(1));
        router.set_active(true);
        let waiter = {
            let router = router.clone();
            thread::spawn(move || router.wait(0, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        router.clear();
        assert_eq!(waiter.join().unwrap(), WaitOutcome::NotInitialized);
    }

    #[test]
    fn inactive_router_returns_not_initialized() {
        let router = FrameRouter::new(1);
        assert_eq!(
            router.wait(0, Duration::from_millis(1)),
            WaitOutcome::NotInitialized
        );
    }

    #[test]
    fn frames_keep_fifo_order() {
        let router = FrameRouter::new(1);
        router.set_active(true);
        router.push(buffer(0, 1));
        router.push(buffer(0, 2));
        let first = router.wait(0, Duration::from_millis(10)).data().unwrap();
        let second = router.wait(0, Duration::from_millis(10)).data().unwrap();
        assert_eq!((first.cookie, second.cookie), (1, 2));
    }
}
