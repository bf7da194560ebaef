use smallvec::SmallVec;

use crate::params::TestPatternMode;

/// Maximum output streams a device configuration may carry.
pub const MAX_STREAMS: usize = 6;

/// What a stream's buffers are consumed for.
///
/// Admission gating cares about the distinction: a first request with no
/// preview/video buffer will never produce statistics, so the
/// initial-stats gate is lifted for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StreamUsage {
    Preview,
    VideoCapture,
    StillCapture,
}

impl StreamUsage {
    /// True for usages that feed the statistics-producing pipe.
    pub fn produces_stats(self) -> bool {
        matches!(self, StreamUsage::Preview | StreamUsage::VideoCapture)
    }
}

/// Descriptor for one output buffer of a capture request.
///
/// The engine never touches buffer memory; `cookie` is an opaque handle
/// the buffer-queueing layer uses to find the real allocation.
///
/// # Example
/// ```rust
/// use cadence::prelude::{OutputBuffer, StreamUsage};
///
/// let buffer = OutputBuffer::new(0, StreamUsage::Preview, 0x51);
/// assert!(!buffer.is_reprocess());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutputBuffer {
    /// Index of the stream this buffer belongs to.
    pub stream_id: usize,
    /// Consumer of the stream.
    pub usage: StreamUsage,
    /// Frame sequence; negative until the capture completes, pre-filled
    /// for reprocessing requests.
    pub sequence: i64,
    /// Capture timestamp in microseconds; zero until the capture
    /// completes, pre-filled for reprocessing requests.
    pub timestamp_us: u64,
    /// Opaque handle for the buffer-queueing layer.
    pub cookie: u64,
}

impl OutputBuffer {
    /// New buffer descriptor with no capture identity yet.
    pub fn new(stream_id: usize, usage: StreamUsage, cookie: u64) -> Self {
        Self {
            stream_id,
            usage,
            sequence: -1,
            timestamp_us: 0,
            cookie,
        }
    }

    /// A buffer that already carries a capture identity is input to a
    /// reprocessing request; the control algorithm is not re-run for it.
    pub fn is_reprocess(&self) -> bool {
        self.sequence >= 0 && self.timestamp_us > 0
    }
}

/// Bounded buffer list carried by a request and its dispatch event.
pub type BufferList = SmallVec<[OutputBuffer; MAX_STREAMS]>;

/// Asynchronous hardware/pipeline signals consumed by the engine.
///
/// `CaptureStart` is the synchronization clock: its sequence numbers are
/// monotonically increasing and drive both the sensor-apply maps and the
/// request thread's target resolution.
#[derive(Debug, Clone)]
pub enum PipeEvent {
    /// A new sensor frame began.
    CaptureStart { sequence: i64, timestamp_us: u64 },
    /// Statistics for a processed frame are available.
    StatsReady { sequence: i64 },
    /// A queued capture finished in the hardware pipe.
    FrameDone { stream_id: usize },
    /// A completed output buffer is ready for a stream consumer.
    FrameAvailable { buffer: OutputBuffer },
}

/// Dispatch payload handed to the buffer-queueing layer, one per
/// admitted request.
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    /// The request's output buffers, in submission order.
    pub buffers: BufferList,
    /// Resolved effective sequence the request's settings target.
    pub sequence: i64,
    /// Test-pattern snapshot from the request parameters.
    pub test_pattern: TestPatternMode,
}

/// Receiver of dispatch events (the buffer-queueing collaborator).
pub trait DispatchListener: Send + Sync {
    /// Called once per dispatched request, on the request thread.
    fn on_dispatch(&self, event: &DispatchEvent);
}
