/// Errors surfaced by the pipeline engine.
///
/// Nothing here unwinds: components log and return these statuses, and
/// only the orchestration layer above decides whether any of them
/// becomes a user-visible device error.
///
/// # Example
/// ```rust
/// use cadence::prelude::PipelineError;
///
/// let err = PipelineError::GraphUnknown(42);
/// assert_eq!(err.code(), "graph_unknown");
/// assert!(!err.retryable());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("component is not running")]
    NotRunning,
    #[error("no executor owns node {0:?}")]
    NodeUnknown(String),
    #[error("no scheduler graph with id {0}")]
    GraphUnknown(u32),
    #[error("request rejected: {0}")]
    InvalidRequest(String),
    #[error("node {0} failed to process tick")]
    Node(String),
    #[error("control loop failed: {0}")]
    Control(String),
    #[error("sensor write failed: {0}")]
    SensorWrite(String),
}

impl PipelineError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::NotRunning => "not_running",
            PipelineError::NodeUnknown(_) => "node_unknown",
            PipelineError::GraphUnknown(_) => "graph_unknown",
            PipelineError::InvalidRequest(_) => "invalid_request",
            PipelineError::Node(_) => "node_failed",
            PipelineError::Control(_) => "control_failed",
            PipelineError::SensorWrite(_) => "sensor_write_failed",
        }
    }

    /// Whether the operation may succeed when retried.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Node(_) | PipelineError::Control(_) | PipelineError::SensorWrite(_)
        )
    }
}

/// Result of a bounded blocking wait.
///
/// Timeouts are non-fatal and retryable; `NotInitialized` is the
/// cooperative-cancellation result returned once the owning component
/// has begun teardown, and callers propagate it upward promptly.
///
/// # Example
/// ```rust
/// use cadence::prelude::WaitOutcome;
///
/// let outcome: WaitOutcome<u32> = WaitOutcome::TimedOut;
/// assert!(outcome.is_timed_out());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    /// The wait produced a value.
    Data(T),
    /// The bounded wait expired; retry.
    TimedOut,
    /// The component is tearing down; stop waiting.
    NotInitialized,
}

impl<T> WaitOutcome<T> {
    /// True for the timeout outcome.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, WaitOutcome::TimedOut)
    }

    /// Unwrap the value for tests and infallible call sites.
    pub fn data(self) -> Option<T> {
        match self {
            WaitOutcome::Data(value) => Some(value),
            _ => None,
        }
    }
}
