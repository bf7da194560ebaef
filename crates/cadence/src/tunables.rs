use std::time::Duration;

/// Default bounded wait for the request loop's combined signal.
pub const DEFAULT_REQUEST_WAIT: Duration = Duration::from_secs(2);
/// Default bounded wait for a per-stream frame consumer.
pub const DEFAULT_FRAME_WAIT: Duration = Duration::from_secs(5);
/// Default bounded wait for the first-request-done gate.
pub const DEFAULT_FIRST_REQUEST_WAIT: Duration = Duration::from_secs(1);
/// Default bounded wait for an executor trigger.
pub const DEFAULT_EXECUTOR_WAIT: Duration = Duration::from_secs(2);
/// Default cap on requests in flight (admission control).
pub const DEFAULT_MAX_REQUESTS_INFLIGHT: usize = 4;
/// Default number of requests admitted before initial-stats gating.
pub const DEFAULT_INITIAL_PENDING_COUNT: i64 = 2;
/// Default algorithm-to-sensor exposure lag in frames.
pub const DEFAULT_EXPOSURE_LAG: i64 = 2;

/// Read-only platform configuration for one camera's pipeline.
///
/// Owned by the per-camera device object and passed to collaborators by
/// reference; there is no process-global instance.
///
/// # Example
/// ```rust
/// use cadence::prelude::PipelineTunables;
///
/// let tunables = PipelineTunables::builder()
///     .exposure_lag(2)
///     .gain_delays(2, 0)
///     .per_frame_control(true)
///     .build();
/// assert_eq!(tunables.exposure_lag, 2);
/// ```
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineTunables {
    /// Frames between an exposure register write and its visible effect.
    pub exposure_lag: i64,
    /// Extra frames of pipeline delay on the analog-gain channel,
    /// relative to the exposure write.
    pub analog_gain_delay: i64,
    /// Extra frames of pipeline delay on the digital-gain channel.
    pub digital_gain_delay: i64,
    /// Maximum requests in flight before admission blocks.
    pub max_requests_inflight: usize,
    /// Requests admitted before the initial-stats gate engages.
    pub initial_pending_count: i64,
    /// Gate admission until the first statistics arrive.
    pub wait_first_stats: bool,
    /// Capture parameters may change on every frame.
    pub per_frame_control: bool,
    /// The device delivers capture-start signals; without one, sensor
    /// writes apply immediately and effective sequences are not
    /// predicted.
    pub has_timing_source: bool,
    /// Bounded wait for the request loop.
    pub request_wait: Duration,
    /// Bounded wait for per-stream frame consumers.
    pub frame_wait: Duration,
    /// Bounded wait for the first-request-done gate.
    pub first_request_wait: Duration,
    /// Bounded wait for executor triggers.
    pub executor_wait: Duration,
}

impl Default for PipelineTunables {
    fn default() -> Self {
        Self {
            exposure_lag: DEFAULT_EXPOSURE_LAG,
            analog_gain_delay: 0,
            digital_gain_delay: 0,
            max_requests_inflight: DEFAULT_MAX_REQUESTS_INFLIGHT,
            initial_pending_count: DEFAULT_INITIAL_PENDING_COUNT,
            wait_first_stats: true,
            per_frame_control: false,
            has_timing_source: true,
            request_wait: DEFAULT_REQUEST_WAIT,
            frame_wait: DEFAULT_FRAME_WAIT,
            first_request_wait: DEFAULT_FIRST_REQUEST_WAIT,
            executor_wait: DEFAULT_EXECUTOR_WAIT,
        }
    }
}

impl PipelineTunables {
    /// Start building a configuration from defaults.
    pub fn builder() -> TunablesBuilder {
        TunablesBuilder {
            tunables: PipelineTunables::default(),
        }
    }

    fn sanitized(mut self) -> Self {
        self.exposure_lag = self.exposure_lag.max(0);
        self.analog_gain_delay = self.analog_gain_delay.max(0);
        self.digital_gain_delay = self.digital_gain_delay.max(0);
        self.max_requests_inflight = self.max_requests_inflight.max(1);
        self.initial_pending_count = self.initial_pending_count.max(0);
        self.request_wait = self.request_wait.max(Duration::from_millis(10));
        self.frame_wait = self.frame_wait.max(Duration::from_millis(10));
        self.first_request_wait = self.first_request_wait.max(Duration::from_millis(10));
        self.executor_wait = self.executor_wait.max(Duration::from_millis(10));
        self
    }
}

/// Builder for [`PipelineTunables`].
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use cadence::prelude::PipelineTunables;
///
/// let tunables = PipelineTunables::builder()
///     .max_requests_inflight(6)
///     .frame_wait(Duration::from_secs(3))
///     .build();
/// assert_eq!(tunables.max_requests_inflight, 6);
/// ```
#[derive(Clone, Debug)]
pub struct TunablesBuilder {
    tunables: PipelineTunables,
}

impl TunablesBuilder {
    /// Exposure application lag in frames.
    pub fn exposure_lag(mut self, frames: i64) -> Self {
        self.tunables.exposure_lag = frames;
        self
    }

    /// Analog / digital gain channel delays in frames.
    pub fn gain_delays(mut self, analog: i64, digital: i64) -> Self {
        self.tunables.analog_gain_delay = analog;
        self.tunables.digital_gain_delay = digital;
        self
    }

    /// Cap on requests in flight.
    pub fn max_requests_inflight(mut self, count: usize) -> Self {
        self.tunables.max_requests_inflight = count;
        self
    }

    /// Requests admitted before initial-stats gating engages.
    pub fn initial_pending_count(mut self, count: i64) -> Self {
        self.tunables.initial_pending_count = count;
        self
    }

    /// Whether admission waits for the first statistics.
    pub fn wait_first_stats(mut self, wait: bool) -> Self {
        self.tunables.wait_first_stats = wait;
        self
    }

    /// Enable per-frame control mode.
    pub fn per_frame_control(mut self, enabled: bool) -> Self {
        self.tunables.per_frame_control = enabled;
        self
    }

    /// Whether the device delivers capture-start signals.
    pub fn has_timing_source(mut self, present: bool) -> Self {
        self.tunables.has_timing_source = present;
        self
    }

    /// Override the request-loop wait.
    pub fn request_wait(mut self, wait: Duration) -> Self {
        self.tunables.request_wait = wait;
        self
    }

    /// Override the per-stream frame wait.
    pub fn frame_wait(mut self, wait: Duration) -> Self {
        self.tunables.frame_wait = wait;
        self
    }

    /// Override the first-request-done wait.
    pub fn first_request_wait(mut self, wait: Duration) -> Self {
        self.tunables.first_request_wait = wait;
        self
    }

    /// Override the executor trigger wait.
    pub fn executor_wait(mut self, wait: Duration) -> Self {
        self.tunables.executor_wait = wait;
        self
    }

    /// Finish, clamping out-of-range values.
    pub fn build(self) -> PipelineTunables {
        self.tunables.sanitized()
    }
}
