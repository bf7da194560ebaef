use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::errors::PipelineError;
use crate::tunables::PipelineTunables;

/// SOF history entries retained for timestamp lookup.
const SOF_HISTORY_DEPTH: usize = 8;

/// Per-frame gain codes; one entry per exposure in an HDR batch.
pub type GainCodes = SmallVec<[i32; 2]>;

/// One exposure plan computed by the control algorithm.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorExposure {
    pub coarse_integration_time: u32,
    pub fine_integration_time: u32,
    pub analog_gain_code: i32,
    pub digital_gain_code: i32,
}

/// Exposure batch for one target frame (multiple entries for staggered
/// HDR sensors), plus the shared frame timing.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExposureBatch {
    pub line_length_pixels: u32,
    pub frame_length_lines: u32,
    pub exposures: SmallVec<[SensorExposure; 2]>,
}

#[derive(Debug, Clone)]
struct ExposureTiming {
    line_length_pixels: u32,
    frame_length_lines: u32,
    coarse: SmallVec<[u32; 2]>,
    fine: SmallVec<[u32; 2]>,
}

/// Sink for sensor register writes.
///
/// The engine serializes calls under its own lock; implementations talk
/// to the kernel driver and report failures, which the manager logs and
/// absorbs.
pub trait SensorHw: Send + Sync {
    fn set_frame_timing(
        &self,
        line_length_pixels: u32,
        frame_length_lines: u32,
    ) -> Result<(), PipelineError>;
    fn set_exposure(&self, coarse: &[u32], fine: &[u32]) -> Result<(), PipelineError>;
    fn set_analog_gains(&self, gains: &[i32]) -> Result<(), PipelineError>;
    fn set_digital_gains(&self, gains: &[i32]) -> Result<(), PipelineError>;
}

struct SensorState {
    last_sof: i64,
    exposure_map: BTreeMap<i64, ExposureTiming>,
    analog_map: BTreeMap<i64, GainCodes>,
    digital_map: BTreeMap<i64, GainCodes>,
    sof_history: VecDeque<(i64, u64)>,
}

impl SensorState {
    fn new() -> Self {
        Self {
            last_sof: -1,
            exposure_map: BTreeMap::new(),
            analog_map: BTreeMap::new(),
            digital_map: BTreeMap::new(),
            sof_history: VecDeque::with_capacity(SOF_HISTORY_DEPTH),
        }
    }
}

/// Times sensor register writes against the frame they were computed
/// for.
///
/// Exposure, analog gain, and digital gain each lag the register write
/// by their own number of frames, so a value computed for frame N must
/// be written on a channel-specific earlier frame. The capture-start
/// signal is the clock: each one applies exactly the entries keyed at
/// its sequence, never a range.
///
/// All operations are synchronous and run on the caller's thread under
/// one internal lock; register writes must stay externally serialized in
/// a fixed order.
///
/// # Example
/// ```rust,ignore
/// let manager = SensorManager::new(&tunables, hw);
/// manager.on_capture_start(10, 33_000);
/// let effective = manager.update_exposure(&batch, None);
/// assert!(effective > 10);
/// ```
pub struct SensorManager {
    hw: Arc<dyn SensorHw>,
    exposure_lag: i64,
    analog_delay: i64,
    digital_delay: i64,
    has_timing_source: bool,
    state: Mutex<SensorState>,
}

impl SensorManager {
    /// Manager wired to a register sink, with channel delays from the
    /// platform tunables.
    pub fn new(tunables: &PipelineTunables, hw: Arc<dyn SensorHw>) -> Self {
        Self {
            hw,
            exposure_lag: tunables.exposure_lag,
            analog_delay: tunables.analog_gain_delay,
            digital_delay: tunables.digital_gain_delay,
            has_timing_source: tunables.has_timing_source,
            state: Mutex::new(SensorState::new()),
        }
    }

    /// Invalidate the clock and drop all pending entries (stream stop).
    ///
    /// The next `update_exposure` falls back to applying immediately
    /// until the clock re-establishes.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.last_sof = -1;
        state.exposure_map.clear();
        state.analog_map.clear();
        state.digital_map.clear();
        state.sof_history.clear();
    }

    /// Advance the clock to a new capture-start signal and apply every
    /// entry due exactly at `sequence`.
    pub fn on_capture_start(&self, sequence: i64, timestamp_us: u64) {
        let mut state = self.state.lock();
        state.last_sof = sequence;
        self.apply_due(&mut state, sequence);

        if state.sof_history.len() >= SOF_HISTORY_DEPTH {
            state.sof_history.pop_front();
        }
        state.sof_history.push_back((sequence, timestamp_us));
    }

    /// Timestamp recorded for a capture-start sequence, if still in the
    /// history window.
    pub fn sof_timestamp(&self, sequence: i64) -> Option<u64> {
        self.state
            .lock()
            .sof_history
            .iter()
            .find(|(seq, _)| *seq == sequence)
            .map(|(_, ts)| *ts)
    }

    /// Frames until a newly computed exposure takes effect: queue depth
    /// plus the hardware lag.
    pub fn current_applied_delay(&self) -> i64 {
        self.state.lock().exposure_map.len() as i64 + self.exposure_lag
    }

    /// Queue (or directly apply) an exposure batch, returning the
    /// predicted effective sequence for the caller to correlate against.
    ///
    /// With no established clock or no capture-timing source the values
    /// apply immediately. `applying_seq` equal to the current
    /// capture-start sequence means "the frame in flight right now" and
    /// also applies immediately. Gain channels are timed independently:
    /// a channel whose computed target frame is not in the future writes
    /// through instead of queueing an entry that could never fire.
    pub fn update_exposure(&self, batch: &ExposureBatch, applying_seq: Option<i64>) -> i64 {
        let mut state = self.state.lock();
        let predicted = if state.last_sof < 0 {
            0
        } else {
            state.last_sof + self.exposure_lag
        };

        if batch.exposures.is_empty() {
            warn!("no exposure parameters");
            return predicted;
        }

        let timing = ExposureTiming {
            line_length_pixels: batch.line_length_pixels,
            frame_length_lines: batch.frame_length_lines,
            coarse: batch.exposures.iter().map(|e| e.coarse_integration_time).collect(),
            fine: batch.exposures.iter().map(|e| e.fine_integration_time).collect(),
        };
        let analog: GainCodes = batch.exposures.iter().map(|e| e.analog_gain_code).collect();
        let digital: GainCodes = batch.exposures.iter().map(|e| e.digital_gain_code).collect();

        let clock_established = state.last_sof >= 0 && self.has_timing_source;
        if !clock_established {
            self.apply_timing(&timing);
            self.apply_analog(&analog);
            self.apply_digital(&digital);
            return predicted;
        }

        let last_sof = state.last_sof;
        if applying_seq == Some(last_sof) {
            // Target is the frame in flight; queueing would miss it.
            self.apply_timing(&timing);
            self.queue_gains(&mut state, last_sof, analog, digital);
            debug!(
                last_sof = state.last_sof,
                predicted, "exposure applied to frame in flight"
            );
            return predicted;
        }

        let sensor_seq = state.last_sof + state.exposure_map.len() as i64 + 1;
        state.exposure_map.insert(sensor_seq, timing);
        self.queue_gains(&mut state, sensor_seq, analog, digital);

        let predicted = predicted + state.exposure_map.len() as i64;
        debug!(
            last_sof = state.last_sof,
            sensor_seq, predicted, "exposure queued"
        );
        predicted
    }

    fn queue_gains(&self, state: &mut SensorState, base_seq: i64, analog: GainCodes, digital: GainCodes) {
        let analog_seq = base_seq + self.analog_delay;
        if self.analog_delay == 0 || analog_seq <= state.last_sof {
            self.apply_analog(&analog);
        } else {
            state.analog_map.insert(analog_seq, analog);
        }

        let digital_seq = base_seq + self.digital_delay;
        if self.digital_delay == 0 || digital_seq <= state.last_sof {
            self.apply_digital(&digital);
        } else {
            state.digital_map.insert(digital_seq, digital);
        }
    }

    fn apply_due(&self, state: &mut SensorState, sequence: i64) {
        if let Some(timing) = state.exposure_map.remove(&sequence) {
            self.apply_timing(&timing);
        }
        if let Some(gains) = state.analog_map.remove(&sequence) {
            self.apply_analog(&gains);
        }
        if let Some(gains) = state.digital_map.remove(&sequence) {
            self.apply_digital(&gains);
        }
    }

    fn apply_timing(&self, timing: &ExposureTiming) {
        if let Err(err) = self
            .hw
            .set_frame_timing(timing.line_length_pixels, timing.frame_length_lines)
        {
            warn!(error = %err, "frame timing write failed");
        }
        if let Err(err) = self.hw.set_exposure(&timing.coarse, &timing.fine) {
            warn!(error = %err, "exposure write failed");
        }
    }

    fn apply_analog(&self, gains: &GainCodes) {
        if let Err(err) = self.hw.set_analog_gains(gains) {
            warn!(error = %err, "analog gain write failed");
        }
    }

    fn apply_digital(&self, gains: &GainCodes) {
        if let Err(err) = self.hw.set_digital_gains(gains) {
            warn!(error = %err, "digital gain write failed");
        }
    }
}
