use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// Sensor test-pattern selection carried through dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TestPatternMode {
    #[default]
    Off,
    SolidColor,
    ColorBars,
    Pn9,
}

/// Caller-supplied capture parameters snapshotted per request.
///
/// The engine does not interpret these beyond the test-pattern mode; it
/// times when they are pushed to the control algorithm and keyed for
/// downstream retrieval.
///
/// # Example
/// ```rust
/// use cadence::prelude::{CaptureParams, TestPatternMode};
///
/// let params = CaptureParams {
///     exposure_time_us: Some(10_000),
///     ..CaptureParams::default()
/// };
/// assert_eq!(params.test_pattern, TestPatternMode::Off);
/// ```
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CaptureParams {
    /// Test-pattern override, forwarded in the dispatch event.
    pub test_pattern: TestPatternMode,
    /// Manual exposure time, when the caller pins it.
    pub exposure_time_us: Option<u32>,
    /// Manual sensitivity, when the caller pins it.
    pub sensitivity_iso: Option<u32>,
    /// Target frame duration, when the caller pins it.
    pub frame_duration_us: Option<u32>,
}

struct Entry {
    request_id: i64,
    params: Option<Arc<CaptureParams>>,
}

/// Per-frame parameter store keyed by effective sequence.
///
/// Downstream consumers (ISP parameter adaptation, metadata assembly)
/// look up the snapshot that governs a given output frame. Retention is
/// bounded; the oldest entries are evicted as new frames land.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use cadence::prelude::{CaptureParams, ParamStore};
///
/// let store = ParamStore::new(8);
/// store.save(12, 0, Some(Arc::new(CaptureParams::default())));
/// assert!(store.get(12).is_some());
/// assert!(store.get(13).is_none());
/// ```
pub struct ParamStore {
    capacity: usize,
    entries: Mutex<BTreeMap<i64, Entry>>,
}

impl ParamStore {
    /// Store retaining at most `capacity` frames of history.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record the snapshot governing `sequence`, evicting the oldest
    /// entry when full.
    pub fn save(&self, sequence: i64, request_id: i64, params: Option<Arc<CaptureParams>>) {
        let mut entries = self.entries.lock();
        entries.insert(sequence, Entry { request_id, params });
        while entries.len() > self.capacity {
            if let Some((oldest, _)) = entries.pop_first() {
                debug!(sequence = oldest, "evicted parameter snapshot");
            }
        }
    }

    /// Replace the snapshot for an already-recorded sequence
    /// (reprocessing path); unknown sequences are recorded fresh with no
    /// owning request id.
    pub fn update(&self, sequence: i64, params: Arc<CaptureParams>) {
        let mut entries = self.entries.lock();
        match entries.get_mut(&sequence) {
            Some(entry) => entry.params = Some(params),
            None => {
                entries.insert(
                    sequence,
                    Entry {
                        request_id: -1,
                        params: Some(params),
                    },
                );
            }
        }
    }

    /// Snapshot governing `sequence`, if still retained.
    pub fn get(&self, sequence: i64) -> Option<Arc<CaptureParams>> {
        self.entries
            .lock()
            .get(&sequence)
            .and_then(|entry| entry.params.clone())
    }

    /// Request id recorded for `sequence`, if still retained.
    pub fn request_id(&self, sequence: i64) -> Option<i64> {
        self.entries
            .lock()
            .get(&sequence)
            .map(|entry| entry.request_id)
    }

    /// Drop all history (stream stop).
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
