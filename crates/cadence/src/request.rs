use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use cadence_core::prelude::{Lifecycle, LifecycleState};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::errors::{PipelineError, WaitOutcome};
use crate::events::{BufferList, DispatchEvent, DispatchListener, OutputBuffer, PipeEvent};
use crate::frames::FrameRouter;
use crate::metrics::TimingMetrics;
use crate::params::{CaptureParams, ParamStore};
use crate::tunables::PipelineTunables;

/// Frames of parameter history retained for downstream lookup.
const PARAM_HISTORY: usize = 32;

bitflags! {
    /// Trigger sources accumulated between request-loop iterations.
    ///
    /// Target-sequence resolution consumes the set once per wake-up with
    /// a strict priority: `CAPTURE_START` first, then `STATS`, then
    /// `NEW_REQUEST | FRAME_DONE`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TriggerFlags: u32 {
        /// A request was appended to the pending queue.
        const NEW_REQUEST = 1 << 0;
        /// A queued capture finished and nothing is in flight.
        const FRAME_DONE = 1 << 1;
        /// Statistics arrived for a processed frame.
        const STATS = 1 << 2;
        /// A capture-start signal advanced past the applied sequence.
        const CAPTURE_START = 1 << 3;
    }
}

/// Control-algorithm collaborator (3A).
///
/// `run` may take non-trivial time; it is invoked synchronously from the
/// request thread and treated as an opaque blocking call.
pub trait ControlLoop: Send + Sync {
    /// Push caller-supplied parameters ahead of the next run.
    fn set_parameters(&self, params: &CaptureParams) -> Result<(), PipelineError>;

    /// Run the control algorithm for `request_id` targeting
    /// `applying_seq` (negative when no target was resolved). Returns
    /// the predicted effective sequence on devices with a capture-timing
    /// source.
    fn run(&self, request_id: i64, applying_seq: i64) -> Result<Option<i64>, PipelineError>;
}

/// One admitted capture request.
///
/// # Example
/// ```rust
/// use cadence::prelude::{CameraRequest, OutputBuffer, StreamUsage};
///
/// let request = CameraRequest::new(
///     [OutputBuffer::new(0, StreamUsage::Preview, 1)].into_iter().collect(),
/// );
/// assert_eq!(request.buffers.len(), 1);
/// ```
pub struct CameraRequest {
    /// Output buffers, at most one per configured stream.
    pub buffers: BufferList,
    /// Optional snapshot of capture parameters for this request.
    pub params: Option<Arc<CaptureParams>>,
    first: bool,
}

impl CameraRequest {
    /// Request over the given buffer list with no parameter snapshot.
    pub fn new(buffers: BufferList) -> Self {
        Self {
            buffers,
            params: None,
            first: false,
        }
    }

    /// Attach a parameter snapshot.
    pub fn with_params(mut self, params: Arc<CaptureParams>) -> Self {
        self.params = Some(params);
        self
    }
}

struct ReqState {
    pending: VecDeque<CameraRequest>,
    inflight: usize,
    triggers: TriggerFlags,
    block_initial: bool,
    last_request_id: i64,
    last_effect_seq: i64,
    last_applied_seq: i64,
    last_sof_seq: i64,
}

impl ReqState {
    fn new(wait_first_stats: bool) -> Self {
        Self {
            pending: VecDeque::new(),
            inflight: 0,
            triggers: TriggerFlags::empty(),
            block_initial: wait_first_stats,
            last_request_id: -1,
            last_effect_seq: -1,
            last_applied_seq: -1,
            last_sof_seq: -1,
        }
    }

    /// Admission gate: do not process when the queue is empty, the
    /// initial-stats gate still holds past the warm-up requests, too
    /// many requests are in flight, or (per-frame control) no trigger
    /// is pending.
    fn blocked(&self, tunables: &PipelineTunables) -> bool {
        if self.pending.is_empty() {
            return true;
        }
        (self.block_initial && self.last_request_id >= tunables.initial_pending_count)
            || self.inflight >= tunables.max_requests_inflight
            || (tunables.per_frame_control && self.triggers.is_empty())
    }

    /// Per-frame-control target resolution. One request is processed per
    /// SOF period: a new SOF targets its own sequence, new stats target
    /// the next one, and a new request or frame-done targets the next
    /// one only when nothing is in flight.
    ///
    /// Returns `None` when the pending triggers resolve to no work this
    /// iteration (flags are consumed either way). The applied sequence
    /// advances before the staleness check: a skipped iteration still
    /// consumes its trigger and its sequence.
    fn resolve_target(&mut self, exposure_lag: i64) -> Option<i64> {
        let target = if self.triggers.contains(TriggerFlags::CAPTURE_START)
            && self.last_sof_seq > self.last_applied_seq
        {
            self.last_sof_seq
        } else if self.triggers.contains(TriggerFlags::STATS)
            && self.last_sof_seq >= self.last_applied_seq
        {
            self.last_sof_seq + 1
        } else if self
            .triggers
            .intersects(TriggerFlags::NEW_REQUEST | TriggerFlags::FRAME_DONE)
            && self.inflight == 0
        {
            self.last_sof_seq + 1
        } else {
            self.triggers = TriggerFlags::empty();
            return None;
        };

        self.last_applied_seq = target;
        if target + exposure_lag <= self.last_effect_seq {
            self.triggers = TriggerFlags::empty();
            debug!(
                target,
                last_effect = self.last_effect_seq,
                "skip request, result would be stale"
            );
            return None;
        }

        trace!(
            triggers = ?self.triggers,
            sof = self.last_sof_seq,
            target,
            inflight = self.inflight,
            "resolved request target"
        );
        Some(target)
    }
}

struct Inner {
    tunables: PipelineTunables,
    lifecycle: Lifecycle,
    streaming: AtomicBool,
    control: Arc<dyn ControlLoop>,
    params: ParamStore,
    listeners: RwLock<Vec<Arc<dyn DispatchListener>>>,
    state: Mutex<ReqState>,
    wake: Condvar,
    first_done: Mutex<bool>,
    first_signal: Condvar,
    frames: FrameRouter,
    dispatch_metrics: TimingMetrics,
}

/// Single-threaded event loop serializing new-request, frame-done,
/// statistics-ready, and capture-start signals into ordered admission
/// and dispatch decisions.
///
/// One instance per camera, owned by the device object. Collaborators
/// are reached through traits: the control algorithm via
/// [`ControlLoop`], the buffer-queueing layer via
/// [`DispatchListener`](crate::events::DispatchListener).
pub struct RequestThread {
    inner: Arc<Inner>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl RequestThread {
    /// New thread (not yet started) for a device with `stream_count`
    /// output streams.
    pub fn new(
        tunables: PipelineTunables,
        control: Arc<dyn ControlLoop>,
        stream_count: usize,
    ) -> Self {
        let block_initial = tunables.wait_first_stats;
        Self {
            inner: Arc::new(Inner {
                tunables,
                lifecycle: Lifecycle::new(),
                streaming: AtomicBool::new(false),
                control,
                params: ParamStore::new(PARAM_HISTORY),
                listeners: RwLock::new(Vec::new()),
                state: Mutex::new(ReqState::new(block_initial)),
                wake: Condvar::new(),
                first_done: Mutex::new(false),
                first_signal: Condvar::new(),
                frames: FrameRouter::new(stream_count),
                dispatch_metrics: TimingMetrics::default(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Register a dispatch listener (the buffer-queueing layer).
    pub fn add_listener(&self, listener: Arc<dyn DispatchListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Spawn the loop thread. Starting twice is a logged no-op.
    pub fn start(&self) -> Result<(), PipelineError> {
        if !self.inner.lifecycle.start() {
            warn!("request thread already started");
            return Ok(());
        }
        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name("cadence-request".into())
            .spawn(move || {
                debug!("request loop started");
                while inner.lifecycle.is_running() {
                    if !inner.loop_once() {
                        break;
                    }
                }
                debug!("request loop exited");
            })
            .map_err(|err| PipelineError::InvalidRequest(format!("spawn failed: {err}")))?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Queue a capture request for admission.
    ///
    /// The first submit after construction (or [`clear`](Self::clear))
    /// marks the pipeline streaming and flags the request so its
    /// dispatch releases the first-request gate.
    pub fn submit(&self, mut request: CameraRequest) -> Result<(), PipelineError> {
        if request.buffers.is_empty() {
            warn!("request with no output buffers rejected");
            return Err(PipelineError::InvalidRequest("no output buffers".into()));
        }

        let inner = &self.inner;
        let mut state = inner.state.lock();
        if !inner.streaming.swap(true, Ordering::AcqRel) {
            request.first = true;
            inner.frames.set_active(true);
            debug!("first request admitted");
        }
        if request.first && !request.buffers.iter().any(|b| b.usage.produces_stats()) {
            // No video path means no statistics will ever arrive.
            state.block_initial = false;
            debug!("first request has no video buffer, not gating on stats");
        }
        state.pending.push_back(request);

        if state.inflight == 0 || !inner.tunables.per_frame_control {
            state.triggers |= TriggerFlags::NEW_REQUEST;
            inner.wake.notify_one();
        }
        Ok(())
    }

    /// Feed one asynchronous pipeline signal into the loop's
    /// accumulator. Events are ignored until the first request arrives.
    pub fn on_event(&self, event: PipeEvent) {
        let inner = &self.inner;
        if !inner.streaming.load(Ordering::Acquire) {
            return;
        }

        match event {
            PipeEvent::FrameDone { stream_id } => {
                let mut state = inner.state.lock();
                if state.inflight > 0 {
                    state.inflight -= 1;
                }
                trace!(stream_id, inflight = state.inflight, "frame done");
                if !state.pending.is_empty() && state.inflight == 0 {
                    state.triggers |= TriggerFlags::FRAME_DONE;
                    inner.wake.notify_one();
                }
            }
            PipeEvent::StatsReady { sequence } => {
                let mut state = inner.state.lock();
                trace!(sequence, "statistics ready");
                if state.block_initial {
                    state.block_initial = false;
                }
                state.triggers |= TriggerFlags::STATS;
                inner.wake.notify_one();
            }
            PipeEvent::CaptureStart { sequence, .. } => {
                let mut state = inner.state.lock();
                state.last_sof_seq = sequence;
                if sequence > state.last_applied_seq {
                    state.triggers |= TriggerFlags::CAPTURE_START;
                    inner.wake.notify_one();
                }
            }
            PipeEvent::FrameAvailable { buffer } => {
                inner.frames.push(buffer);
            }
        }
    }

    /// Block until the stream's next completed frame (see
    /// [`FrameRouter::wait`](crate::frames::FrameRouter::wait)).
    pub fn wait_frame(
        &self,
        stream_id: usize,
        timeout: Option<Duration>,
    ) -> WaitOutcome<OutputBuffer> {
        let timeout = timeout.unwrap_or(self.inner.tunables.frame_wait);
        self.inner.frames.wait(stream_id, timeout)
    }

    /// Block until the first submitted request has been dispatched.
    ///
    /// Callers use this as the pipeline-readiness barrier after stream
    /// start.
    pub fn wait_first_request_done(&self) -> WaitOutcome<()> {
        let inner = &self.inner;
        let mut done = inner.first_done.lock();
        if *done {
            return WaitOutcome::Data(());
        }
        debug!("waiting for the first request to be dispatched");
        let timed_out = inner
            .first_signal
            .wait_for(&mut done, inner.tunables.first_request_wait)
            .timed_out();
        if *done {
            return WaitOutcome::Data(());
        }
        match inner.lifecycle.state() {
            LifecycleState::Stopping | LifecycleState::Stopped => WaitOutcome::NotInitialized,
            _ => {
                if timed_out {
                    error!("first request wait timed out");
                }
                WaitOutcome::TimedOut
            }
        }
    }

    /// Per-frame parameter store keyed by effective sequence.
    pub fn params(&self) -> &ParamStore {
        &self.inner.params
    }

    /// Dispatch timing metrics.
    pub fn dispatch_metrics(&self) -> TimingMetrics {
        self.inner.dispatch_metrics.clone()
    }

    /// Drop all pending/queued work and reset sequence tracking to the
    /// unestablished state (stream stop without tearing the thread
    /// down).
    pub fn clear(&self) {
        debug!("clearing requests");
        let inner = &self.inner;
        inner.streaming.store(false, Ordering::Release);
        inner.frames.clear();
        {
            let mut state = inner.state.lock();
            state.pending.clear();
            state.inflight = 0;
            state.triggers = TriggerFlags::empty();
            state.last_request_id = -1;
            state.last_effect_seq = -1;
            state.last_applied_seq = -1;
            state.last_sof_seq = -1;
            state.block_initial = inner.tunables.wait_first_stats;
        }
        *inner.first_done.lock() = false;
        inner.params.clear();
    }

    /// Clear outstanding work, cancel the loop, and join the thread.
    pub fn stop(&self) {
        self.clear();
        let inner = &self.inner;
        if inner.lifecycle.begin_stop() {
            {
                let _state = inner.state.lock();
                inner.wake.notify_all();
            }
            {
                let _done = inner.first_done.lock();
                inner.first_signal.notify_all();
            }
            if let Some(handle) = self.worker.lock().take() {
                let _ = handle.join();
            }
            inner.lifecycle.finish_stop();
        }
    }
}

impl Drop for RequestThread {
    fn drop(&mut self) {
        // Best-effort shutdown if the owner forgot to stop.
        self.stop();
    }
}

impl Inner {
    /// One loop iteration. Returns false only when teardown was
    /// observed.
    fn loop_once(&self) -> bool {
        let mut applying_seq = -1i64;
        {
            let mut state = self.state.lock();
            if state.blocked(&self.tunables) {
                let timed_out = self
                    .wake
                    .wait_for(&mut state, self.tunables.request_wait)
                    .timed_out();
                if !self.lifecycle.is_running() {
                    return false;
                }
                if timed_out {
                    trace!(
                        inflight = state.inflight,
                        pending = state.pending.len(),
                        "request wait timed out"
                    );
                    return true;
                }
                if state.blocked(&self.tunables) {
                    trace!(
                        block_initial = state.block_initial,
                        inflight = state.inflight,
                        "still gated after wake"
                    );
                    state.triggers = TriggerFlags::empty();
                    return true;
                }
            }

            if self.tunables.per_frame_control && !state.triggers.is_empty() {
                match state.resolve_target(self.tunables.exposure_lag) {
                    Some(target) => applying_seq = target,
                    None => return true,
                }
            }
        }

        if !self.streaming.load(Ordering::Acquire) {
            return true;
        }

        if let Some(request) = self.fetch_next() {
            self.handle_request(request, applying_seq);
            self.state.lock().triggers = TriggerFlags::empty();
        }
        true
    }

    fn fetch_next(&self) -> Option<CameraRequest> {
        let mut state = self.state.lock();
        let request = state.pending.pop_front()?;
        state.inflight += 1;
        trace!(inflight = state.inflight, "request fetched");
        Some(request)
    }

    fn handle_request(&self, request: CameraRequest, applying_seq: i64) {
        let started = Instant::now();
        let mut effect_seq = self.state.lock().last_effect_seq + 1;

        let reprocess = request.buffers.first().is_some_and(|b| b.is_reprocess());
        if reprocess {
            // Reprocessing carries its own capture identity; the control
            // algorithm is not re-run.
            effect_seq = request.buffers[0].sequence;
            if let Some(params) = &request.params {
                self.params.update(effect_seq, params.clone());
            }
            debug!(
                sequence = effect_seq,
                buffers = request.buffers.len(),
                "reprocess request"
            );
        } else {
            let request_id = {
                let mut state = self.state.lock();
                if self.streaming.load(Ordering::Acquire) {
                    state.last_request_id += 1;
                    Some(state.last_request_id)
                } else {
                    None
                }
            };

            if let Some(id) = request_id {
                if let Some(params) = &request.params
                    && let Err(err) = self.control.set_parameters(params)
                {
                    warn!(error = %err, "control parameter push failed");
                }
                match self.control.run(id, applying_seq) {
                    Ok(Some(predicted)) if self.tunables.has_timing_source => {
                        effect_seq = predicted;
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, request_id = id, "control run failed"),
                }
            }

            {
                let mut state = self.state.lock();
                if !self.streaming.load(Ordering::Acquire) {
                    return;
                }
                if effect_seq <= state.last_effect_seq {
                    // Accepted timing jitter from the control algorithm.
                    debug!(
                        predicted = effect_seq,
                        last_effect = state.last_effect_seq,
                        "effective sequence did not advance"
                    );
                }
                self.params
                    .save(effect_seq, state.last_request_id, request.params.clone());
                state.last_effect_seq = effect_seq;
                debug!(
                    request_id = state.last_request_id,
                    sequence = effect_seq,
                    buffers = request.buffers.len(),
                    "request processed"
                );
            }
        }

        let event = DispatchEvent {
            buffers: request.buffers.clone(),
            sequence: effect_seq,
            test_pattern: request
                .params
                .as_ref()
                .map(|p| p.test_pattern)
                .unwrap_or_default(),
        };
        for listener in self.listeners.read().iter() {
            listener.on_dispatch(&event);
        }
        self.dispatch_metrics.record(started.elapsed());

        if request.first {
            let mut done = self.first_done.lock();
            if !*done {
                *done = true;
                info!("first request done");
                self.first_signal.notify_all();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StreamUsage;
    use crate::params::TestPatternMode;
    use smallvec::smallvec;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeControl {
        runs: StdMutex<Vec<(i64, i64)>>,
        predict: StdMutex<Option<i64>>,
        pushed: StdMutex<Vec<CaptureParams>>,
    }

    impl FakeControl {
        fn predict(&self, seq: i64) {
            *self.predict.lock().unwrap() = Some(seq);
        }

        fn runs(&self) -> Vec<(i64, i64)> {
            self.runs.lock().unwrap().clone()
        }
    }

    impl ControlLoop for FakeControl {
        fn set_parameters(&self, params: &CaptureParams) -> Result<(), PipelineError> {
            self.pushed.lock().unwrap().push(params.clone());
            Ok(())
        }

        fn run(&self, request_id: i64, applying_seq: i64) -> Result<Option<i64>, PipelineError> {
            self.runs.lock().unwrap().push((request_id, applying_seq));
            Ok(*self.predict.lock().unwrap())
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: StdMutex<Vec<DispatchEvent>>,
    }

    impl Recorder {
        fn sequences(&self) -> Vec<i64> {
            self.events.lock().unwrap().iter().map(|e| e.sequence).collect()
        }

        fn len(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    impl DispatchListener for Recorder {
        fn on_dispatch(&self, event: &DispatchEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn buffers(usage: StreamUsage) -> BufferList {
        smallvec![OutputBuffer::new(0, usage, 1)]
    }

    fn wait_until(mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if check() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached in time");
    }

    fn tunables(per_frame: bool) -> PipelineTunables {
        PipelineTunables::builder()
            .per_frame_control(per_frame)
            .wait_first_stats(false)
            .exposure_lag(2)
            .request_wait(Duration::from_millis(50))
            .build()
    }

    #[test]
    fn admission_gate_rules() {
        let t = tunables(false);
        let mut state = ReqState::new(false);
        assert!(state.blocked(&t), "empty queue blocks");

        state.pending.push_back(CameraRequest::new(buffers(StreamUsage::Preview)));
        assert!(!state.blocked(&t));

        state.inflight = t.max_requests_inflight;
        assert!(state.blocked(&t), "in-flight cap blocks");
        state.inflight = 0;

        state.block_initial = true;
        state.last_request_id = t.initial_pending_count;
        assert!(state.blocked(&t), "initial-stats gate blocks past warm-up");
        state.last_request_id = t.initial_pending_count - 1;
        assert!(!state.blocked(&t), "warm-up requests pass the gate");
    }

    #[test]
    fn per_frame_gate_needs_trigger() {
        let t = tunables(true);
        let mut state = ReqState::new(false);
        state.pending.push_back(CameraRequest::new(buffers(StreamUsage::Preview)));
        assert!(state.blocked(&t), "no trigger flag blocks");
        state.triggers |= TriggerFlags::STATS;
        assert!(!state.blocked(&t));
    }

    #[test]
    fn capture_start_outranks_stats() {
        // Events: new-request, capture-start(5), stats-ready, with
        // last-applied 4. The resolved target must be 5, not 6.
        let mut state = ReqState::new(false);
        state.last_applied_seq = 4;
        state.last_sof_seq = 5;
        state.triggers =
            TriggerFlags::NEW_REQUEST | TriggerFlags::CAPTURE_START | TriggerFlags::STATS;
        assert_eq!(state.resolve_target(2), Some(5));
        assert_eq!(state.last_applied_seq, 5);
    }

    #[test]
    fn stats_target_next_sequence() {
        let mut state = ReqState::new(false);
        state.last_applied_seq = 5;
        state.last_sof_seq = 5;
        state.triggers = TriggerFlags::STATS;
        assert_eq!(state.resolve_target(2), Some(6));
    }

    #[test]
    fn request_trigger_requires_idle_pipe() {
        let mut state = ReqState::new(false);
        state.last_sof_seq = 7;
        state.inflight = 1;
        state.triggers = TriggerFlags::NEW_REQUEST;
        assert_eq!(state.resolve_target(2), None);
        assert!(state.triggers.is_empty(), "unresolvable triggers consumed");

        state.inflight = 0;
        state.triggers = TriggerFlags::NEW_REQUEST;
        assert_eq!(state.resolve_target(2), Some(8));
    }

    #[test]
    fn target_never_regresses_after_capture_start() {
        let mut state = ReqState::new(false);
        state.last_applied_seq = 9;
        state.last_sof_seq = 12;
        state.triggers = TriggerFlags::CAPTURE_START;
        assert_eq!(state.resolve_target(2), Some(12));

        // A stale redelivered SOF below the applied sequence resolves
        // nothing rather than regressing.
        state.last_sof_seq = 11;
        state.triggers = TriggerFlags::CAPTURE_START;
        assert_eq!(state.resolve_target(2), None);
        assert_eq!(state.last_applied_seq, 12);
    }

    #[test]
    fn stale_targets_are_skipped() {
        let mut state = ReqState::new(false);
        state.last_sof_seq = 10;
        state.last_applied_seq = 9;
        state.last_effect_seq = 13;
        state.triggers = TriggerFlags::CAPTURE_START;
        // 10 + lag 2 <= 13: the result could never land.
        assert_eq!(state.resolve_target(2), None);
        assert_eq!(state.last_applied_seq, 10, "skip still consumes the sequence");
    }

    #[test]
    fn dispatches_and_releases_first_request_gate() {
        let control = Arc::new(FakeControl::default());
        let recorder = Arc::new(Recorder::default());
        let thread = RequestThread::new(tunables(false), control.clone(), 2);
        thread.add_listener(recorder.clone());
        thread.start().unwrap();

        thread
            .submit(CameraRequest::new(buffers(StreamUsage::Preview)))
            .unwrap();
        wait_until(|| recorder.len() == 1);

        assert_eq!(thread.wait_first_request_done(), WaitOutcome::Data(()));
        assert_eq!(control.runs(), vec![(0, -1)]);
        // No prediction from control: default effect sequence is 0.
        assert_eq!(recorder.sequences(), vec![0]);
        assert!(thread.params().get(0).is_none(), "no params were attached");
        thread.stop();
    }

    #[test]
    fn per_frame_capture_start_drives_target() {
        let control = Arc::new(FakeControl::default());
        let recorder = Arc::new(Recorder::default());
        let thread = RequestThread::new(tunables(true), control.clone(), 2);
        thread.add_listener(recorder.clone());
        thread.start().unwrap();

        // First request dispatches off its own NEW_REQUEST trigger.
        thread
            .submit(CameraRequest::new(buffers(StreamUsage::Preview)))
            .unwrap();
        wait_until(|| recorder.len() == 1);
        assert_eq!(control.runs(), vec![(0, 0)]);
        // Let the loop finish consuming the dispatch's trigger flags.
        std::thread::sleep(Duration::from_millis(20));

        // Second request sits (one in flight, no trigger) until a
        // capture-start strictly above the applied sequence arrives.
        thread
            .submit(CameraRequest::new(buffers(StreamUsage::Preview)))
            .unwrap();
        thread.on_event(PipeEvent::CaptureStart {
            sequence: 5,
            timestamp_us: 1_000,
        });
        wait_until(|| recorder.len() == 2);
        assert_eq!(control.runs(), vec![(0, 0), (1, 5)]);
        thread.stop();
    }

    #[test]
    fn predicted_sequence_keys_param_store() {
        let control = Arc::new(FakeControl::default());
        control.predict(17);
        let recorder = Arc::new(Recorder::default());
        let thread = RequestThread::new(tunables(false), control.clone(), 2);
        thread.add_listener(recorder.clone());
        thread.start().unwrap();

        let params = Arc::new(CaptureParams {
            test_pattern: TestPatternMode::ColorBars,
            ..CaptureParams::default()
        });
        thread
            .submit(CameraRequest::new(buffers(StreamUsage::Preview)).with_params(params))
            .unwrap();
        wait_until(|| recorder.len() == 1);

        assert_eq!(recorder.sequences(), vec![17]);
        let event = recorder.events.lock().unwrap()[0].clone();
        assert_eq!(event.test_pattern, TestPatternMode::ColorBars);
        assert_eq!(
            thread.params().get(17).unwrap().test_pattern,
            TestPatternMode::ColorBars
        );
        assert_eq!(thread.params().request_id(17), Some(0));
        thread.stop();
    }

    #[test]
    fn reprocess_skips_control_loop() {
        let control = Arc::new(FakeControl::default());
        let recorder = Arc::new(Recorder::default());
        let thread = RequestThread::new(tunables(false), control.clone(), 2);
        thread.add_listener(recorder.clone());
        thread.start().unwrap();

        let mut buffer = OutputBuffer::new(0, StreamUsage::StillCapture, 3);
        buffer.sequence = 42;
        buffer.timestamp_us = 9_000;
        thread
            .submit(
                CameraRequest::new(smallvec![buffer])
                    .with_params(Arc::new(CaptureParams::default())),
            )
            .unwrap();
        wait_until(|| recorder.len() == 1);

        assert!(control.runs().is_empty(), "control loop must not run");
        assert_eq!(recorder.sequences(), vec![42]);
        assert!(thread.params().get(42).is_some());
        thread.stop();
    }

    #[test]
    fn frame_done_admits_next_request() {
        let control = Arc::new(FakeControl::default());
        let recorder = Arc::new(Recorder::default());
        let thread = RequestThread::new(tunables(true), control.clone(), 2);
        thread.add_listener(recorder.clone());
        thread.start().unwrap();

        thread
            .submit(CameraRequest::new(buffers(StreamUsage::Preview)))
            .unwrap();
        wait_until(|| recorder.len() == 1);
        // Let the loop finish consuming the dispatch's trigger flags.
        std::thread::sleep(Duration::from_millis(20));

        thread
            .submit(CameraRequest::new(buffers(StreamUsage::Preview)))
            .unwrap();
        // Returning the in-flight frame both decrements the count and
        // raises the FRAME_DONE trigger.
        thread.on_event(PipeEvent::FrameDone { stream_id: 0 });
        wait_until(|| recorder.len() == 2);
        thread.stop();
    }

    #[test]
    fn frame_available_reaches_stream_consumer() {
        let control = Arc::new(FakeControl::default());
        let thread = RequestThread::new(tunables(false), control, 2);
        thread.start().unwrap();
        thread
            .submit(CameraRequest::new(buffers(StreamUsage::Preview)))
            .unwrap();

        let mut done = OutputBuffer::new(1, StreamUsage::VideoCapture, 55);
        done.sequence = 3;
        done.timestamp_us = 100;
        thread.on_event(PipeEvent::FrameAvailable { buffer: done });

        match thread.wait_frame(1, Some(Duration::from_millis(200))) {
            WaitOutcome::Data(buffer) => assert_eq!(buffer.cookie, 55),
            other => panic!("unexpected outcome {other:?}"),
        }
        thread.stop();
    }

    #[test]
    fn stop_wakes_blocked_waiters() {
        let control = Arc::new(FakeControl::default());
        let thread = Arc::new(RequestThread::new(tunables(false), control, 1));
        thread.start().unwrap();
        thread
            .submit(CameraRequest::new(buffers(StreamUsage::Preview)))
            .unwrap();

        let waiter = {
            let thread = thread.clone();
            std::thread::spawn(move || thread.wait_frame(0, Some(Duration::from_secs(10))))
        };
        std::thread::sleep(Duration::from_millis(30));
        thread.stop();
        assert_eq!(waiter.join().unwrap(), WaitOutcome::NotInitialized);
    }

    #[test]
    fn events_before_first_request_are_ignored() {
        let control = Arc::new(FakeControl::default());
        let thread = RequestThread::new(tunables(true), control, 1);
        thread.start().unwrap();
        thread.on_event(PipeEvent::CaptureStart {
            sequence: 4,
            timestamp_us: 0,
        });
        assert_eq!(thread.inner.state.lock().last_sof_seq, -1);
        thread.stop();
    }
}
