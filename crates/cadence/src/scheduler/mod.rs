//! Policy-driven dependency-graph runner.
//!
//! Each configured executor owns an ordered set of processing nodes and
//! a dedicated thread. Executors are driven either by external events
//! (via [`CameraScheduler::execute_node`]) or by an upstream executor
//! finishing a tick; the tick value travels unchanged along the chain.
//! Triggers coalesce: only the most recent unconsumed tick is retained
//! per executor, so slow consumers skip intermediate ticks instead of
//! queueing unbounded work.

pub mod policy;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use cadence_core::prelude::{
    Lifecycle, MailboxRx, MailboxTx, Metrics, RecvOutcome, latest,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::errors::PipelineError;
use crate::metrics::TimingMetrics;
use crate::tunables::PipelineTunables;

pub use policy::{ExecutorDesc, GraphConfig, SchedulerPolicy};

/// A processing stage attachable to an executor.
///
/// `process` failures are logged by the executor and do not abort the
/// tick: remaining nodes and downstream propagation proceed unaffected.
pub trait SchedulerNode: Send + Sync {
    /// Name matched against the policy's declared node lists.
    fn name(&self) -> &str;

    /// Handle one trigger tick.
    fn process(&self, tick: i64) -> Result<(), PipelineError>;
}

struct ExecutorInner {
    name: String,
    lifecycle: Lifecycle,
    nodes: Mutex<Vec<Arc<dyn SchedulerNode>>>,
    listeners: RwLock<Vec<(String, MailboxTx<i64>)>>,
    wait: Duration,
    metrics: TimingMetrics,
}

struct Executor {
    inner: Arc<ExecutorInner>,
    tx: MailboxTx<i64>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Executor {
    fn spawn(name: &str, wait: Duration) -> Self {
        let (tx, rx) = latest::<i64>();
        let inner = Arc::new(ExecutorInner {
            name: name.to_string(),
            lifecycle: Lifecycle::new(),
            nodes: Mutex::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            wait,
            metrics: TimingMetrics::default(),
        });
        inner.lifecycle.start();

        let worker = {
            let inner = inner.clone();
            thread::Builder::new()
                .name(format!("cadence-exec-{name}"))
                .spawn(move || executor_loop(&inner, rx))
                .ok()
        };
        if worker.is_none() {
            error!(executor = name, "failed to spawn executor thread");
        }

        Self { inner, tx, worker }
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn add_node(&self, node: Arc<dyn SchedulerNode>) {
        let mut nodes = self.inner.nodes.lock();
        nodes.push(node);
        debug!(
            executor = %self.inner.name,
            position = nodes.len(),
            "node registered"
        );
    }

    fn remove_node(&self, name: &str) {
        let mut nodes = self.inner.nodes.lock();
        if let Some(pos) = nodes.iter().position(|n| n.name() == name) {
            nodes.remove(pos);
            debug!(executor = %self.inner.name, node = name, "node unregistered");
        }
    }

    fn add_listener(&self, name: &str, tx: MailboxTx<i64>) {
        self.inner
            .listeners
            .write()
            .push((name.to_string(), tx));
    }

    fn trigger(&self, tick: i64) {
        trace!(executor = %self.inner.name, tick, "triggered");
        let _ = self.tx.send(tick);
    }

    fn shutdown(mut self) {
        debug!(executor = %self.inner.name, "shutting down");
        self.inner.lifecycle.begin_stop();
        self.tx.close();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.inner.lifecycle.finish_stop();
    }
}

fn executor_loop(inner: &Arc<ExecutorInner>, rx: MailboxRx<i64>) {
    debug!(executor = %inner.name, "executor started");
    loop {
        match rx.recv_for(inner.wait) {
            RecvOutcome::Data(tick) => {
                if !inner.lifecycle.is_running() {
                    break;
                }
                let started = Instant::now();
                let nodes = inner.nodes.lock().clone();
                for node in &nodes {
                    trace!(executor = %inner.name, node = node.name(), tick, "process");
                    if let Err(err) = node.process(tick) {
                        warn!(
                            executor = %inner.name,
                            node = node.name(),
                            tick,
                            error = %err,
                            "node process failed"
                        );
                    }
                }
                for (listener, tx) in inner.listeners.read().iter() {
                    trace!(executor = %inner.name, listener = %listener, tick, "trigger listener");
                    let _ = tx.send(tick);
                }
                inner.metrics.record(started.elapsed());
            }
            RecvOutcome::Empty => {
                if !inner.lifecycle.is_running() {
                    break;
                }
                if !inner.nodes.lock().is_empty() {
                    warn!(executor = %inner.name, "wait trigger timed out");
                }
            }
            RecvOutcome::Closed => break,
        }
    }
    debug!(executor = %inner.name, "executor exited");
}

struct ExecutorGroup {
    trigger_source: String,
    node_names: Vec<String>,
    executor: Executor,
}

struct SchedState {
    groups: Vec<ExecutorGroup>,
    active_graph: Option<u32>,
}

/// Generic, policy-driven dependency-graph runner.
///
/// One instance per camera device. The wiring (which executor owns which
/// nodes, and which event or executor drives which) is data supplied by
/// a [`SchedulerPolicy`], never code.
///
/// # Example
/// ```rust
/// use cadence::prelude::{CameraScheduler, GraphConfig, PipelineTunables, SchedulerPolicy};
///
/// let policy = SchedulerPolicy::new(vec![
///     GraphConfig::new(100).executor("main", "stats", &["aiq"]),
/// ]);
/// let scheduler = CameraScheduler::new(policy, &PipelineTunables::default());
/// scheduler.configurate(100).unwrap();
/// scheduler.execute_node("stats", None);
/// ```
pub struct CameraScheduler {
    policy: SchedulerPolicy,
    executor_wait: Duration,
    trigger_count: AtomicI64,
    state: Mutex<SchedState>,
}

impl CameraScheduler {
    /// Scheduler over a policy; no executors exist until
    /// [`configurate`](Self::configurate) selects a graph.
    pub fn new(policy: SchedulerPolicy, tunables: &PipelineTunables) -> Self {
        Self {
            policy,
            executor_wait: tunables.executor_wait,
            trigger_count: AtomicI64::new(0),
            state: Mutex::new(SchedState {
                groups: Vec::new(),
                active_graph: None,
            }),
        }
    }

    /// Select a graph: tear down every existing executor (threads
    /// joined) and build the declared set. No partially-reconfigured
    /// state is ever observable; an unknown id leaves the current graph
    /// untouched.
    pub fn configurate(&self, graph_id: u32) -> Result<(), PipelineError> {
        let Some(config) = self.policy.config(graph_id) else {
            error!(graph_id, "no scheduler graph with this id");
            return Err(PipelineError::GraphUnknown(graph_id));
        };

        self.trigger_count.store(0, Ordering::Release);
        let mut state = self.state.lock();
        Self::teardown(&mut state);

        for desc in &config.executors {
            let executor = Executor::spawn(&desc.name, self.executor_wait);
            // A trigger source naming an earlier executor chains them.
            if let Some(upstream) = state
                .groups
                .iter()
                .find(|g| g.executor.name() == desc.trigger)
            {
                upstream
                    .executor
                    .add_listener(&desc.name, executor.tx.clone());
            }
            state.groups.push(ExecutorGroup {
                trigger_source: desc.trigger.clone(),
                node_names: desc.nodes.clone(),
                executor,
            });
        }
        state.active_graph = Some(graph_id);
        info!(graph_id, executors = state.groups.len(), "scheduler configured");
        Ok(())
    }

    /// Graph currently in effect.
    pub fn active_graph(&self) -> Option<u32> {
        self.state.lock().active_graph
    }

    /// Attach a node to the executor whose policy-declared node list
    /// contains its name. A name no executor declares is a reportable
    /// configuration error, not a panic.
    pub fn register_node(&self, node: Arc<dyn SchedulerNode>) -> Result<(), PipelineError> {
        let state = self.state.lock();
        let name = node.name().to_string();
        let Some(group) = state
            .groups
            .iter()
            .find(|g| g.node_names.iter().any(|n| *n == name))
        else {
            warn!(node = %name, "no executor declares this node");
            return Err(PipelineError::NodeUnknown(name));
        };
        group.executor.add_node(node);
        Ok(())
    }

    /// Detach a node wherever it is registered.
    pub fn unregister_node(&self, name: &str) {
        let state = self.state.lock();
        for group in &state.groups {
            group.executor.remove_node(name);
        }
    }

    /// External trigger entry point: signal every executor whose
    /// declared trigger source is `trigger_source`. Without an explicit
    /// tick the scheduler's own monotonic counter supplies one.
    pub fn execute_node(&self, trigger_source: &str, tick: Option<i64>) {
        let count = self.trigger_count.fetch_add(1, Ordering::AcqRel) + 1;
        let tick = tick.unwrap_or(count);
        let state = self.state.lock();
        for group in &state.groups {
            if group.trigger_source == trigger_source {
                group.executor.trigger(tick);
            }
        }
    }

    /// Tick-processing timing for an executor.
    pub fn tick_metrics(&self, executor: &str) -> Option<TimingMetrics> {
        let state = self.state.lock();
        state
            .groups
            .iter()
            .find(|g| g.executor.name() == executor)
            .map(|g| g.executor.inner.metrics.clone())
    }

    /// Trigger-mailbox counters for an executor (signals,
    /// supersessions).
    pub fn trigger_metrics(&self, executor: &str) -> Option<Metrics> {
        let state = self.state.lock();
        state
            .groups
            .iter()
            .find(|g| g.executor.name() == executor)
            .map(|g| g.executor.tx.metrics().clone())
    }

    /// Tear down all executors; threads are joined before returning.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        Self::teardown(&mut state);
        state.active_graph = None;
    }

    fn teardown(state: &mut SchedState) {
        for group in state.groups.drain(..) {
            group.executor.shutdown();
        }
    }
}

impl Drop for CameraScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;

    struct CountingNode {
        name: String,
        ticks: StdMutex<Vec<i64>>,
        delay: Duration,
        fail: bool,
    }

    impl CountingNode {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                ticks: StdMutex::new(Vec::new()),
                delay: Duration::ZERO,
                fail: false,
            })
        }

        fn slow(name: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                ticks: StdMutex::new(Vec::new()),
                delay,
                fail: false,
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                ticks: StdMutex::new(Vec::new()),
                delay: Duration::ZERO,
                fail: true,
            })
        }

        fn ticks(&self) -> Vec<i64> {
            self.ticks.lock().unwrap().clone()
        }
    }

    impl SchedulerNode for CountingNode {
        fn name(&self) -> &str {
            &self.name
        }

        fn process(&self, tick: i64) -> Result<(), PipelineError> {
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            self.ticks.lock().unwrap().push(tick);
            if self.fail {
                return Err(PipelineError::Node(self.name.clone()));
            }
            Ok(())
        }
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

    fn tunables() -> PipelineTunables {
        PipelineTunables::builder()
            .executor_wait(Duration::from_millis(100))
            .build()
    }

    fn two_stage_policy() -> SchedulerPolicy {
        SchedulerPolicy::new(vec![
            GraphConfig::new(100)
                .executor("isys", "sof", &["capture"])
                .executor("psys", "isys", &["isp"]),
            GraphConfig::new(200).executor("solo", "stats", &["aiq"]),
        ])
    }

    #[test]
    fn unknown_graph_is_rejected() {
        let scheduler = CameraScheduler::new(two_stage_policy(), &tunables());
        assert!(matches!(
            scheduler.configurate(999),
            Err(PipelineError::GraphUnknown(999))
        ));
        assert_eq!(scheduler.active_graph(), None);
    }

    #[test]
    fn unknown_node_registration_fails_softly() {
        let scheduler = CameraScheduler::new(two_stage_policy(), &tunables());
        scheduler.configurate(100).unwrap();
        let node = CountingNode::new("unheard-of");
        assert!(matches!(
            scheduler.register_node(node),
            Err(PipelineError::NodeUnknown(_))
        ));
    }

    #[test]
    fn trigger_reaches_matching_executors_only() {
        let scheduler = CameraScheduler::new(two_stage_policy(), &tunables());
        scheduler.configurate(100).unwrap();

        let capture = CountingNode::new("capture");
        let isp = CountingNode::new("isp");
        scheduler.register_node(capture.clone()).unwrap();
        scheduler.register_node(isp.clone()).unwrap();

        scheduler.execute_node("sof", Some(7));
        wait_until(|| capture.ticks() == vec![7]);
        // The chained psys executor receives the identical tick.
        wait_until(|| isp.ticks() == vec![7]);

        // A trigger source nobody declares reaches no one.
        scheduler.execute_node("unrelated", Some(9));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(capture.ticks(), vec![7]);
        assert_eq!(isp.ticks(), vec![7]);
    }

    #[test]
    fn counter_supplies_ticks_when_unspecified() {
        let scheduler = CameraScheduler::new(two_stage_policy(), &tunables());
        scheduler.configurate(200).unwrap();
        let aiq = CountingNode::new("aiq");
        scheduler.register_node(aiq.clone()).unwrap();

        scheduler.execute_node("stats", None);
        wait_until(|| aiq.ticks() == vec![1]);
        scheduler.execute_node("stats", None);
        wait_until(|| aiq.ticks() == vec![1, 2]);
    }

    #[test]
    fn node_failure_does_not_stop_tick() {
        let policy = SchedulerPolicy::new(vec![
            GraphConfig::new(1)
                .executor("up", "evt", &["bad", "good"])
                .executor("down", "up", &["sink"]),
        ]);
        let scheduler = CameraScheduler::new(policy, &tunables());
        scheduler.configurate(1).unwrap();

        let bad = CountingNode::failing("bad");
        let good = CountingNode::new("good");
        let sink = CountingNode::new("sink");
        scheduler.register_node(bad.clone()).unwrap();
        scheduler.register_node(good.clone()).unwrap();
        scheduler.register_node(sink.clone()).unwrap();

        scheduler.execute_node("evt", Some(3));
        wait_until(|| good.ticks() == vec![3]);
        wait_until(|| sink.ticks() == vec![3]);
        assert_eq!(bad.ticks(), vec![3]);
    }

    #[test]
    fn rapid_triggers_coalesce_to_latest() {
        let policy =
            SchedulerPolicy::new(vec![GraphConfig::new(1).executor("slow", "evt", &["worker"])]);
        let scheduler = CameraScheduler::new(policy, &tunables());
        scheduler.configurate(1).unwrap();

        let worker = CountingNode::slow("worker", Duration::from_millis(60));
        scheduler.register_node(worker.clone()).unwrap();

        scheduler.execute_node("evt", Some(1));
        wait_until(|| !worker.ticks().is_empty());
        // Burst while the worker is busy with tick 1.
        scheduler.execute_node("evt", Some(2));
        scheduler.execute_node("evt", Some(3));
        scheduler.execute_node("evt", Some(4));

        wait_until(|| worker.ticks().last() == Some(&4));
        let ticks = worker.ticks();
        assert!(
            !ticks.contains(&2) || !ticks.contains(&3),
            "intermediate ticks should have been superseded: {ticks:?}"
        );
        let metrics = scheduler.trigger_metrics("slow").unwrap();
        assert!(metrics.supersessions() >= 1);
    }

    #[test]
    fn reconfigure_tears_down_old_executors() {
        let scheduler = CameraScheduler::new(two_stage_policy(), &tunables());
        scheduler.configurate(100).unwrap();
        let capture = CountingNode::new("capture");
        scheduler.register_node(capture.clone()).unwrap();
        scheduler.execute_node("sof", Some(1));
        wait_until(|| capture.ticks() == vec![1]);

        scheduler.configurate(200).unwrap();
        assert_eq!(scheduler.active_graph(), Some(200));

        // The old graph's trigger source reaches nothing now; the old
        // node was dropped with its executor.
        scheduler.execute_node("sof", Some(2));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(capture.ticks(), vec![1]);

        // The node must be re-registered under the new graph to run.
        assert!(scheduler.register_node(capture.clone()).is_err());
    }

    #[test]
    fn unregistered_node_stops_processing() {
        let scheduler = CameraScheduler::new(two_stage_policy(), &tunables());
        scheduler.configurate(200).unwrap();
        let aiq = CountingNode::new("aiq");
        scheduler.register_node(aiq.clone()).unwrap();
        scheduler.execute_node("stats", Some(1));
        wait_until(|| aiq.ticks() == vec![1]);

        scheduler.unregister_node("aiq");
        scheduler.execute_node("stats", Some(2));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(aiq.ticks(), vec![1]);
    }

    #[test]
    fn nodes_run_in_registration_order() {
        let policy =
            SchedulerPolicy::new(vec![GraphConfig::new(1).executor("ord", "evt", &["n1", "n2"])]);
        let scheduler = CameraScheduler::new(policy, &tunables());
        scheduler.configurate(1).unwrap();

        let order = Arc::new(StdMutex::new(Vec::<&'static str>::new()));
        struct OrderNode {
            name: &'static str,
            order: Arc<StdMutex<Vec<&'static str>>>,
            seen: AtomicUsize,
        }
        impl SchedulerNode for OrderNode {
            fn name(&self) -> &str {
                self.name
            }
            fn process(&self, _tick: i64) -> Result<(), PipelineError> {
                self.order.lock().unwrap().push(self.name);
                self.seen.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
        let n1 = Arc::new(OrderNode {
            name: "n1",
            order: order.clone(),
            seen: AtomicUsize::new(0),
        });
        let n2 = Arc::new(OrderNode {
            name: "n2",
            order: order.clone(),
            seen: AtomicUsize::new(0),
        });
        scheduler.register_node(n1).unwrap();
        scheduler.register_node(n2).unwrap();

        scheduler.execute_node("evt", Some(1));
        wait_until(|| order.lock().unwrap().len() == 2);
        assert_eq!(*order.lock().unwrap(), vec!["n1", "n2"]);

        let metrics = scheduler.tick_metrics("ord").unwrap();
        assert_eq!(metrics.total_samples(), 1);
    }
}
