/// One executor's declaration: which processing nodes it owns (in
/// execution order) and what drives it.
///
/// `trigger` names either an external event source passed to
/// [`CameraScheduler::execute_node`](super::CameraScheduler::execute_node)
/// or another executor in the same graph, which chains the two.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutorDesc {
    pub name: String,
    pub nodes: Vec<String>,
    pub trigger: String,
}

/// A complete graph wiring for one stream configuration.
///
/// # Example
/// ```rust
/// use cadence::prelude::GraphConfig;
///
/// let config = GraphConfig::new(100)
///     .executor("isys", "sof", &["capture"])
///     .executor("psys", "isys", &["isp", "post"]);
/// assert_eq!(config.executors.len(), 2);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GraphConfig {
    pub graph_id: u32,
    pub executors: Vec<ExecutorDesc>,
}

impl GraphConfig {
    /// Empty graph with the given id.
    pub fn new(graph_id: u32) -> Self {
        Self {
            graph_id,
            executors: Vec::new(),
        }
    }

    /// Declare an executor. Declaration order matters twice: executors
    /// are created in it, and an executor can only chain to one declared
    /// before it.
    pub fn executor(
        mut self,
        name: impl Into<String>,
        trigger: impl Into<String>,
        nodes: &[&str],
    ) -> Self {
        self.executors.push(ExecutorDesc {
            name: name.into(),
            nodes: nodes.iter().map(|n| (*n).to_string()).collect(),
            trigger: trigger.into(),
        });
        self
    }
}

/// Pipeline wiring as data: the scheduler consults the policy, it never
/// hard-codes a topology.
///
/// # Example
/// ```rust
/// use cadence::prelude::{GraphConfig, SchedulerPolicy};
///
/// let policy = SchedulerPolicy::new(vec![
///     GraphConfig::new(100).executor("main", "stats", &["aiq"]),
/// ]);
/// assert_eq!(policy.default_graph(), Some(100));
/// assert!(policy.config(100).is_some());
/// assert!(policy.config(7).is_none());
/// ```
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchedulerPolicy {
    configs: Vec<GraphConfig>,
}

impl SchedulerPolicy {
    /// Policy over the given graph configurations.
    pub fn new(configs: Vec<GraphConfig>) -> Self {
        Self { configs }
    }

    /// The first declared graph, used when no explicit selection has
    /// been made.
    pub fn default_graph(&self) -> Option<u32> {
        self.configs.first().map(|c| c.graph_id)
    }

    /// Configuration for a graph id.
    pub fn config(&self, graph_id: u32) -> Option<&GraphConfig> {
        self.configs.iter().find(|c| c.graph_id == graph_id)
    }
}
