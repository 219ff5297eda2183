//! Per-node job slot tracking

use std::collections::HashMap;
use tracing::{debug, warn};
use volsched_core::{NodeId, SchedulerConfig};

/// How the cluster-reported maximum becomes the effective per-node limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    /// Slots per node kept free for restores
    pub reserve: u32,
    /// Maximum assumed when the cluster reports none
    pub default_max: u32,
    /// Lowest limit the reserve may leave
    pub min_limit: u32,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            reserve: 2,
            default_max: 8,
            min_limit: 1,
        }
    }
}

impl LimitPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            reserve: config.reserve,
            default_max: config.default_max_jobs_per_node,
            min_limit: config.min_limit,
        }
    }

    /// Effective per-node ceiling for a cluster-reported maximum
    ///
    /// A maximum of zero or below means the cluster reported no limit.
    pub fn effective_limit(&self, cluster_max: i64) -> u32 {
        let max = if cluster_max > 0 {
            u32::try_from(cluster_max).unwrap_or(u32::MAX)
        } else {
            self.default_max
        };
        max.saturating_sub(self.reserve).max(self.min_limit.max(1))
    }
}

/// Tracks active backup jobs per node against a single cluster-wide limit
#[derive(Debug)]
pub struct NodeCapacityTracker {
    limit: u32,
    active: HashMap<NodeId, u32>,
}

impl NodeCapacityTracker {
    /// Create a tracker with the given effective limit
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            active: HashMap::new(),
        }
    }

    /// Create a tracker from the cluster-reported maximum
    pub fn from_cluster_max(policy: &LimitPolicy, cluster_max: i64) -> Self {
        Self::new(policy.effective_limit(cluster_max))
    }

    /// Effective per-node limit
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Number of jobs currently active on a node
    pub fn active_count(&self, node: NodeId) -> u32 {
        self.active.get(&node).copied().unwrap_or(0)
    }

    /// Whether one more job fits on the node
    pub fn can_admit(&self, node: NodeId) -> bool {
        self.active_count(node) < self.limit
    }

    /// Record a job started on the node
    pub fn on_admit(&mut self, node: NodeId) {
        let count = self.active.entry(node).or_insert(0);
        *count += 1;
        if *count > self.limit {
            warn!(node_id = node, active = *count, limit = self.limit, "Node over limit");
        }
        debug!(node_id = node, active = *count, limit = self.limit, "Slot taken");
    }

    /// Record a job finished on the node
    pub fn on_complete(&mut self, node: NodeId) {
        match self.active.get_mut(&node) {
            Some(count) if *count > 0 => {
                *count -= 1;
                debug!(node_id = node, active = *count, "Slot released");
                if *count == 0 {
                    self.active.remove(&node);
                }
            }
            _ => warn!(node_id = node, "Release on node without active jobs ignored"),
        }
    }

    /// Jobs active across all nodes
    pub fn total_active(&self) -> u32 {
        self.active.values().sum()
    }

    /// Per-node active counts, sorted by node
    pub fn snapshot(&self) -> Vec<(NodeId, u32)> {
        let mut counts: Vec<(NodeId, u32)> = self.active.iter().map(|(n, c)| (*n, *c)).collect();
        counts.sort_unstable();
        counts
    }
}
