//! Per-node execution statistics

use crate::graph::{Node, NodeId, OpType};
use std::collections::BTreeMap;
use std::time::Duration;

/// Accumulated timings of one node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeStats {
    /// Operator type of the node
    pub op_type: OpType,
    /// Number of evaluations recorded
    pub calls: u64,
    /// Total wall time spent in the evaluator
    pub total: Duration,
}

impl NodeStats {
    /// Mean wall time per evaluation
    pub fn mean(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total / self.calls as u32
        }
    }
}

/// Statistics collected by executions that asked for them
#[derive(Clone, Debug, Default)]
pub struct ExecStats {
    nodes: BTreeMap<NodeId, NodeStats>,
}

impl ExecStats {
    pub(crate) fn record(&mut self, node: &Node, elapsed: Duration) {
        let entry = self.nodes.entry(node.id()).or_insert_with(|| NodeStats {
            op_type: node.op_type().clone(),
            calls: 0,
            total: Duration::ZERO,
        });
        entry.calls += 1;
        entry.total += elapsed;
    }

    /// Statistics of one node
    pub fn node(&self, id: NodeId) -> Option<&NodeStats> {
        self.nodes.get(&id)
    }

    /// All recorded nodes in execution order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &NodeStats)> {
        self.nodes.iter().map(|(id, s)| (*id, s))
    }

    /// Total wall time over all nodes
    pub fn total(&self) -> Duration {
        self.nodes.values().map(|s| s.total).sum()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Forget everything recorded so far
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
