//! Run results - per-node status, execution history and the final outcome

use crate::core::{NodeId, Value};
use crate::error::RunError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifies one run of a graph within an executor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Errored,
    Skipped,
    Interrupted,
}

impl NodeStatus {
    /// No further transition happens without a loop re-entry
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Errored | Self::Skipped | Self::Interrupted
        )
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed(RunError),
    Interrupted,
}

/// A single execution of a node. Loop bodies get one per iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRun {
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub outcome: NodeStatus,
}

/// Everything a run recorded about one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub status: NodeStatus,
    pub runs: Vec<NodeRun>,
    pub error: Option<RunError>,
    /// Values from the node's last committed execution
    pub outputs: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Graph outputs that committed, keyed by graph output id
    pub outputs: HashMap<String, Value>,
    pub nodes: HashMap<NodeId, NodeRecord>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn error(&self) -> Option<&RunError> {
        match &self.status {
            RunStatus::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn output(&self, id: &str) -> Option<&Value> {
        self.outputs.get(id)
    }

    pub fn node(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.get(&NodeId::new(id))
    }

    pub fn node_status(&self, id: &str) -> Option<NodeStatus> {
        self.node(id).map(|record| record.status)
    }

    /// How many times `id` was dispatched
    pub fn executions(&self, id: &str) -> usize {
        self.node(id).map(|record| record.runs.len()).unwrap_or(0)
    }
}

/// Accumulates execution history while a run is in flight
#[derive(Debug, Default)]
pub(crate) struct RunLog {
    runs: HashMap<NodeId, Vec<NodeRun>>,
}

impl RunLog {
    pub fn start_node(&mut self, node: &NodeId) {
        self.runs.entry(node.clone()).or_default().push(NodeRun {
            started: Utc::now(),
            ended: None,
            outcome: NodeStatus::Running,
        });
    }

    pub fn end_node(&mut self, node: &NodeId, outcome: NodeStatus) {
        if let Some(last) = self.runs.get_mut(node).and_then(|runs| runs.last_mut()) {
            last.ended = Some(Utc::now());
            last.outcome = outcome;
        }
    }

    pub fn take(&mut self, node: &NodeId) -> Vec<NodeRun> {
        self.runs.remove(node).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_log_tracks_each_execution() {
        let mut log = RunLog::default();
        let node = NodeId::new("step");

        log.start_node(&node);
        log.end_node(&node, NodeStatus::Succeeded);
        log.start_node(&node);

        let runs = log.take(&node);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].outcome, NodeStatus::Succeeded);
        assert!(runs[0].ended.is_some());
        assert_eq!(runs[1].outcome, NodeStatus::Running);
        assert!(log.take(&node).is_empty());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&RunStatus::Interrupted).unwrap();
        assert!(json.contains("interrupted"));
        assert_eq!(serde_json::to_string(&NodeStatus::Skipped).unwrap(), "\"skipped\"");
        assert_eq!(RunId(3).to_string(), "run-3");
        assert!(NodeStatus::Interrupted.is_terminal());
        assert!(!NodeStatus::Ready.is_terminal());
    }
}
