//! The durable run record and the read-only view the engine exposes.
//!
//! A [`RunRecord`] holds every node attempt ever recorded for a run. The
//! [`RunState`] view keeps only the latest attempt per node, which is what
//! callers of `get_run_state` see.

use crate::definition::WorkflowSnapshot;
use crate::execution::{AttemptKey, NodeResult, NodeStatus, RunStatus};
use crate::graph::GraphSnapshot;
use crate::item::Item;
use crate::node::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use weft_core::{AccountId, WorkflowId, WorkflowRunId, WorkflowVersionId};

/// Attempts of one node, keyed by attempt.
pub type NodeAttempts = BTreeMap<AttemptKey, NodeResult>;

/// Everything persisted about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    pub workflow_version_id: WorkflowVersionId,
    /// Account charged for the run and its nodes.
    pub account_id: AccountId,
    pub status: RunStatus,
    /// The graph the run executes; resume rebuilds from this.
    pub graph_snapshot: GraphSnapshot,
    #[serde(default)]
    pub trigger_input: Option<JsonValue>,
    #[serde(default)]
    pub node_results: BTreeMap<NodeId, NodeAttempts>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the run is sealed; no writes are accepted afterwards.
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Creates a pending record for a new run.
    #[must_use]
    pub fn new(
        account_id: AccountId,
        workflow: &WorkflowSnapshot,
        trigger_input: Option<JsonValue>,
    ) -> Self {
        Self {
            id: WorkflowRunId::new(),
            workflow_id: workflow.workflow_id,
            workflow_version_id: workflow.version_id,
            account_id,
            status: RunStatus::Pending,
            graph_snapshot: workflow.graph.clone(),
            trigger_input,
            node_results: BTreeMap::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Returns true once the run no longer accepts writes.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Records a node result unless it would regress an existing one.
    ///
    /// Returns whether the result was applied.
    pub fn apply_node_result(
        &mut self,
        node_id: NodeId,
        attempt: AttemptKey,
        result: NodeResult,
    ) -> bool {
        let attempts = self.node_results.entry(node_id).or_default();
        match attempts.get(&attempt) {
            Some(existing) if !result.supersedes(existing) => false,
            _ => {
                attempts.insert(attempt, result);
                true
            }
        }
    }

    /// Returns the recorded result for one attempt.
    #[must_use]
    pub fn node_result(&self, node_id: NodeId, attempt: AttemptKey) -> Option<&NodeResult> {
        self.node_results.get(&node_id)?.get(&attempt)
    }

    /// Returns the latest attempt of a node.
    #[must_use]
    pub fn latest(&self, node_id: NodeId) -> Option<(AttemptKey, &NodeResult)> {
        self.node_results
            .get(&node_id)?
            .iter()
            .next_back()
            .map(|(attempt, result)| (*attempt, result))
    }

    /// Builds the latest-attempt view.
    #[must_use]
    pub fn state(&self) -> RunState {
        let mut node_results = BTreeMap::new();
        let mut attempts = BTreeMap::new();
        for node_id in self.node_results.keys() {
            if let Some((attempt, result)) = self.latest(*node_id) {
                node_results.insert(*node_id, result.clone());
                attempts.insert(*node_id, attempt);
            }
        }
        RunState {
            run_id: self.id,
            workflow_id: self.workflow_id,
            workflow_version_id: self.workflow_version_id,
            status: self.status,
            node_results,
            attempts,
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// A run as seen by callers: status plus the latest result per node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    pub workflow_version_id: WorkflowVersionId,
    pub status: RunStatus,
    pub node_results: BTreeMap<NodeId, NodeResult>,
    /// Which attempt each entry of `node_results` came from.
    pub attempts: BTreeMap<NodeId, AttemptKey>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// Status of a node's latest attempt.
    #[must_use]
    pub fn node_status(&self, node_id: NodeId) -> Option<NodeStatus> {
        self.node_results.get(&node_id).map(|r| r.status)
    }

    /// Items a node's latest attempt emitted on `port`.
    #[must_use]
    pub fn output(&self, node_id: NodeId, port: &str) -> &[Item] {
        self.node_results
            .get(&node_id)
            .and_then(|r| r.outputs.get(port))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns true if the run reached a terminal status.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> RunRecord {
        RunRecord::new(
            AccountId::new(),
            &WorkflowSnapshot::new("test", GraphSnapshot::new()),
            Some(json!({ "x": 1 })),
        )
    }

    #[test]
    fn new_record_is_pending_and_open() {
        let record = record();
        assert_eq!(record.status, RunStatus::Pending);
        assert!(!record.is_sealed());
        assert!(record.node_results.is_empty());
    }

    #[test]
    fn same_attempt_overwrites_instead_of_duplicating() {
        let mut record = record();
        let node = NodeId::new();
        let now = Utc::now();
        assert!(record.apply_node_result(node, AttemptKey::FIRST, NodeResult::running(now)));
        let done = NodeResult::success(BTreeMap::new(), None, now);
        assert!(record.apply_node_result(node, AttemptKey::FIRST, done.clone()));
        assert!(record.apply_node_result(node, AttemptKey::FIRST, done));
        assert_eq!(record.node_results[&node].len(), 1);
    }

    #[test]
    fn late_running_write_does_not_regress() {
        let mut record = record();
        let node = NodeId::new();
        let now = Utc::now();
        record.apply_node_result(node, AttemptKey::FIRST, NodeResult::failed("x", now));
        assert!(!record.apply_node_result(node, AttemptKey::FIRST, NodeResult::running(now)));
        assert_eq!(
            record.node_result(node, AttemptKey::FIRST).map(|r| r.status),
            Some(NodeStatus::Failed)
        );
    }

    #[test]
    fn state_shows_latest_attempt() {
        let mut record = record();
        let node = NodeId::new();
        let now = Utc::now();
        let mut outputs = BTreeMap::new();
        outputs.insert("main".to_string(), vec![Item::new(json!({ "n": 2 }))]);
        record.apply_node_result(node, AttemptKey(0), NodeResult::success(BTreeMap::new(), None, now));
        record.apply_node_result(node, AttemptKey(1), NodeResult::success(outputs, None, now));

        let state = record.state();
        assert_eq!(state.attempts[&node], AttemptKey(1));
        assert_eq!(state.output(node, "main")[0].get("n"), Some(&json!(2)));
        assert!(state.output(node, "other").is_empty());
        assert_eq!(state.node_status(node), Some(NodeStatus::Success));
    }
}
