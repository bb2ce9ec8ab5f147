//! Run state persistence.
//!
//! The scheduler appends every node result here before it derives new ready
//! nodes, so a crashed run can be resumed from what was recorded.

use crate::error::StoreError;
use crate::execution::{AttemptKey, NodeResult, RunStatus};
use crate::node::NodeId;
use crate::run_state::RunRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use weft_core::WorkflowRunId;

/// Durable storage for run records.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Inserts a new run record.
    async fn create_run(&self, record: RunRecord) -> Result<(), StoreError>;

    /// Loads a run record.
    async fn get_run(&self, run_id: WorkflowRunId) -> Result<RunRecord, StoreError>;

    /// Records one node attempt.
    ///
    /// Writing the same key again overwrites it, except that a result never
    /// replaces one of higher status rank.
    async fn append_node_result(
        &self,
        run_id: WorkflowRunId,
        node_id: NodeId,
        attempt: AttemptKey,
        result: NodeResult,
    ) -> Result<(), StoreError>;

    /// Moves a run to `running`, keeping the first start time.
    async fn mark_running(
        &self,
        run_id: WorkflowRunId,
        started_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Sets the terminal status and seals the run.
    async fn seal_run(
        &self,
        run_id: WorkflowRunId,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    /// IDs of runs that were created but never sealed.
    async fn list_unfinished(&self) -> Result<Vec<WorkflowRunId>, StoreError>;
}

/// A [`RunStore`] held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<WorkflowRunId, RunRecord>>,
}

impl InMemoryRunStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Looks up an open run for writing.
fn open_run(
    runs: &mut HashMap<WorkflowRunId, RunRecord>,
    run_id: WorkflowRunId,
) -> Result<&mut RunRecord, StoreError> {
    let record = runs.get_mut(&run_id).ok_or(StoreError::NotFound { run_id })?;
    if record.is_sealed() {
        return Err(StoreError::RunSealed { run_id });
    }
    Ok(record)
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(&self, record: RunRecord) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists { run_id: record.id });
        }
        runs.insert(record.id, record);
        Ok(())
    }

    async fn get_run(&self, run_id: WorkflowRunId) -> Result<RunRecord, StoreError> {
        self.runs
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::NotFound { run_id })
    }

    async fn append_node_result(
        &self,
        run_id: WorkflowRunId,
        node_id: NodeId,
        attempt: AttemptKey,
        result: NodeResult,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let record = open_run(&mut runs, run_id)?;
        if !record.apply_node_result(node_id, attempt, result) {
            tracing::debug!(%run_id, %node_id, %attempt, "ignored regressing node result");
        }
        Ok(())
    }

    async fn mark_running(
        &self,
        run_id: WorkflowRunId,
        started_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let record = open_run(&mut runs, run_id)?;
        record.status = RunStatus::Running;
        record.started_at.get_or_insert(started_at);
        Ok(())
    }

    async fn seal_run(
        &self,
        run_id: WorkflowRunId,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let record = open_run(&mut runs, run_id)?;
        record.status = status;
        record.error = error;
        record.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn list_unfinished(&self) -> Result<Vec<WorkflowRunId>, StoreError> {
        let runs = self.runs.read().await;
        let mut unfinished: Vec<_> = runs
            .values()
            .filter(|r| !r.is_sealed())
            .map(|r| r.id)
            .collect();
        unfinished.sort_by_key(|id| id.as_ulid());
        Ok(unfinished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::WorkflowSnapshot;
    use crate::execution::NodeStatus;
    use crate::graph::GraphSnapshot;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use weft_core::AccountId;

    fn record() -> RunRecord {
        RunRecord::new(
            AccountId::new(),
            &WorkflowSnapshot::new("t", GraphSnapshot::new()),
            None,
        )
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = InMemoryRunStore::new();
        let record = record();
        let id = record.id;
        store.create_run(record.clone()).await.unwrap();
        assert_eq!(store.get_run(id).await.unwrap(), record);
        assert_eq!(
            store.create_run(record).await.unwrap_err(),
            StoreError::AlreadyExists { run_id: id }
        );
        let missing = WorkflowRunId::new();
        assert_eq!(
            store.get_run(missing).await.unwrap_err(),
            StoreError::NotFound { run_id: missing }
        );
    }

    #[tokio::test]
    async fn append_is_idempotent_per_key() {
        let store = InMemoryRunStore::new();
        let record = record();
        let id = record.id;
        store.create_run(record).await.unwrap();
        let node = NodeId::new();
        let result = NodeResult::success(BTreeMap::new(), None, Utc::now());
        for _ in 0..3 {
            store
                .append_node_result(id, node, AttemptKey::FIRST, result.clone())
                .await
                .unwrap();
        }
        let stored = store.get_run(id).await.unwrap();
        assert_eq!(stored.node_results[&node].len(), 1);
        assert_eq!(
            stored.node_result(node, AttemptKey::FIRST).map(|r| r.status),
            Some(NodeStatus::Success)
        );
    }

    #[tokio::test]
    async fn sealed_runs_reject_writes() {
        let store = InMemoryRunStore::new();
        let record = record();
        let id = record.id;
        store.create_run(record).await.unwrap();
        store.mark_running(id, Utc::now()).await.unwrap();
        store.seal_run(id, RunStatus::Success, None).await.unwrap();

        let err = store
            .append_node_result(id, NodeId::new(), AttemptKey::FIRST, NodeResult::skipped())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::RunSealed { run_id: id });
        assert!(store.list_unfinished().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_appends_land_once_per_key() {
        let store = Arc::new(InMemoryRunStore::new());
        let record = record();
        let id = record.id;
        store.create_run(record).await.unwrap();
        let nodes: Vec<NodeId> = (0..8).map(|_| NodeId::new()).collect();

        let mut tasks = tokio::task::JoinSet::new();
        for node in nodes.iter().copied() {
            for _ in 0..4 {
                let store = store.clone();
                tasks.spawn(async move {
                    store
                        .append_node_result(id, node, AttemptKey::FIRST, NodeResult::skipped())
                        .await
                });
            }
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        let stored = store.get_run(id).await.unwrap();
        assert_eq!(stored.node_results.len(), nodes.len());
        assert!(stored.node_results.values().all(|a| a.len() == 1));
    }

    #[tokio::test]
    async fn unfinished_runs_are_listed() {
        let store = InMemoryRunStore::new();
        let open = record();
        let open_id = open.id;
        store.create_run(open).await.unwrap();
        assert_eq!(store.list_unfinished().await.unwrap(), vec![open_id]);
    }
}
