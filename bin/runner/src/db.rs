//! Postgres-backed run store.
//!
//! One row per run in `workflow_runs` and one row per node attempt in
//! `node_results`. Graph snapshots and node results are stored as versioned
//! JSON envelopes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use weft_core::{AccountId, WorkflowId, WorkflowRunId, WorkflowVersionId};
use weft_workflow::run_state::NodeAttempts;
use weft_workflow::{
    AttemptKey, Envelope, GraphSnapshot, NodeId, NodeResult, RunRecord, RunStatus, RunStore,
    StoreError,
};

fn backend(error: impl fmt::Display) -> StoreError {
    StoreError::Backend {
        reason: error.to_string(),
    }
}

fn decode<T>(field: &str, raw: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    T::from_str(raw).map_err(|e| StoreError::Backend {
        reason: format!("invalid {field} '{raw}': {e}"),
    })
}

/// Row type for run queries.
#[derive(FromRow)]
struct RunRow {
    id: String,
    workflow_id: String,
    workflow_version_id: String,
    account_id: String,
    status: String,
    graph_snapshot: JsonValue,
    trigger_input: Option<JsonValue>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// Row type for node result queries.
#[derive(FromRow)]
struct NodeResultRow {
    node_id: String,
    attempt: i32,
    result: JsonValue,
}

impl RunRow {
    fn try_into_record(self, nodes: Vec<NodeResultRow>) -> Result<RunRecord, StoreError> {
        let status = RunStatus::from_str_value(&self.status).ok_or_else(|| StoreError::Backend {
            reason: format!("invalid run status '{}'", self.status),
        })?;

        let mut node_results: BTreeMap<NodeId, NodeAttempts> = BTreeMap::new();
        for row in nodes {
            let node_id: NodeId = decode("node id", &row.node_id)?;
            let attempt = u32::try_from(row.attempt).map_err(backend)?;
            let result: NodeResult = Envelope::unwrap_value(row.result).map_err(backend)?;
            node_results
                .entry(node_id)
                .or_default()
                .insert(AttemptKey(attempt), result);
        }

        Ok(RunRecord {
            id: decode("run id", &self.id)?,
            workflow_id: decode::<WorkflowId>("workflow id", &self.workflow_id)?,
            workflow_version_id: decode::<WorkflowVersionId>(
                "workflow version id",
                &self.workflow_version_id,
            )?,
            account_id: decode::<AccountId>("account id", &self.account_id)?,
            status,
            graph_snapshot: Envelope::<GraphSnapshot>::unwrap_value(self.graph_snapshot)
                .map_err(backend)?,
            trigger_input: self.trigger_input,
            node_results,
            error: self.error,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

/// A [`RunStore`] over Postgres.
#[derive(Debug, Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguishes a missing run from a sealed one after a write matched
    /// no rows.
    async fn ensure_open(&self, run_id: WorkflowRunId) -> Result<(), StoreError> {
        let row: Option<(Option<DateTime<Utc>>,)> =
            sqlx::query_as("SELECT finished_at FROM workflow_runs WHERE id = $1")
                .bind(run_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        match row {
            None => Err(StoreError::NotFound { run_id }),
            Some((Some(_),)) => Err(StoreError::RunSealed { run_id }),
            Some((None,)) => Ok(()),
        }
    }

    /// Upserts one node attempt unless the stored one has a higher status
    /// rank or the run is sealed. Returns whether a row was written.
    async fn upsert_node_result(
        &self,
        run_id: WorkflowRunId,
        node_id: NodeId,
        attempt: AttemptKey,
        result: &NodeResult,
    ) -> Result<bool, StoreError> {
        let attempt = i32::try_from(attempt.0).map_err(backend)?;
        let payload = Envelope::wrap(result).map_err(backend)?;
        let written = sqlx::query(
            r#"
            INSERT INTO node_results (run_id, node_id, attempt, status, status_rank, result, updated_at)
            SELECT $1, $2, $3, $4, $5, $6, NOW()
            WHERE EXISTS (SELECT 1 FROM workflow_runs WHERE id = $1 AND finished_at IS NULL)
            ON CONFLICT (run_id, node_id, attempt) DO UPDATE
            SET status = EXCLUDED.status,
                status_rank = EXCLUDED.status_rank,
                result = EXCLUDED.result,
                updated_at = EXCLUDED.updated_at
            WHERE node_results.status_rank <= EXCLUDED.status_rank
            "#,
        )
        .bind(run_id.to_string())
        .bind(node_id.to_string())
        .bind(attempt)
        .bind(result.status.as_str())
        .bind(i16::from(result.status.rank()))
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(written.rows_affected() > 0)
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn create_run(&self, record: RunRecord) -> Result<(), StoreError> {
        let snapshot = Envelope::wrap(&record.graph_snapshot).map_err(backend)?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO workflow_runs
                (id, workflow_id, workflow_version_id, account_id, status, graph_snapshot,
                 trigger_input, error, created_at, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.workflow_id.to_string())
        .bind(record.workflow_version_id.to_string())
        .bind(record.account_id.to_string())
        .bind(record.status.as_str())
        .bind(snapshot)
        .bind(&record.trigger_input)
        .bind(&record.error)
        .bind(record.created_at)
        .bind(record.started_at)
        .bind(record.finished_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists { run_id: record.id });
        }

        for (node_id, attempts) in &record.node_results {
            for (attempt, result) in attempts {
                self.upsert_node_result(record.id, *node_id, *attempt, result)
                    .await?;
            }
        }
        Ok(())
    }

    async fn get_run(&self, run_id: WorkflowRunId) -> Result<RunRecord, StoreError> {
        let row: Option<RunRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, workflow_version_id, account_id, status, graph_snapshot,
                   trigger_input, error, created_at, started_at, finished_at
            FROM workflow_runs
            WHERE id = $1
            "#,
        )
        .bind(run_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        let row = row.ok_or(StoreError::NotFound { run_id })?;

        let nodes: Vec<NodeResultRow> = sqlx::query_as(
            r#"
            SELECT node_id, attempt, result
            FROM node_results
            WHERE run_id = $1
            ORDER BY node_id, attempt
            "#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        row.try_into_record(nodes)
    }

    async fn append_node_result(
        &self,
        run_id: WorkflowRunId,
        node_id: NodeId,
        attempt: AttemptKey,
        result: NodeResult,
    ) -> Result<(), StoreError> {
        if !self
            .upsert_node_result(run_id, node_id, attempt, &result)
            .await?
        {
            self.ensure_open(run_id).await?;
            tracing::debug!(%run_id, %node_id, %attempt, "ignored regressing node result");
        }
        Ok(())
    }

    async fn mark_running(
        &self,
        run_id: WorkflowRunId,
        started_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = $2, started_at = COALESCE(started_at, $3)
            WHERE id = $1 AND finished_at IS NULL
            "#,
        )
        .bind(run_id.to_string())
        .bind(RunStatus::Running.as_str())
        .bind(started_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if updated.rows_affected() == 0 {
            self.ensure_open(run_id).await?;
        }
        Ok(())
    }

    async fn seal_run(
        &self,
        run_id: WorkflowRunId,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = $2, error = $3, finished_at = NOW()
            WHERE id = $1 AND finished_at IS NULL
            "#,
        )
        .bind(run_id.to_string())
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if updated.rows_affected() == 0 {
            self.ensure_open(run_id).await?;
        }
        Ok(())
    }

    async fn list_unfinished(&self) -> Result<Vec<WorkflowRunId>, StoreError> {
        let ids: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM workflow_runs
            WHERE finished_at IS NULL
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        ids.into_iter().map(|(id,)| decode("run id", &id)).collect()
    }
}
