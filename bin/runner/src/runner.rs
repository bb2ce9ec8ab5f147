//! Wires configuration into an engine and drives runs to completion.

use crate::config::RunnerConfig;
use crate::db::PgRunStore;
use crate::error::RunnerError;
use crate::files;
use rootcause::prelude::Report;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use weft_core::WorkflowRunId;
use weft_integration::{CredentialResolver, HttpConnector, StaticCredentialResolver};
use weft_metering::InMemoryLedger;
use weft_workflow::{Engine, EngineError, InMemoryRunStore, NodeRegistry, RunState, RunStore};

/// Node type name and operation key of the built-in HTTP connector.
pub const HTTP_NODE_TYPE: &str = "http_request";

fn engine_error(error: EngineError) -> RunnerError {
    RunnerError::Engine {
        details: error.to_string(),
    }
}

/// Opens the Postgres store, or an in-memory one when no database is set.
pub async fn open_store(config: &RunnerConfig) -> Result<Arc<dyn RunStore>, Report<RunnerError>> {
    let Some(url) = &config.database_url else {
        tracing::warn!("No database configured; runs are kept in memory");
        return Ok(Arc::new(InMemoryRunStore::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .map_err(|e| RunnerError::Database {
            details: e.to_string(),
        })?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| RunnerError::Database {
            details: e.to_string(),
        })?;

    Ok(Arc::new(PgRunStore::new(pool)))
}

/// Builds an engine with the built-in node types and the HTTP connector.
pub async fn build_engine(
    config: &RunnerConfig,
    store: Arc<dyn RunStore>,
) -> Result<Engine, Report<RunnerError>> {
    let mut registry = NodeRegistry::with_builtins();
    let http = HttpConnector::new(config.http.timeout()).map_err(|e| RunnerError::Connector {
        details: e.to_string(),
    })?;
    registry.register_connector(HTTP_NODE_TYPE, Arc::new(http), HTTP_NODE_TYPE);

    let credentials: Arc<dyn CredentialResolver> = match &config.credentials_path {
        Some(path) => Arc::new(files::load_credentials(path)?),
        None => Arc::new(StaticCredentialResolver::new()),
    };

    let ledger = InMemoryLedger::new(config.metering.price_table());
    let balance = ledger
        .deposit(config.account_id, config.metering.initial_balance)
        .await;
    tracing::info!(account_id = %config.account_id, balance, "Funded account");

    Ok(Engine::new(
        registry,
        store,
        credentials,
        Arc::new(ledger),
        config.engine.clone(),
    ))
}

/// Waits for a run, cancelling it on Ctrl-C.
async fn wait(engine: &Engine, run_id: WorkflowRunId) -> Result<RunState, Report<RunnerError>> {
    let state = tokio::select! {
        state = engine.wait_for_run(run_id) => state,
        Ok(()) = tokio::signal::ctrl_c() => {
            tracing::warn!(%run_id, "Interrupted; cancelling run");
            if let Err(e) = engine.cancel_run(run_id).await {
                tracing::warn!(%run_id, error = %e, "Failed to cancel run");
            }
            engine.wait_for_run(run_id).await
        }
    }
    .map_err(engine_error)?;

    tracing::info!(
        %run_id,
        status = %state.status,
        nodes = state.node_results.len(),
        error = state.error.as_deref().unwrap_or_default(),
        "Run finished"
    );
    Ok(state)
}

/// Resumes unsealed runs if configured, then runs the configured workflow.
///
/// Returns the final state of the new run, or `None` when no workflow is
/// configured.
pub async fn execute(
    config: &RunnerConfig,
    store: Arc<dyn RunStore>,
) -> Result<Option<RunState>, Report<RunnerError>> {
    let engine = build_engine(config, store).await?;

    if config.resume_unfinished {
        let resumed = engine.resume_unfinished().await.map_err(engine_error)?;
        if !resumed.is_empty() {
            tracing::info!(count = resumed.len(), "Resumed unfinished runs");
        }
        for run_id in resumed {
            wait(&engine, run_id).await?;
        }
    }

    let Some(path) = &config.workflow_path else {
        return Ok(None);
    };
    let workflow = files::load_workflow(path)?;
    let trigger_input = config
        .trigger_input_path
        .as_deref()
        .map(files::load_trigger_input)
        .transpose()?;

    let run_id = engine
        .start_run(config.account_id, workflow, trigger_input)
        .await
        .map_err(engine_error)?;
    Ok(Some(wait(&engine, run_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, File, FileFormat};
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use weft_workflow::{GraphSnapshot, MAIN_PORT, Node, RunRecord, RunStatus, WorkflowSnapshot};

    fn config_with(overrides: serde_json::Value) -> RunnerConfig {
        Config::builder()
            .add_source(File::from_str(&overrides.to_string(), FileFormat::Json))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    fn json_file(value: &serde_json::Value) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(value.to_string().as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn runs_configured_workflow() {
        let start = Node::new("Start", "manual_trigger");
        let set = Node::new("Set", "set")
            .with_parameters(json!({ "fields": { "doubled": "{{ $json.n * 2 }}" } }));
        let graph = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(set.clone())
            .connect(start.id, set.id);
        let workflow = json_file(&serde_json::to_value(WorkflowSnapshot::new("double", graph)).unwrap());
        let trigger = json_file(&json!([{ "n": 2 }, { "n": 5 }]));

        let config = config_with(json!({
            "workflow_path": workflow.path(),
            "trigger_input_path": trigger.path(),
        }));
        let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
        let state = execute(&config, store).await.unwrap().unwrap();

        assert_eq!(state.status, RunStatus::Success);
        let doubled: Vec<_> = state
            .output(set.id, MAIN_PORT)
            .iter()
            .map(|item| item.json()["doubled"].clone())
            .collect();
        assert_eq!(doubled, vec![json!(4), json!(10)]);
    }

    #[tokio::test]
    async fn resumes_unfinished_runs_without_a_workflow() {
        let store = Arc::new(InMemoryRunStore::new());
        let record = RunRecord::new(
            Default::default(),
            &WorkflowSnapshot::new(
                "left over",
                GraphSnapshot::new().with_node(Node::new("Start", "manual_trigger")),
            ),
            Some(json!({ "a": 1 })),
        );
        let run_id = record.id;
        store.create_run(record).await.unwrap();

        let config = config_with(json!({}));
        assert!(execute(&config, store.clone()).await.unwrap().is_none());

        let resumed = store.get_run(run_id).await.unwrap();
        assert_eq!(resumed.status, RunStatus::Success);
        assert!(resumed.is_sealed());
    }

    #[tokio::test]
    async fn invalid_workflow_is_reported() {
        let workflow = json_file(&json!({ "name": "broken" }));
        let config = config_with(json!({ "workflow_path": workflow.path() }));
        let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
        let err = execute(&config, store).await.unwrap_err();
        assert!(err.to_string().contains("invalid workflow"));
    }
}
