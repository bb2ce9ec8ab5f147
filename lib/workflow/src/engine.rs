//! The public entry point: start, observe, cancel, and resume runs.
//!
//! `start_run` validates the graph and charges the run-level cost before any
//! record exists, so a rejected run leaves no trace. Execution then continues
//! on a spawned task; callers poll with `get_run_state` or await
//! `wait_for_run`.

use crate::config::EngineConfig;
use crate::definition::WorkflowSnapshot;
use crate::error::EngineError;
use crate::execution::{AttemptKey, CANCELLED_ERROR, NodeResult, RunStatus};
use crate::executor::{Dispatcher, NodeRegistry};
use crate::graph::WorkflowGraph;
use crate::run_state::{RunRecord, RunState};
use crate::scheduler::Scheduler;
use crate::store::RunStore;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use weft_core::{AccountId, WorkflowRunId};
use weft_integration::CredentialResolver;
use weft_metering::MeteringGate;

type Finished = Option<Result<RunStatus, String>>;

/// A run executing in this process.
#[derive(Clone)]
struct RunHandle {
    cancel: CancellationToken,
    finished: watch::Receiver<Finished>,
}

/// Executes workflow runs.
pub struct Engine {
    registry: Arc<NodeRegistry>,
    store: Arc<dyn RunStore>,
    credentials: Arc<dyn CredentialResolver>,
    metering: Arc<dyn MeteringGate>,
    config: EngineConfig,
    runs: Arc<Mutex<HashMap<WorkflowRunId, RunHandle>>>,
}

impl Engine {
    /// Creates an engine over the given collaborators.
    #[must_use]
    pub fn new(
        registry: NodeRegistry,
        store: Arc<dyn RunStore>,
        credentials: Arc<dyn CredentialResolver>,
        metering: Arc<dyn MeteringGate>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            credentials,
            metering,
            config,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validates, charges, records, and starts a run.
    ///
    /// Returns once the run record exists; execution continues in the
    /// background.
    ///
    /// # Errors
    ///
    /// Returns `Graph` for an invalid snapshot and `Metering` when the
    /// run-level charge is rejected. Neither creates a run record.
    #[tracing::instrument(
        skip(self, workflow, trigger_input),
        fields(workflow_id = %workflow.workflow_id, account_id = %account_id)
    )]
    pub async fn start_run(
        &self,
        account_id: AccountId,
        workflow: WorkflowSnapshot,
        trigger_input: Option<JsonValue>,
    ) -> Result<WorkflowRunId, EngineError> {
        let graph = WorkflowGraph::build(&workflow.graph, &self.registry)?;
        if self.config.run_quantity > 0 {
            self.metering
                .charge_or_reject(
                    account_id,
                    &self.config.run_operation_key,
                    self.config.run_quantity,
                )
                .await
                .inspect_err(|e| tracing::warn!(error = %e, "run rejected by metering"))?;
        }

        let record = RunRecord::new(account_id, &workflow, trigger_input);
        let run_id = record.id;
        self.store.create_run(record.clone()).await?;
        tracing::info!(%run_id, workflow = %workflow.name, "run started");
        let mut runs = self.runs.lock().await;
        self.spawn(&mut runs, &record, Arc::new(graph));
        Ok(run_id)
    }

    /// Returns the current state of a run.
    ///
    /// # Errors
    ///
    /// Returns `RunNotFound` for unknown runs.
    pub async fn get_run_state(&self, run_id: WorkflowRunId) -> Result<RunState, EngineError> {
        Ok(self.store.get_run(run_id).await?.state())
    }

    /// Stops new dispatch for a run.
    ///
    /// Nodes already running finish or time out, then the run is sealed as
    /// `failed` with [`CANCELLED_ERROR`]. A run that is not executing in this
    /// process is sealed directly.
    ///
    /// # Errors
    ///
    /// Returns `RunNotFound` or `RunAlreadyTerminal`.
    #[tracing::instrument(skip(self), fields(run_id = %run_id))]
    pub async fn cancel_run(&self, run_id: WorkflowRunId) -> Result<(), EngineError> {
        // Held until the run is sealed so a concurrent resume cannot start it.
        let runs = self.runs.lock().await;
        if let Some(handle) = runs.get(&run_id) {
            handle.cancel.cancel();
            tracing::info!("cancel requested");
            return Ok(());
        }

        let record = self.store.get_run(run_id).await?;
        if record.is_sealed() {
            return Err(EngineError::RunAlreadyTerminal { run_id });
        }
        for node in &record.graph_snapshot.nodes {
            let attempt = record.latest(node.id).map_or(AttemptKey::FIRST, |(a, _)| a);
            let done = record
                .node_result(node.id, attempt)
                .is_some_and(|r| r.status.is_terminal());
            if !done {
                self.store
                    .append_node_result(run_id, node.id, attempt, NodeResult::skipped())
                    .await?;
            }
        }
        self.store
            .seal_run(run_id, RunStatus::Failed, Some(CANCELLED_ERROR.to_string()))
            .await?;
        tracing::info!("idle run sealed after cancel");
        Ok(())
    }

    /// Continues an unsealed run from its recorded node results.
    ///
    /// Recorded terminal results are replayed; nothing that finished is run
    /// or charged again. Resuming a run already executing here is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `RunNotFound`, `RunAlreadyTerminal`, or `Graph` if the stored
    /// snapshot no longer validates against the registry.
    #[tracing::instrument(skip(self), fields(run_id = %run_id))]
    pub async fn resume_run(&self, run_id: WorkflowRunId) -> Result<(), EngineError> {
        // Held until the run is registered so two resumes cannot both start it.
        let mut runs = self.runs.lock().await;
        if runs.contains_key(&run_id) {
            return Ok(());
        }
        let record = self.store.get_run(run_id).await?;
        if record.is_sealed() {
            return Err(EngineError::RunAlreadyTerminal { run_id });
        }
        let graph = WorkflowGraph::build(&record.graph_snapshot, &self.registry)?;
        tracing::info!(recorded_nodes = record.node_results.len(), "resuming run");
        self.spawn(&mut runs, &record, Arc::new(graph));
        Ok(())
    }

    /// Resumes every unsealed run in the store.
    ///
    /// Runs that fail to resume are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot list runs.
    pub async fn resume_unfinished(&self) -> Result<Vec<WorkflowRunId>, EngineError> {
        let mut resumed = Vec::new();
        for run_id in self.store.list_unfinished().await? {
            match self.resume_run(run_id).await {
                Ok(()) => resumed.push(run_id),
                Err(e) => tracing::warn!(%run_id, error = %e, "could not resume run"),
            }
        }
        Ok(resumed)
    }

    /// Waits until a run is sealed and returns its final state.
    ///
    /// # Errors
    ///
    /// Returns `TaskFailed` if the run stopped without sealing, for example
    /// because the store failed.
    pub async fn wait_for_run(&self, run_id: WorkflowRunId) -> Result<RunState, EngineError> {
        let handle = self.runs.lock().await.get(&run_id).cloned();
        if let Some(mut handle) = handle {
            let finished = handle
                .finished
                .wait_for(Option::is_some)
                .await
                .map(|outcome| outcome.clone())
                .map_err(|_| EngineError::TaskFailed {
                    run_id,
                    reason: "run task ended without reporting".to_string(),
                })?;
            if let Some(Err(reason)) = finished {
                return Err(EngineError::TaskFailed { run_id, reason });
            }
        }

        let state = self.get_run_state(run_id).await?;
        if state.is_finished() {
            Ok(state)
        } else {
            Err(EngineError::TaskFailed {
                run_id,
                reason: "run is not executing".to_string(),
            })
        }
    }

    /// Registers and starts a run; the caller holds the `runs` lock.
    fn spawn(
        &self,
        runs: &mut HashMap<WorkflowRunId, RunHandle>,
        record: &RunRecord,
        graph: Arc<WorkflowGraph>,
    ) {
        let run_id = record.id;
        let cancel = CancellationToken::new();
        let (finished_tx, finished_rx) = watch::channel(None);
        let dispatcher = Dispatcher::new(
            record.account_id,
            self.credentials.clone(),
            self.metering.clone(),
        );
        let scheduler = Scheduler::new(
            record,
            graph,
            self.store.clone(),
            dispatcher,
            &self.config,
            cancel.clone(),
        );
        runs.insert(
            run_id,
            RunHandle {
                cancel,
                finished: finished_rx,
            },
        );

        let runs = self.runs.clone();
        tokio::spawn(async move {
            let outcome = scheduler.run().await.map_err(|e| e.to_string());
            if let Err(reason) = &outcome {
                tracing::error!(%run_id, error = %reason, "run stopped before sealing");
            }
            finished_tx.send_replace(Some(outcome));
            runs.lock().await.remove(&run_id);
        });
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeRef;
    use crate::error::NodeError;
    use crate::execution::NodeStatus;
    use crate::executor::{NodeContext, NodeDescriptor, NodeHandler, NodeOutput};
    use crate::graph::GraphSnapshot;
    use crate::item::Item;
    use crate::node::{ExecutionMode, Node, NodeId, NodeSettings};
    use crate::port::{ERROR_PORT, MAIN_PORT};
    use crate::store::InMemoryRunStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use weft_integration::StaticCredentialResolver;
    use weft_metering::{InMemoryLedger, PriceTable};

    /// Passes items through and counts executions.
    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NodeHandler for Counting {
        fn descriptor(&self) -> NodeDescriptor {
            NodeDescriptor::new("count").with_mode(ExecutionMode::AllItems)
        }

        async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(NodeOutput::main(ctx.primary_items().to_vec()))
        }
    }

    struct Failing;

    #[async_trait]
    impl NodeHandler for Failing {
        fn descriptor(&self) -> NodeDescriptor {
            NodeDescriptor::new("fail").with_mode(ExecutionMode::AllItems)
        }

        async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
            Err(NodeError::remote("boom"))
        }
    }

    /// Sleeps for `ms` (default 5s), then passes items through.
    struct Sleeping;

    #[async_trait]
    impl NodeHandler for Sleeping {
        fn descriptor(&self) -> NodeDescriptor {
            NodeDescriptor::new("sleep").with_mode(ExecutionMode::AllItems)
        }

        async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
            let ms = ctx.parameters.first().get("ms").and_then(JsonValue::as_u64).unwrap_or(5_000);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(NodeOutput::main(ctx.primary_items().to_vec()))
        }
    }

    /// Records start order and peak parallelism, sleeping 30ms per call.
    #[derive(Default)]
    struct Tracking {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        started: std::sync::Mutex<Vec<String>>,
    }

    struct TrackingNode(Arc<Tracking>);

    #[async_trait]
    impl NodeHandler for TrackingNode {
        fn descriptor(&self) -> NodeDescriptor {
            NodeDescriptor::new("track").with_mode(ExecutionMode::AllItems)
        }

        async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
            let tracking = &self.0;
            tracking.started.lock().unwrap().push(ctx.node_name.clone());
            let now = tracking.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            tracking.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            tracking.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(NodeOutput::main(ctx.primary_items().to_vec()))
        }
    }

    struct Harness {
        engine: Engine,
        account: AccountId,
        store: Arc<InMemoryRunStore>,
        ledger: Arc<InMemoryLedger>,
        calls: Arc<AtomicUsize>,
        tracking: Arc<Tracking>,
    }

    async fn harness(balance: u64) -> Harness {
        harness_with(balance, EngineConfig::default()).await
    }

    async fn harness_with(balance: u64, config: EngineConfig) -> Harness {
        let calls = Arc::new(AtomicUsize::new(0));
        let tracking = Arc::new(Tracking::default());
        let mut registry = NodeRegistry::with_builtins();
        registry.register(Arc::new(Counting {
            calls: calls.clone(),
        }));
        registry.register(Arc::new(Failing));
        registry.register(Arc::new(Sleeping));
        registry.register(Arc::new(TrackingNode(tracking.clone())));

        let store = Arc::new(InMemoryRunStore::new());
        let ledger = Arc::new(InMemoryLedger::new(PriceTable::flat(1)));
        let account = AccountId::new();
        ledger.deposit(account, balance).await;
        let engine = Engine::new(
            registry,
            store.clone(),
            Arc::new(StaticCredentialResolver::new()),
            ledger.clone(),
            config,
        );
        Harness {
            engine,
            account,
            store,
            ledger,
            calls,
            tracking,
        }
    }

    impl Harness {
        async fn run(&self, graph: GraphSnapshot, input: JsonValue) -> RunState {
            let run_id = self
                .engine
                .start_run(self.account, WorkflowSnapshot::new("test", graph), Some(input))
                .await
                .unwrap();
            self.engine.wait_for_run(run_id).await.unwrap()
        }
    }

    fn values(state: &RunState, node: NodeId, port: &str) -> Vec<JsonValue> {
        state
            .output(node, port)
            .iter()
            .map(|i| i.json().clone())
            .collect()
    }

    #[tokio::test]
    async fn linear_run_succeeds_and_resolves_node_references() {
        let h = harness(10).await;
        let start = Node::new("Start", "manual_trigger");
        let set = Node::new("Set", "set").with_parameters(json!({
            "fields": { "greeting": "hello {{ $json.name }}", "first": "{{ $node[\"Start\"].json.name }}" }
        }));
        let graph = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(set.clone())
            .connect(start.id, set.id);

        let state = h.run(graph, json!([{ "name": "ada" }, { "name": "bob" }])).await;
        assert_eq!(state.status, RunStatus::Success);
        assert!(state.finished_at.is_some());
        let out = values(&state, set.id, MAIN_PORT);
        assert_eq!(out[0]["greeting"], json!("hello ada"));
        assert_eq!(out[1]["greeting"], json!("hello bob"));
        assert_eq!(out[1]["first"], json!("ada"));
        // One credit for the run itself.
        assert_eq!(h.ledger.balance(h.account).await, Some(9));
    }

    #[tokio::test]
    async fn failure_without_error_output_fails_run_and_skips_downstream() {
        let h = harness(10).await;
        let a = Node::new("A", "manual_trigger");
        let b = Node::new("B", "fail");
        let c = Node::new("C", "count");
        let graph = GraphSnapshot::new()
            .with_node(a.clone())
            .with_node(b.clone())
            .with_node(c.clone())
            .connect(a.id, b.id)
            .connect(b.id, c.id);

        let state = h.run(graph, json!({ "x": 1 })).await;
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.node_status(a.id), Some(NodeStatus::Success));
        assert_eq!(state.node_status(b.id), Some(NodeStatus::Failed));
        assert_eq!(state.node_status(c.id), Some(NodeStatus::Skipped));
        assert!(state.error.as_deref().is_some_and(|e| e.contains("boom")));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wired_error_output_keeps_run_successful() {
        let h = harness(10).await;
        let start = Node::new("Start", "manual_trigger");
        let risky = Node::new("Risky", "fail").with_settings(NodeSettings::default().with_error_output());
        let ok_path = Node::new("Ok", "count");
        let handler = Node::new("Handler", "no_op");
        let graph = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(risky.clone())
            .with_node(ok_path.clone())
            .with_node(handler.clone())
            .connect(start.id, risky.id)
            .connect(risky.id, ok_path.id)
            .with_edge(EdgeRef::new(risky.id, ERROR_PORT, handler.id, MAIN_PORT));

        let state = h.run(graph, json!([{ "id": 1 }, { "id": 2 }])).await;
        assert_eq!(state.status, RunStatus::Success);
        let risky_result = &state.node_results[&risky.id];
        assert_eq!(risky_result.status, NodeStatus::Success);
        assert!(risky_result.error.as_deref().is_some_and(|e| e.contains("boom")));
        assert_eq!(state.node_status(ok_path.id), Some(NodeStatus::Skipped));
        let routed = values(&state, handler.id, MAIN_PORT);
        assert_eq!(routed.len(), 2);
        assert_eq!(routed[0]["id"], json!(1));
        assert!(routed[0]["error"].as_str().is_some_and(|e| e.contains("boom")));
    }

    #[tokio::test]
    async fn if_branch_without_items_is_skipped() {
        let h = harness(10).await;
        let start = Node::new("Start", "manual_trigger");
        let check = Node::new("Check", "if")
            .with_parameters(json!({ "conditions": ["{{ $json.v > 10 }}"] }));
        let big = Node::new("Big", "no_op");
        let small = Node::new("Small", "no_op");
        let graph = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(check.clone())
            .with_node(big.clone())
            .with_node(small.clone())
            .connect(start.id, check.id)
            .with_edge(EdgeRef::new(check.id, "true", big.id, MAIN_PORT))
            .with_edge(EdgeRef::new(check.id, "false", small.id, MAIN_PORT));

        let state = h.run(graph, json!([{ "v": 11 }, { "v": 12 }])).await;
        assert_eq!(state.status, RunStatus::Success);
        assert_eq!(values(&state, big.id, MAIN_PORT).len(), 2);
        assert_eq!(state.node_status(small.id), Some(NodeStatus::Skipped));
    }

    #[tokio::test]
    async fn switch_routes_to_first_matching_rule() {
        let h = harness(10).await;
        let start = Node::new("Start", "manual_trigger");
        let switch = Node::new("Switch", "switch")
            .with_parameters(json!({ "rules": [{ "condition": "{{ $json.v > 10 }}" }] }));
        let graph = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(switch.clone())
            .connect(start.id, switch.id);

        let state = h.run(graph, json!([{ "v": 5 }, { "v": 15 }])).await;
        assert_eq!(values(&state, switch.id, "output0"), vec![json!({ "v": 15 })]);
    }

    #[tokio::test]
    async fn merge_append_and_combine_by_key() {
        let h = harness(10).await;
        let start = Node::new("Start", "manual_trigger");
        let left = Node::new("Left", "set").with_parameters(json!({
            "fields": { "id": "{{ $json.id }}", "a": 1 }, "keep_only_set": true
        }));
        let right = Node::new("Right", "set").with_parameters(json!({
            "fields": { "id": "{{ $json.id }}", "b": 2 }, "keep_only_set": true
        }));
        let append = Node::new("Append", "merge");
        let joined = Node::new("Joined", "merge")
            .with_parameters(json!({ "mode": "combine_by_key", "key": "id" }));
        let graph = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(left.clone())
            .with_node(right.clone())
            .with_node(append.clone())
            .with_node(joined.clone())
            .connect(start.id, left.id)
            .connect(start.id, right.id)
            .with_edge(EdgeRef::new(left.id, MAIN_PORT, append.id, "input1"))
            .with_edge(EdgeRef::new(right.id, MAIN_PORT, append.id, "input2"))
            .with_edge(EdgeRef::new(left.id, MAIN_PORT, joined.id, "input1"))
            .with_edge(EdgeRef::new(right.id, MAIN_PORT, joined.id, "input2"));

        let state = h.run(graph, json!([{ "id": 1 }])).await;
        assert_eq!(
            values(&state, append.id, MAIN_PORT),
            vec![json!({ "id": 1, "a": 1 }), json!({ "id": 1, "b": 2 })]
        );
        assert_eq!(
            values(&state, joined.id, MAIN_PORT),
            vec![json!({ "id": 1, "a": 1, "b": 2 })]
        );
    }

    #[tokio::test]
    async fn insufficient_balance_creates_no_run() {
        let h = harness(0).await;
        let start = Node::new("Start", "manual_trigger");
        let count = Node::new("Count", "count");
        let graph = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(count.clone())
            .connect(start.id, count.id);

        let err = h
            .engine
            .start_run(h.account, WorkflowSnapshot::new("t", graph), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Metering(_)));
        assert!(h.store.list_unfinished().await.unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_graph_is_rejected_before_charging() {
        let h = harness(10).await;
        let graph = GraphSnapshot::new().with_node(Node::new("Lonely", "count"));
        let err = h
            .engine
            .start_run(h.account, WorkflowSnapshot::new("t", graph), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Graph(_)));
        assert_eq!(h.ledger.balance(h.account).await, Some(10));
    }

    #[tokio::test]
    async fn batch_loop_runs_body_per_batch_then_done() {
        let h = harness(10).await;
        let start = Node::new("Start", "manual_trigger");
        let batch = Node::new("Batch", "split_in_batches").with_parameters(json!({ "batch_size": 2 }));
        let body = Node::new("Body", "count");
        let after = Node::new("After", "no_op");
        let graph = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(batch.clone())
            .with_node(body.clone())
            .with_node(after.clone())
            .connect(start.id, batch.id)
            .with_edge(EdgeRef::new(batch.id, "batch", body.id, MAIN_PORT))
            .with_edge(EdgeRef::new(batch.id, "done", after.id, MAIN_PORT));

        let input: Vec<JsonValue> = (1..=5).map(|i| json!({ "i": i })).collect();
        let state = h.run(graph, JsonValue::Array(input)).await;
        assert_eq!(state.status, RunStatus::Success);
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
        assert_eq!(values(&state, after.id, MAIN_PORT).len(), 5);
        assert_eq!(state.attempts[&body.id], AttemptKey(2));
        assert_eq!(values(&state, body.id, MAIN_PORT), vec![json!({ "i": 5 })]);
    }

    #[tokio::test]
    async fn resume_replays_recorded_results() {
        let h = harness(10).await;
        let start = Node::new("Start", "manual_trigger");
        let first = Node::new("First", "count");
        let second = Node::new("Second", "no_op");
        let graph = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(first.clone())
            .with_node(second.clone())
            .connect(start.id, first.id)
            .connect(first.id, second.id);

        // A run that crashed after First finished.
        let record = RunRecord::new(h.account, &WorkflowSnapshot::new("t", graph), None);
        let run_id = record.id;
        h.store.create_run(record).await.unwrap();
        let now = chrono::Utc::now();
        let mut outputs = BTreeMap::new();
        outputs.insert(MAIN_PORT.to_string(), vec![Item::new(json!({ "n": 1 }))]);
        for node in [start.id, first.id] {
            h.store
                .append_node_result(
                    run_id,
                    node,
                    AttemptKey::FIRST,
                    NodeResult::success(outputs.clone(), None, now),
                )
                .await
                .unwrap();
        }
        h.store
            .append_node_result(run_id, second.id, AttemptKey::FIRST, NodeResult::running(now))
            .await
            .unwrap();

        h.engine.resume_run(run_id).await.unwrap();
        let state = h.engine.wait_for_run(run_id).await.unwrap();
        assert_eq!(state.status, RunStatus::Success);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert_eq!(values(&state, second.id, MAIN_PORT), vec![json!({ "n": 1 })]);
        // Resume does not charge the run again.
        assert_eq!(h.ledger.balance(h.account).await, Some(10));

        let again = h.engine.resume_run(run_id).await.unwrap_err();
        assert!(matches!(again, EngineError::RunAlreadyTerminal { .. }));
    }

    #[tokio::test]
    async fn cancel_stops_dispatch_and_fails_the_run() {
        let h = harness(10).await;
        let start = Node::new("Start", "manual_trigger");
        let slow = Node::new("Slow", "sleep").with_parameters(json!({ "ms": 200 }));
        let next = Node::new("Next", "count");
        let graph = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(slow.clone())
            .with_node(next.clone())
            .connect(start.id, slow.id)
            .connect(slow.id, next.id);

        let run_id = h
            .engine
            .start_run(h.account, WorkflowSnapshot::new("t", graph), Some(json!({ "x": 1 })))
            .await
            .unwrap();
        h.engine.cancel_run(run_id).await.unwrap();
        let state = h.engine.wait_for_run(run_id).await.unwrap();
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.error.as_deref(), Some(CANCELLED_ERROR));
        assert_eq!(state.node_status(next.id), Some(NodeStatus::Skipped));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);

        let err = h.engine.cancel_run(run_id).await.unwrap_err();
        assert!(matches!(err, EngineError::RunAlreadyTerminal { .. }));
    }

    #[tokio::test]
    async fn node_timeout_fails_the_node() {
        let h = harness(10).await;
        let start = Node::new("Start", "manual_trigger");
        let slow = Node::new("Slow", "sleep").with_settings(NodeSettings::default().with_timeout_ms(20));
        let graph = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(slow.clone())
            .connect(start.id, slow.id);

        let state = h.run(graph, json!({})).await;
        assert_eq!(state.status, RunStatus::Failed);
        let slow_result = &state.node_results[&slow.id];
        assert_eq!(slow_result.status, NodeStatus::Failed);
        assert!(slow_result.error.as_deref().is_some_and(|e| e.contains("timed out after 20ms")));
    }

    #[tokio::test]
    async fn unknown_runs_are_not_found() {
        let h = harness(10).await;
        let missing = WorkflowRunId::new();
        assert!(matches!(
            h.engine.get_run_state(missing).await.unwrap_err(),
            EngineError::RunNotFound { .. }
        ));
        assert!(matches!(
            h.engine.cancel_run(missing).await.unwrap_err(),
            EngineError::RunNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn idle_unfinished_run_is_cancelled_directly() {
        let h = harness(10).await;
        let start = Node::new("Start", "manual_trigger");
        let record = RunRecord::new(
            h.account,
            &WorkflowSnapshot::new("t", GraphSnapshot::new().with_node(start.clone())),
            None,
        );
        let run_id = record.id;
        h.store.create_run(record).await.unwrap();

        h.engine.cancel_run(run_id).await.unwrap();
        let state = h.engine.get_run_state(run_id).await.unwrap();
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.error.as_deref(), Some(CANCELLED_ERROR));
        assert_eq!(state.node_status(start.id), Some(NodeStatus::Skipped));
    }

    #[tokio::test]
    async fn resume_after_recorded_failure_keeps_sibling_results() {
        let h = harness(10).await;
        let a = Node::new("A", "manual_trigger");
        let b = Node::new("B", "fail");
        let c = Node::new("C", "count");
        let d = Node::new("D", "count");
        let graph = GraphSnapshot::new()
            .with_node(a.clone())
            .with_node(b.clone())
            .with_node(c.clone())
            .with_node(d.clone())
            .connect(a.id, b.id)
            .connect(a.id, c.id)
            .connect(c.id, d.id);

        // The process stopped after B failed and C succeeded, before sealing.
        let record = RunRecord::new(h.account, &WorkflowSnapshot::new("t", graph), None);
        let run_id = record.id;
        h.store.create_run(record).await.unwrap();
        let now = chrono::Utc::now();
        let mut outputs = BTreeMap::new();
        outputs.insert(MAIN_PORT.to_string(), vec![Item::new(json!({ "n": 1 }))]);
        for node in [a.id, c.id] {
            h.store
                .append_node_result(
                    run_id,
                    node,
                    AttemptKey::FIRST,
                    NodeResult::success(outputs.clone(), None, now),
                )
                .await
                .unwrap();
        }
        h.store
            .append_node_result(run_id, b.id, AttemptKey::FIRST, NodeResult::failed("boom", now))
            .await
            .unwrap();

        h.engine.resume_run(run_id).await.unwrap();
        let state = h.engine.wait_for_run(run_id).await.unwrap();
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.node_status(a.id), Some(NodeStatus::Success));
        assert_eq!(state.node_status(b.id), Some(NodeStatus::Failed));
        assert_eq!(state.node_status(c.id), Some(NodeStatus::Success));
        assert_eq!(values(&state, c.id, MAIN_PORT), vec![json!({ "n": 1 })]);
        assert_eq!(state.node_status(d.id), Some(NodeStatus::Skipped));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_resumes_start_the_run_once() {
        let h = harness(10).await;
        let start = Node::new("Start", "manual_trigger");
        let slow = Node::new("Slow", "sleep").with_parameters(json!({ "ms": 50 }));
        let count = Node::new("Count", "count");
        let graph = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(slow.clone())
            .with_node(count.clone())
            .connect(start.id, slow.id)
            .connect(slow.id, count.id);
        let record = RunRecord::new(h.account, &WorkflowSnapshot::new("t", graph), Some(json!({})));
        let run_id = record.id;
        h.store.create_run(record).await.unwrap();

        let (first, second) = tokio::join!(h.engine.resume_run(run_id), h.engine.resume_run(run_id));
        first.unwrap();
        second.unwrap();
        let state = h.engine.wait_for_run(run_id).await.unwrap();
        assert_eq!(state.status, RunStatus::Success);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    fn fan_out(names: &[&str]) -> (GraphSnapshot, Vec<Node>) {
        let start = Node::new("Start", "manual_trigger");
        let branches: Vec<Node> = names.iter().map(|name| Node::new(*name, "track")).collect();
        let mut graph = GraphSnapshot::new().with_node(start.clone());
        for node in &branches {
            graph = graph.with_node(node.clone());
        }
        (graph, branches)
    }

    #[tokio::test]
    async fn concurrency_cap_bounds_parallel_branches() {
        for (max_concurrency, expected_peak) in [(1, 1), (2, 2), (4, 3)] {
            let config = EngineConfig {
                max_concurrency,
                ..EngineConfig::default()
            };
            let h = harness_with(10, config).await;
            let (mut graph, branches) = fan_out(&["One", "Two", "Three"]);
            let start_id = graph.nodes[0].id;
            for node in &branches {
                graph = graph.connect(start_id, node.id);
            }

            let state = h.run(graph, json!({})).await;
            assert_eq!(state.status, RunStatus::Success);
            assert_eq!(h.tracking.started.lock().unwrap().len(), 3);
            assert_eq!(
                h.tracking.peak.load(Ordering::SeqCst),
                expected_peak,
                "max_concurrency = {max_concurrency}"
            );
        }
    }

    #[tokio::test]
    async fn ready_nodes_start_in_edge_insertion_order() {
        let config = EngineConfig {
            max_concurrency: 1,
            ..EngineConfig::default()
        };
        let h = harness_with(10, config).await;
        let (mut graph, branches) = fan_out(&["A", "B", "C"]);
        let start_id = graph.nodes[0].id;
        // Edges are inserted C, A, B; node insertion order is A, B, C.
        for index in [2, 0, 1] {
            graph = graph.connect(start_id, branches[index].id);
        }

        let state = h.run(graph, json!({})).await;
        assert_eq!(state.status, RunStatus::Success);
        assert_eq!(*h.tracking.started.lock().unwrap(), vec!["C", "A", "B"]);
    }
}
