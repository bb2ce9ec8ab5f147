//! Drives one run from its triggers to a sealed record.
//!
//! Ready nodes are dispatched as tasks on a `JoinSet`, at most
//! `max_concurrency` at a time, highest priority first. Every terminal result
//! is written to the run store before any downstream node is considered.
//! After a node fails with no wired error output, or after a cancel, nothing
//! new is dispatched; running nodes are awaited, results already recorded by
//! an earlier attempt at the run are still replayed, and the rest are
//! recorded as skipped.

use crate::config::EngineConfig;
use crate::error::{NodeError, StoreError};
use crate::execution::{AttemptKey, CANCELLED_ERROR, NodeResult, NodeStatus, RunStatus};
use crate::executor::{DispatchRequest, Dispatcher, NodeOutput, Readiness};
use crate::expression::NodeOutputs;
use crate::frontier::{Frontier, Phase};
use crate::graph::WorkflowGraph;
use crate::item::{Item, ItemList};
use crate::node::NodeId;
use crate::port::ERROR_PORT;
use crate::run_state::{NodeAttempts, RunRecord};
use crate::store::RunStore;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{Id as TaskId, JoinSet};
use tokio_util::sync::CancellationToken;
use weft_core::WorkflowRunId;

type Outcome = Result<NodeOutput, NodeError>;

/// A dispatched node attempt.
struct InFlight {
    node_id: NodeId,
    attempt: AttemptKey,
    started_at: DateTime<Utc>,
    /// Primary input items, kept to shape error output.
    primary_items: ItemList,
}

pub(crate) struct Scheduler {
    run_id: WorkflowRunId,
    graph: Arc<WorkflowGraph>,
    store: Arc<dyn RunStore>,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
    max_concurrency: usize,
    node_timeout: Duration,
    trigger_input: Option<JsonValue>,
    /// Results already in the store, replayed instead of re-executed.
    recorded: BTreeMap<NodeId, NodeAttempts>,
    frontier: Frontier,
    node_outputs: Arc<NodeOutputs>,
    in_flight: HashMap<TaskId, InFlight>,
    failure: Option<String>,
    cancelled: bool,
}

impl Scheduler {
    pub(crate) fn new(
        record: &RunRecord,
        graph: Arc<WorkflowGraph>,
        store: Arc<dyn RunStore>,
        dispatcher: Dispatcher,
        config: &EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id: record.id,
            frontier: Frontier::new(&graph),
            graph,
            store,
            dispatcher,
            cancel,
            max_concurrency: config.concurrency(),
            node_timeout: config.node_timeout(),
            trigger_input: record.trigger_input.clone(),
            recorded: record.node_results.clone(),
            node_outputs: Arc::new(NodeOutputs::new()),
            in_flight: HashMap::new(),
            failure: None,
            cancelled: false,
        }
    }

    /// Runs to completion and seals the run.
    ///
    /// # Errors
    ///
    /// Returns an error if the run store fails; the run is then left unsealed
    /// so it can be resumed.
    #[tracing::instrument(skip(self), fields(run_id = %self.run_id))]
    pub(crate) async fn run(mut self) -> Result<RunStatus, StoreError> {
        self.store.mark_running(self.run_id, Utc::now()).await?;

        let graph = self.graph.clone();
        for trigger in graph.triggers() {
            self.frontier.mark_ready(&graph, *trigger);
        }
        // Non-trigger nodes without incoming edges settle immediately.
        let sources: Vec<NodeId> = graph
            .nodes()
            .map(|node| node.id)
            .filter(|id| !graph.is_trigger(*id) && graph.incoming(*id).is_empty())
            .collect();
        self.settle(sources).await?;

        let cancel = self.cancel.clone();
        let mut tasks: JoinSet<Outcome> = JoinSet::new();
        loop {
            if cancel.is_cancelled() && !self.cancelled {
                self.cancelled = true;
                tracing::info!("cancel observed, no new nodes will be dispatched");
            }
            while tasks.len() < self.max_concurrency {
                let Some(node_id) = self.next_ready() else {
                    break;
                };
                self.start(node_id, &mut tasks).await?;
            }
            if tasks.is_empty() {
                if self.may_dispatch() && self.frontier.has_ready() {
                    continue;
                }
                break;
            }

            tokio::select! {
                () = cancel.cancelled(), if !self.cancelled => {}
                Some(joined) = tasks.join_next_with_id() => {
                    let (task_id, outcome) = match joined {
                        Ok((id, outcome)) => (id, outcome),
                        Err(e) => (e.id(), Err(NodeError::remote(format!("node task failed: {e}")))),
                    };
                    if let Some(flight) = self.in_flight.remove(&task_id) {
                        self.finish(flight, outcome).await?;
                    }
                }
                else => break,
            }
        }

        self.seal().await
    }

    fn may_dispatch(&self) -> bool {
        !self.cancelled && self.failure.is_none()
    }

    /// Picks the next ready node to start.
    ///
    /// Once dispatch has stopped, only nodes with a recorded terminal result
    /// are taken; replaying them runs nothing and keeps the record intact.
    fn next_ready(&mut self) -> Option<NodeId> {
        if self.may_dispatch() {
            return self.frontier.pop_ready();
        }
        let recorded = &self.recorded;
        self.frontier
            .take_ready_if(|node_id, attempt| recorded_terminal(recorded, node_id, attempt).is_some())
    }

    /// Returns the recorded terminal result for this attempt, if any.
    fn recorded_terminal(&self, node_id: NodeId, attempt: AttemptKey) -> Option<NodeResult> {
        recorded_terminal(&self.recorded, node_id, attempt).cloned()
    }

    async fn start(&mut self, node_id: NodeId, tasks: &mut JoinSet<Outcome>) -> Result<(), StoreError> {
        let graph = self.graph.clone();
        let attempt = self.frontier.attempt(node_id);

        if let Some(recorded) = self.recorded_terminal(node_id, attempt) {
            tracing::debug!(%node_id, %attempt, status = %recorded.status, "replaying recorded result");
            if recorded.status == NodeStatus::Failed {
                self.record_failure(node_id, recorded.error.as_deref().unwrap_or("failed"));
            }
            return self.apply(node_id, &recorded).await;
        }

        let (Some(node), Some(info)) = (graph.get_node(node_id), graph.info(node_id)) else {
            return Ok(());
        };

        let started_at = Utc::now();
        self.store
            .append_node_result(self.run_id, node_id, attempt, NodeResult::running(started_at))
            .await?;
        self.frontier.mark_running(node_id);

        let (inputs, primary_port) = self.frontier.inputs(&graph, node_id);
        let primary_items = primary_port
            .as_deref()
            .and_then(|port| inputs.get(port))
            .cloned()
            .unwrap_or_default();
        let timeout = node
            .settings
            .timeout_ms
            .map_or(self.node_timeout, Duration::from_millis);
        let request = DispatchRequest {
            node: node.clone(),
            handler: info.handler.clone(),
            operation_key: info.descriptor.operation_key.clone(),
            template: info.template.clone(),
            mode: node.settings.mode.unwrap_or(info.descriptor.default_mode),
            inputs,
            primary_port,
            node_outputs: self.node_outputs.clone(),
            cursor: self.frontier.cursor(node_id),
            trigger: if info.descriptor.is_trigger {
                self.trigger_input.clone()
            } else {
                None
            },
            timeout,
        };

        tracing::debug!(%node_id, %attempt, node = %node.name, "dispatching node");
        let dispatcher = self.dispatcher.clone();
        let handle = tasks.spawn(async move { dispatcher.dispatch(request).await });
        self.in_flight.insert(
            handle.id(),
            InFlight {
                node_id,
                attempt,
                started_at,
                primary_items,
            },
        );
        Ok(())
    }

    /// Turns a task outcome into a stored result.
    async fn finish(&mut self, flight: InFlight, outcome: Outcome) -> Result<(), StoreError> {
        let InFlight {
            node_id,
            attempt,
            started_at,
            primary_items,
        } = flight;

        let result = match outcome {
            Ok(output) => NodeResult::success(output.ports, output.cursor, started_at),
            Err(error) if self.graph.error_port_wired(node_id) => {
                let message = error.to_string();
                tracing::warn!(%node_id, error = %message, "node failed, routing to error output");
                let mut outputs = BTreeMap::new();
                outputs.insert(ERROR_PORT.to_string(), error_items(primary_items, &message));
                NodeResult::success(outputs, None, started_at).with_error(message)
            }
            Err(error) => {
                let message = error.to_string();
                tracing::warn!(%node_id, error = %message, "node failed");
                self.record_failure(node_id, &message);
                NodeResult::failed(message, started_at)
            }
        };

        self.store
            .append_node_result(self.run_id, node_id, attempt, result.clone())
            .await
            .inspect_err(|e| tracing::error!(%node_id, error = %e, "failed to record node result"))?;
        self.apply(node_id, &result).await
    }

    fn record_failure(&mut self, node_id: NodeId, message: &str) {
        if self.failure.is_none() {
            let name = self
                .graph
                .get_node(node_id)
                .map_or_else(|| node_id.to_string(), |n| n.name.clone());
            self.failure = Some(format!("node '{name}' failed: {message}"));
        }
    }

    /// Feeds a stored result into the frontier and settles what it unblocks.
    async fn apply(&mut self, node_id: NodeId, result: &NodeResult) -> Result<(), StoreError> {
        let graph = self.graph.clone();
        if let Some(node) = graph.get_node(node_id) {
            let produced = result
                .first_output(&graph.output_order(node_id))
                .cloned()
                .unwrap_or_default();
            Arc::make_mut(&mut self.node_outputs).insert(node.name.clone(), produced);
        }
        let settled = self.frontier.complete(
            &graph,
            node_id,
            result.status,
            &result.outputs,
            result.cursor.clone(),
        );
        self.settle(settled).await?;
        if self.may_dispatch() {
            for reentered in self.frontier.reenter_loops(&graph) {
                tracing::debug!(
                    node_id = %reentered,
                    attempt = %self.frontier.attempt(reentered),
                    "re-entering batch loop"
                );
            }
        }
        Ok(())
    }

    /// Decides run or skip for settled nodes, cascading skips downstream.
    async fn settle(&mut self, settled: Vec<NodeId>) -> Result<(), StoreError> {
        let graph = self.graph.clone();
        let mut queue: VecDeque<NodeId> = settled.into();
        while let Some(node_id) = queue.pop_front() {
            if self.frontier.phase(node_id) != Some(Phase::Waiting) {
                continue;
            }
            let (Some(node), Some(info)) = (graph.get_node(node_id), graph.info(node_id)) else {
                continue;
            };
            let inputs = self.frontier.input_state(&graph, node_id);
            match info.handler.readiness(&node.parameters, &inputs) {
                Readiness::Run => {
                    tracing::debug!(%node_id, node = %node.name, "node ready");
                    self.frontier.mark_ready(&graph, node_id);
                }
                Readiness::Skip => {
                    let attempt = self.frontier.attempt(node_id);
                    tracing::debug!(%node_id, node = %node.name, "node skipped");
                    if self.recorded_terminal(node_id, attempt).is_none() {
                        self.store
                            .append_node_result(self.run_id, node_id, attempt, NodeResult::skipped())
                            .await?;
                    }
                    Arc::make_mut(&mut self.node_outputs).remove(&node.name);
                    let next = self.frontier.complete(
                        &graph,
                        node_id,
                        NodeStatus::Skipped,
                        &BTreeMap::new(),
                        None,
                    );
                    queue.extend(next);
                }
            }
        }
        Ok(())
    }

    /// Records never-run nodes as skipped and seals the run.
    async fn seal(self) -> Result<RunStatus, StoreError> {
        for (node_id, attempt) in self.frontier.unfinished() {
            if self.recorded_terminal(node_id, attempt).is_some() {
                continue;
            }
            tracing::debug!(%node_id, %attempt, "node never ran");
            self.store
                .append_node_result(self.run_id, node_id, attempt, NodeResult::skipped())
                .await?;
        }
        let error = if self.cancelled {
            Some(CANCELLED_ERROR.to_string())
        } else {
            self.failure.clone()
        };
        let status = if error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Success
        };
        self.store
            .seal_run(self.run_id, status, error)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "failed to seal run"))?;
        tracing::info!(%status, "run sealed");
        Ok(status)
    }
}

fn recorded_terminal(
    recorded: &BTreeMap<NodeId, NodeAttempts>,
    node_id: NodeId,
    attempt: AttemptKey,
) -> Option<&NodeResult> {
    recorded
        .get(&node_id)
        .and_then(|attempts| attempts.get(&attempt))
        .filter(|result| result.status.is_terminal())
}

/// Primary items with an `error` field added, or one `{error}` item.
fn error_items(primary_items: ItemList, message: &str) -> ItemList {
    if primary_items.is_empty() {
        let mut map = Map::new();
        map.insert("error".to_string(), JsonValue::String(message.to_string()));
        return vec![Item::from(map)];
    }
    primary_items
        .into_iter()
        .map(|item| {
            let mut map = item.into_object();
            map.insert("error".to_string(), JsonValue::String(message.to_string()));
            Item::from(map)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_items_annotate_inputs() {
        let items = error_items(vec![Item::new(json!({ "id": 1 }))], "boom");
        assert_eq!(items[0].json(), &json!({ "id": 1, "error": "boom" }));
        let items = error_items(Vec::new(), "boom");
        assert_eq!(items, vec![Item::new(json!({ "error": "boom" }))]);
    }
}
