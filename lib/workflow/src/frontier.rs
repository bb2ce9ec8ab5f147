//! Per-run scheduling bookkeeping.
//!
//! Every incoming edge of a node delivers exactly once per attempt: either
//! data or a skip signal. A node whose edges have all delivered is settled
//! and its handler decides whether it runs or is skipped. Batch nodes that
//! return a cursor are re-entered once their loop body is terminal; the body
//! is then reset to a fresh attempt with only its outside inputs kept.

use crate::execution::{AttemptKey, NodeStatus};
use crate::executor::{InputState, PortInput};
use crate::graph::WorkflowGraph;
use crate::item::ItemList;
use crate::node::NodeId;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// What one edge delivered.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Delivery {
    Data(ItemList),
    Skip,
}

/// Where a node is in its current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Waiting,
    Ready,
    Running,
    Done(NodeStatus),
}

#[derive(Debug)]
struct Slot {
    attempt: AttemptKey,
    phase: Phase,
    /// Edge index -> delivery, for the current attempt.
    deliveries: HashMap<usize, Delivery>,
    /// Cursor to re-enter with; only batch nodes set it.
    pending_cursor: Option<JsonValue>,
}

impl Slot {
    fn new() -> Self {
        Self {
            attempt: AttemptKey::FIRST,
            phase: Phase::Waiting,
            deliveries: HashMap::new(),
            pending_cursor: None,
        }
    }
}

/// The remaining work of one run.
#[derive(Debug)]
pub(crate) struct Frontier {
    slots: HashMap<NodeId, Slot>,
    /// Ready nodes ordered by graph priority.
    ready: BTreeSet<(usize, NodeId)>,
}

impl Frontier {
    pub(crate) fn new(graph: &WorkflowGraph) -> Self {
        Self {
            slots: graph.nodes().map(|node| (node.id, Slot::new())).collect(),
            ready: BTreeSet::new(),
        }
    }

    pub(crate) fn attempt(&self, node_id: NodeId) -> AttemptKey {
        self.slots
            .get(&node_id)
            .map_or(AttemptKey::FIRST, |slot| slot.attempt)
    }

    pub(crate) fn phase(&self, node_id: NodeId) -> Option<Phase> {
        self.slots.get(&node_id).map(|slot| slot.phase)
    }

    pub(crate) fn cursor(&self, node_id: NodeId) -> Option<JsonValue> {
        self.slots
            .get(&node_id)
            .and_then(|slot| slot.pending_cursor.clone())
    }

    pub(crate) fn mark_ready(&mut self, graph: &WorkflowGraph, node_id: NodeId) {
        if let Some(slot) = self.slots.get_mut(&node_id) {
            slot.phase = Phase::Ready;
            self.ready.insert((graph.priority(node_id), node_id));
        }
    }

    /// Takes the highest-priority ready node.
    pub(crate) fn pop_ready(&mut self) -> Option<NodeId> {
        self.ready.pop_first().map(|(_, node_id)| node_id)
    }

    /// Takes the highest-priority ready node whose current attempt passes
    /// `accept`, leaving the others queued.
    pub(crate) fn take_ready_if(
        &mut self,
        mut accept: impl FnMut(NodeId, AttemptKey) -> bool,
    ) -> Option<NodeId> {
        let entry = self
            .ready
            .iter()
            .copied()
            .find(|(_, node_id)| accept(*node_id, self.attempt(*node_id)))?;
        self.ready.remove(&entry);
        Some(entry.1)
    }

    pub(crate) fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub(crate) fn mark_running(&mut self, node_id: NodeId) {
        if let Some(slot) = self.slots.get_mut(&node_id) {
            slot.phase = Phase::Running;
        }
    }

    /// True once every incoming edge has delivered for the current attempt.
    pub(crate) fn is_settled(&self, graph: &WorkflowGraph, node_id: NodeId) -> bool {
        let Some(slot) = self.slots.get(&node_id) else {
            return false;
        };
        graph
            .incoming(node_id)
            .iter()
            .all(|c| slot.deliveries.contains_key(&c.index))
    }

    /// Connection and data facts for each declared input port.
    pub(crate) fn input_state(&self, graph: &WorkflowGraph, node_id: NodeId) -> InputState {
        let incoming = graph.incoming(node_id);
        let deliveries = self.slots.get(&node_id).map(|slot| &slot.deliveries);
        let ports = graph
            .ports(node_id)
            .map(|ports| {
                ports
                    .inputs
                    .iter()
                    .map(|port| {
                        let edges: Vec<usize> = incoming
                            .iter()
                            .filter(|c| c.edge.target_port == port.name)
                            .map(|c| c.index)
                            .collect();
                        let has_data = edges.iter().any(|index| {
                            matches!(
                                deliveries.and_then(|d| d.get(index)),
                                Some(Delivery::Data(items)) if !items.is_empty()
                            )
                        });
                        PortInput {
                            name: port.name.clone(),
                            required: port.required,
                            connected: !edges.is_empty(),
                            has_data,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        InputState::new(ports)
    }

    /// Items per input port, concatenated in edge insertion order, plus the
    /// first declared port that carries data.
    pub(crate) fn inputs(
        &self,
        graph: &WorkflowGraph,
        node_id: NodeId,
    ) -> (HashMap<String, ItemList>, Option<String>) {
        let mut inputs: HashMap<String, ItemList> = HashMap::new();
        if let Some(slot) = self.slots.get(&node_id) {
            for connection in graph.incoming(node_id) {
                if let Some(Delivery::Data(items)) = slot.deliveries.get(&connection.index) {
                    inputs
                        .entry(connection.edge.target_port.clone())
                        .or_default()
                        .extend(items.iter().cloned());
                }
            }
        }
        let primary = graph.ports(node_id).and_then(|ports| {
            ports
                .inputs
                .iter()
                .find(|port| inputs.get(&port.name).is_some_and(|items| !items.is_empty()))
                .map(|port| port.name.clone())
        });
        (inputs, primary)
    }

    /// Records a terminal result and delivers its outputs downstream.
    ///
    /// Emitted ports deliver data, or a skip when empty. Ports the node did
    /// not emit are skipped, unless the node returned a cursor, in which case
    /// they stay open for a later attempt. Returns the downstream nodes that
    /// became settled, in edge order.
    pub(crate) fn complete(
        &mut self,
        graph: &WorkflowGraph,
        node_id: NodeId,
        status: NodeStatus,
        outputs: &BTreeMap<String, ItemList>,
        cursor: Option<JsonValue>,
    ) -> Vec<NodeId> {
        let Some(slot) = self.slots.get_mut(&node_id) else {
            return Vec::new();
        };
        slot.phase = Phase::Done(status);
        let reentered = slot.attempt > AttemptKey::FIRST;
        slot.pending_cursor = cursor.clone();

        if status == NodeStatus::Failed {
            return Vec::new();
        }
        if cursor.is_some() && reentered {
            self.reset_body(graph, node_id);
        }

        let mut settled = Vec::new();
        for connection in graph.outgoing(node_id) {
            let delivery = match outputs.get(&connection.edge.source_port) {
                Some(items) if !items.is_empty() => Delivery::Data(items.clone()),
                Some(_) => Delivery::Skip,
                None if cursor.is_some() => continue,
                None => Delivery::Skip,
            };
            if self.deliver(connection.index, connection.target, delivery)
                && self.is_settled(graph, connection.target)
                && !settled.contains(&connection.target)
            {
                settled.push(connection.target);
            }
        }
        settled
    }

    /// Returns false when the target is no longer waiting for this attempt.
    fn deliver(&mut self, edge_index: usize, target: NodeId, delivery: Delivery) -> bool {
        match self.slots.get_mut(&target) {
            Some(slot) if slot.phase == Phase::Waiting => {
                slot.deliveries.insert(edge_index, delivery);
                true
            }
            _ => false,
        }
    }

    /// Starts a fresh attempt for every node of a loop body.
    fn reset_body(&mut self, graph: &WorkflowGraph, loop_node: NodeId) {
        let Some(body) = graph.loop_body(loop_node) else {
            return;
        };
        for member in body {
            let inside: HashSet<usize> = graph
                .incoming(*member)
                .iter()
                .filter(|c| c.source == loop_node || body.contains(&c.source))
                .map(|c| c.index)
                .collect();
            if let Some(slot) = self.slots.get_mut(member) {
                slot.attempt = slot.attempt.next();
                slot.phase = Phase::Waiting;
                slot.pending_cursor = None;
                slot.deliveries.retain(|index, _| !inside.contains(index));
            }
        }
    }

    /// Queues batch nodes whose body finished and who asked to continue.
    pub(crate) fn reenter_loops(&mut self, graph: &WorkflowGraph) -> Vec<NodeId> {
        let mut reentered = Vec::new();
        for (loop_node, body) in graph.loop_bodies() {
            let waiting = self.slots.get(&loop_node).is_some_and(|slot| {
                slot.phase == Phase::Done(NodeStatus::Success) && slot.pending_cursor.is_some()
            });
            let body_done = body
                .iter()
                .all(|member| matches!(self.phase(*member), Some(Phase::Done(_))));
            if waiting && body_done {
                if let Some(slot) = self.slots.get_mut(&loop_node) {
                    slot.attempt = slot.attempt.next();
                }
                self.mark_ready(graph, loop_node);
                reentered.push(loop_node);
            }
        }
        reentered
    }

    /// Nodes that never reached a terminal state in their current attempt.
    pub(crate) fn unfinished(&self) -> Vec<(NodeId, AttemptKey)> {
        let mut unfinished: Vec<_> = self
            .slots
            .iter()
            .filter(|(_, slot)| !matches!(slot.phase, Phase::Done(_)))
            .map(|(id, slot)| (*id, slot.attempt))
            .collect();
        unfinished.sort();
        unfinished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeRef;
    use crate::executor::{NodeRegistry, Readiness};
    use crate::graph::GraphSnapshot;
    use crate::item::Item;
    use crate::node::Node;
    use crate::port::MAIN_PORT;
    use serde_json::json;

    fn main_output(values: &[JsonValue]) -> BTreeMap<String, ItemList> {
        let mut outputs = BTreeMap::new();
        outputs.insert(
            MAIN_PORT.to_string(),
            values.iter().cloned().map(Item::new).collect(),
        );
        outputs
    }

    #[test]
    fn data_settles_downstream_node() {
        let start = Node::new("Start", "manual_trigger");
        let a = Node::new("A", "no_op");
        let snapshot = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(a.clone())
            .connect(start.id, a.id);
        let graph = WorkflowGraph::build(&snapshot, &NodeRegistry::with_builtins()).unwrap();
        let mut frontier = Frontier::new(&graph);

        assert!(!frontier.is_settled(&graph, a.id));
        let settled = frontier.complete(
            &graph,
            start.id,
            NodeStatus::Success,
            &main_output(&[json!({ "v": 1 })]),
            None,
        );
        assert_eq!(settled, vec![a.id]);
        let state = frontier.input_state(&graph, a.id);
        assert_eq!(state.default_readiness(), Readiness::Run);
        let (inputs, primary) = frontier.inputs(&graph, a.id);
        assert_eq!(primary.as_deref(), Some(MAIN_PORT));
        assert_eq!(inputs[MAIN_PORT].len(), 1);
    }

    #[test]
    fn empty_port_delivers_skip() {
        let start = Node::new("Start", "manual_trigger");
        let a = Node::new("A", "no_op");
        let snapshot = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(a.clone())
            .connect(start.id, a.id);
        let graph = WorkflowGraph::build(&snapshot, &NodeRegistry::with_builtins()).unwrap();
        let mut frontier = Frontier::new(&graph);

        let settled = frontier.complete(&graph, start.id, NodeStatus::Success, &main_output(&[]), None);
        assert_eq!(settled, vec![a.id]);
        assert_eq!(
            frontier.input_state(&graph, a.id).default_readiness(),
            Readiness::Skip
        );
    }

    #[test]
    fn port_concatenates_edges_in_insertion_order() {
        let start = Node::new("Start", "manual_trigger");
        let a = Node::new("A", "no_op");
        let b = Node::new("B", "no_op");
        let sink = Node::new("Sink", "no_op");
        let snapshot = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(a.clone())
            .with_node(b.clone())
            .with_node(sink.clone())
            .connect(start.id, a.id)
            .connect(start.id, b.id)
            .connect(b.id, sink.id)
            .connect(a.id, sink.id);
        let graph = WorkflowGraph::build(&snapshot, &NodeRegistry::with_builtins()).unwrap();
        let mut frontier = Frontier::new(&graph);

        let settled = frontier.complete(&graph, a.id, NodeStatus::Success, &main_output(&[json!("a")]), None);
        assert!(settled.is_empty());
        let settled = frontier.complete(&graph, b.id, NodeStatus::Success, &main_output(&[json!("b")]), None);
        assert_eq!(settled, vec![sink.id]);
        let (inputs, _) = frontier.inputs(&graph, sink.id);
        let values: Vec<_> = inputs[MAIN_PORT].iter().map(|i| i.json().clone()).collect();
        assert_eq!(values, vec![json!("b"), json!("a")]);
    }

    #[test]
    fn failed_node_delivers_nothing() {
        let start = Node::new("Start", "manual_trigger");
        let a = Node::new("A", "no_op");
        let snapshot = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(a.clone())
            .connect(start.id, a.id);
        let graph = WorkflowGraph::build(&snapshot, &NodeRegistry::with_builtins()).unwrap();
        let mut frontier = Frontier::new(&graph);

        let settled = frontier.complete(&graph, start.id, NodeStatus::Failed, &BTreeMap::new(), None);
        assert!(settled.is_empty());
        assert_eq!(frontier.unfinished(), vec![(a.id, AttemptKey::FIRST)]);
    }

    #[test]
    fn take_ready_if_skips_rejected_nodes() {
        let start = Node::new("Start", "manual_trigger");
        let a = Node::new("A", "no_op");
        let b = Node::new("B", "no_op");
        let snapshot = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(a.clone())
            .with_node(b.clone())
            .connect(start.id, a.id)
            .connect(start.id, b.id);
        let graph = WorkflowGraph::build(&snapshot, &NodeRegistry::with_builtins()).unwrap();
        let mut frontier = Frontier::new(&graph);
        frontier.mark_ready(&graph, a.id);
        frontier.mark_ready(&graph, b.id);

        assert_eq!(frontier.take_ready_if(|id, _| id == b.id), Some(b.id));
        assert_eq!(frontier.take_ready_if(|id, _| id == b.id), None);
        assert_eq!(frontier.pop_ready(), Some(a.id));
        assert!(!frontier.has_ready());
    }

    #[test]
    fn batch_loop_reenters_and_resets_body() {
        let start = Node::new("Start", "manual_trigger");
        let batch = Node::new("Batch", "split_in_batches");
        let body = Node::new("Body", "no_op");
        let after = Node::new("After", "no_op");
        let snapshot = GraphSnapshot::new()
            .with_node(start.clone())
            .with_node(batch.clone())
            .with_node(body.clone())
            .with_node(after.clone())
            .connect(start.id, batch.id)
            .with_edge(EdgeRef::new(batch.id, "batch", body.id, MAIN_PORT))
            .with_edge(EdgeRef::new(batch.id, "done", after.id, MAIN_PORT));
        let graph = WorkflowGraph::build(&snapshot, &NodeRegistry::with_builtins()).unwrap();
        let mut frontier = Frontier::new(&graph);

        frontier.complete(&graph, start.id, NodeStatus::Success, &main_output(&[json!(1), json!(2)]), None);
        frontier.mark_running(batch.id);

        let mut batch_out = BTreeMap::new();
        batch_out.insert("batch".to_string(), vec![Item::new(json!(1))]);
        let settled = frontier.complete(
            &graph,
            batch.id,
            NodeStatus::Success,
            &batch_out,
            Some(json!({ "offset": 1 })),
        );
        assert_eq!(settled, vec![body.id]);
        assert!(!frontier.is_settled(&graph, after.id));
        assert!(frontier.reenter_loops(&graph).is_empty());

        frontier.complete(&graph, body.id, NodeStatus::Success, &main_output(&[json!(1)]), None);
        assert_eq!(frontier.reenter_loops(&graph), vec![batch.id]);
        assert_eq!(frontier.attempt(batch.id), AttemptKey(1));
        assert_eq!(frontier.cursor(batch.id), Some(json!({ "offset": 1 })));
        assert_eq!(frontier.pop_ready(), Some(batch.id));

        let settled = frontier.complete(
            &graph,
            batch.id,
            NodeStatus::Success,
            &batch_out,
            Some(json!({ "offset": 2 })),
        );
        assert_eq!(settled, vec![body.id]);
        assert_eq!(frontier.attempt(body.id), AttemptKey(1));

        frontier.complete(&graph, body.id, NodeStatus::Success, &main_output(&[json!(2)]), None);
        assert_eq!(frontier.reenter_loops(&graph), vec![batch.id]);
        frontier.pop_ready();

        let mut done_out = BTreeMap::new();
        done_out.insert("done".to_string(), vec![Item::new(json!(1)), Item::new(json!(2))]);
        let settled = frontier.complete(&graph, batch.id, NodeStatus::Success, &done_out, None);
        assert_eq!(settled, vec![after.id]);
        // The body keeps its last real result.
        assert_eq!(frontier.phase(body.id), Some(Phase::Done(NodeStatus::Success)));
        assert!(frontier.reenter_loops(&graph).is_empty());
    }
}
