//! Workflow graph implementation using petgraph.
//!
//! A [`GraphSnapshot`] is the frozen, serializable form of a workflow version.
//! [`WorkflowGraph::build`] resolves every node type through the registry,
//! validates the structure, and caches what the scheduler needs per node:
//! handler, ports, compiled parameter template, and scheduling priority.

use crate::edge::{Edge, EdgeRef};
use crate::error::{DanglingEnd, ExpressionError, GraphError};
use crate::executor::{NodeDescriptor, NodeHandler, NodeRegistry};
use crate::expression::ParameterTemplate;
use crate::node::{ExecutionMode, Node, NodeId, OnError};
use crate::port::{ERROR_PORT, PortSet};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef as _;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// The frozen node and edge lists of one workflow version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Nodes in insertion order.
    pub nodes: Vec<Node>,
    /// Edges in insertion order.
    #[serde(default)]
    pub edges: Vec<EdgeRef>,
}

impl GraphSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node.
    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Appends an edge.
    #[must_use]
    pub fn with_edge(mut self, edge: EdgeRef) -> Self {
        self.edges.push(edge);
        self
    }

    /// Appends a `main` to `main` edge.
    #[must_use]
    pub fn connect(self, source: NodeId, target: NodeId) -> Self {
        self.with_edge(EdgeRef::main(source, target))
    }
}

/// Everything resolved for one node while building the graph.
pub(crate) struct NodeInfo {
    pub handler: Arc<dyn NodeHandler>,
    pub descriptor: NodeDescriptor,
    pub ports: PortSet,
    pub template: Arc<ParameterTemplate>,
}

/// One edge as seen from the graph, with its insertion index.
#[derive(Debug, Clone, Copy)]
pub struct Connection<'a> {
    /// Position of the edge in the snapshot.
    pub index: usize,
    pub source: NodeId,
    pub target: NodeId,
    pub edge: &'a Edge,
}

/// A validated workflow graph, immutable for the lifetime of a run.
pub struct WorkflowGraph {
    /// The underlying directed graph.
    graph: DiGraph<Node, Edge>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<NodeId, NodeIndex>,
    info: HashMap<NodeId, NodeInfo>,
    names: HashMap<String, NodeId>,
    triggers: Vec<NodeId>,
    priority: HashMap<NodeId, usize>,
    /// Batch node -> nodes reachable from its loop port.
    loop_bodies: HashMap<NodeId, BTreeSet<NodeId>>,
    snapshot: GraphSnapshot,
}

impl WorkflowGraph {
    /// Builds and validates a graph from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found: duplicate ids or names,
    /// unknown node types, rejected parameters, bad templates, dangling edges,
    /// unconnected required inputs, cycles, a missing trigger, or a batch loop
    /// whose body is also reachable from its done port.
    pub fn build(snapshot: &GraphSnapshot, registry: &NodeRegistry) -> Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut node_index_map = HashMap::new();
        let mut info = HashMap::new();
        let mut names = HashMap::new();

        for node in &snapshot.nodes {
            if node_index_map.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode { node_id: node.id });
            }
            if names.insert(node.name.clone(), node.id).is_some() {
                return Err(GraphError::DuplicateNodeName {
                    name: node.name.clone(),
                });
            }
            let node_info = resolve_node(node, registry)?;
            info.insert(node.id, node_info);
            node_index_map.insert(node.id, graph.add_node(node.clone()));
        }

        for (id, node_info) in &info {
            for name in node_info.template.node_references() {
                if !names.contains_key(&name) {
                    return Err(GraphError::Expression {
                        node_id: *id,
                        error: ExpressionError::UnknownReference { reference: name },
                    });
                }
            }
        }

        for edge_ref in &snapshot.edges {
            let dangling = |end| GraphError::DanglingEdge {
                edge: edge_ref.clone(),
                end,
            };
            let source = node_index_map
                .get(&edge_ref.source_node)
                .ok_or_else(|| dangling(DanglingEnd::SourceNode))?;
            let target = node_index_map
                .get(&edge_ref.target_node)
                .ok_or_else(|| dangling(DanglingEnd::TargetNode))?;
            let source_ports = info.get(&edge_ref.source_node).map(|i| &i.ports);
            if source_ports.and_then(|p| p.output(&edge_ref.source_port)).is_none() {
                return Err(dangling(DanglingEnd::SourcePort));
            }
            let target_ports = info.get(&edge_ref.target_node).map(|i| &i.ports);
            if target_ports.and_then(|p| p.input(&edge_ref.target_port)).is_none() {
                return Err(dangling(DanglingEnd::TargetPort));
            }
            graph.add_edge(
                *source,
                *target,
                Edge::new(edge_ref.source_port.clone(), edge_ref.target_port.clone()),
            );
        }

        let mut workflow = Self {
            graph,
            node_index_map,
            info,
            names,
            triggers: Vec::new(),
            priority: HashMap::new(),
            loop_bodies: HashMap::new(),
            snapshot: snapshot.clone(),
        };
        workflow.validate()?;
        workflow.triggers = snapshot
            .nodes
            .iter()
            .filter(|node| workflow.is_trigger(node.id))
            .map(|node| node.id)
            .collect();
        if workflow.triggers.is_empty() {
            return Err(GraphError::NoTrigger);
        }
        workflow.priority = workflow.compute_priority();
        workflow.loop_bodies = workflow.compute_loop_bodies()?;
        Ok(workflow)
    }

    /// Checks required inputs and acyclicity.
    fn validate(&self) -> Result<(), GraphError> {
        // Check required inputs
        for node in self.nodes() {
            let incoming_ports: HashSet<&str> = self
                .incoming(node.id)
                .iter()
                .map(|c| c.edge.target_port.as_str())
                .collect();

            if let Some(ports) = self.ports(node.id) {
                for input in &ports.inputs {
                    if input.required && !incoming_ports.contains(input.name.as_str()) {
                        return Err(GraphError::RequiredInputMissing {
                            node_id: node.id,
                            port_name: input.name.clone(),
                        });
                    }
                }
            }
        }

        // Check for cycles using DFS
        if petgraph::algo::is_cyclic_directed(&self.graph) {
            return Err(GraphError::CycleDetected);
        }

        Ok(())
    }

    /// Triggers first in node order, then nodes by their earliest incoming edge.
    fn compute_priority(&self) -> HashMap<NodeId, usize> {
        let trigger_count = self.triggers.len();
        let edge_count = self.graph.edge_count();
        let mut priority = HashMap::new();
        for (position, node) in self.snapshot.nodes.iter().enumerate() {
            let rank = if let Some(t) = self.triggers.iter().position(|id| *id == node.id) {
                t
            } else if let Some(first) = self.incoming(node.id).first() {
                trigger_count + first.index
            } else {
                trigger_count + edge_count + position
            };
            priority.insert(node.id, rank);
        }
        priority
    }

    fn compute_loop_bodies(&self) -> Result<HashMap<NodeId, BTreeSet<NodeId>>, GraphError> {
        let mut bodies = HashMap::new();
        for node in self.nodes() {
            let Some(loop_port) = self
                .info
                .get(&node.id)
                .and_then(|i| i.descriptor.loop_port.as_deref())
            else {
                continue;
            };
            let (body_roots, exit_roots): (Vec<_>, Vec<_>) = self
                .outgoing(node.id)
                .into_iter()
                .partition(|c| c.edge.source_port == loop_port);
            let body = self.reachable_from(body_roots.iter().map(|c| c.target));
            let exit = self.reachable_from(exit_roots.iter().map(|c| c.target));
            if let Some(overlap) = body.intersection(&exit).next() {
                return Err(GraphError::BatchLoopOverlap {
                    loop_node: node.id,
                    node_id: *overlap,
                });
            }
            bodies.insert(node.id, body);
        }
        Ok(bodies)
    }

    fn reachable_from(&self, roots: impl Iterator<Item = NodeId>) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<NodeId> = roots.collect();
        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                stack.extend(self.outgoing(id).iter().map(|c| c.target));
            }
        }
        seen
    }

    /// Returns a reference to a node by its ID.
    #[must_use]
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(&node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns the node with the given name.
    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.names.get(name).and_then(|id| self.get_node(*id))
    }

    /// Returns all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the snapshot the graph was built from.
    #[must_use]
    pub fn snapshot(&self) -> &GraphSnapshot {
        &self.snapshot
    }

    pub(crate) fn info(&self, node_id: NodeId) -> Option<&NodeInfo> {
        self.info.get(&node_id)
    }

    /// Returns the resolved ports of a node.
    #[must_use]
    pub fn ports(&self, node_id: NodeId) -> Option<&PortSet> {
        self.info.get(&node_id).map(|i| &i.ports)
    }

    /// Returns the output port names of a node in declaration order.
    #[must_use]
    pub fn output_order(&self, node_id: NodeId) -> Vec<String> {
        self.ports(node_id)
            .map(|p| p.output_names().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Returns the effective execution mode of a node.
    #[must_use]
    pub fn mode(&self, node_id: NodeId) -> Option<ExecutionMode> {
        let node = self.get_node(node_id)?;
        let info = self.info.get(&node_id)?;
        Some(node.settings.mode.unwrap_or(info.descriptor.default_mode))
    }

    /// Returns true if the node's type is a trigger.
    #[must_use]
    pub fn is_trigger(&self, node_id: NodeId) -> bool {
        self.info
            .get(&node_id)
            .is_some_and(|i| i.descriptor.is_trigger)
    }

    /// Trigger nodes in insertion order.
    #[must_use]
    pub fn triggers(&self) -> &[NodeId] {
        &self.triggers
    }

    /// Deterministic dispatch priority; lower runs first.
    #[must_use]
    pub fn priority(&self, node_id: NodeId) -> usize {
        self.priority.get(&node_id).copied().unwrap_or(usize::MAX)
    }

    /// Incoming edges in insertion order.
    #[must_use]
    pub fn incoming(&self, node_id: NodeId) -> Vec<Connection<'_>> {
        self.connections(node_id, Direction::Incoming)
    }

    /// Outgoing edges in insertion order.
    #[must_use]
    pub fn outgoing(&self, node_id: NodeId) -> Vec<Connection<'_>> {
        self.connections(node_id, Direction::Outgoing)
    }

    fn connections(&self, node_id: NodeId, direction: Direction) -> Vec<Connection<'_>> {
        let Some(&index) = self.node_index_map.get(&node_id) else {
            return Vec::new();
        };
        // petgraph yields adjacent edges newest first.
        let mut connections: Vec<_> = self
            .graph
            .edges_directed(index, direction)
            .filter_map(|edge| {
                let source = self.graph.node_weight(edge.source())?.id;
                let target = self.graph.node_weight(edge.target())?.id;
                Some(Connection {
                    index: edge.id().index(),
                    source,
                    target,
                    edge: edge.weight(),
                })
            })
            .collect();
        connections.sort_by_key(|c| c.index);
        connections
    }

    /// Returns true if the node routes errors and its error port has an edge.
    #[must_use]
    pub fn error_port_wired(&self, node_id: NodeId) -> bool {
        let routes_errors = self
            .get_node(node_id)
            .is_some_and(|n| n.settings.on_error == OnError::ErrorOutput);
        routes_errors
            && self
                .outgoing(node_id)
                .iter()
                .any(|c| c.edge.source_port == ERROR_PORT)
    }

    /// Nodes reachable from a batch node's loop port.
    #[must_use]
    pub fn loop_body(&self, node_id: NodeId) -> Option<&BTreeSet<NodeId>> {
        self.loop_bodies.get(&node_id)
    }

    /// Batch nodes and their loop bodies.
    pub fn loop_bodies(&self) -> impl Iterator<Item = (NodeId, &BTreeSet<NodeId>)> {
        self.loop_bodies.iter().map(|(id, body)| (*id, body))
    }
}

fn resolve_node(node: &Node, registry: &NodeRegistry) -> Result<NodeInfo, GraphError> {
    let handler = registry
        .get(&node.node_type)
        .ok_or_else(|| GraphError::UnknownNodeType {
            node_id: node.id,
            node_type: node.node_type.clone(),
        })?;
    handler
        .validate(&node.parameters)
        .map_err(|e| GraphError::InvalidParameters {
            node_id: node.id,
            reason: e.to_string(),
        })?;
    let template =
        ParameterTemplate::compile(&node.parameters).map_err(|error| GraphError::Expression {
            node_id: node.id,
            error,
        })?;
    let mut ports = handler.ports(&node.parameters, &node.settings);
    if node.settings.on_error == OnError::ErrorOutput && ports.output(ERROR_PORT).is_none() {
        ports = ports.with_output(ERROR_PORT);
    }
    Ok(NodeInfo {
        descriptor: handler.descriptor(),
        handler,
        ports,
        template: Arc::new(template),
    })
}

impl fmt::Debug for WorkflowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowGraph")
            .field("nodes", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .field("triggers", &self.triggers)
            .finish_non_exhaustive()
    }
}
