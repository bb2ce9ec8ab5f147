//! Edge types for workflow graphs.
//!
//! Edges connect ports between nodes. Each edge specifies:
//! - The source port (output from one node)
//! - The target port (input on another node)
//!
//! Edge insertion order is significant: it orders items arriving at a port
//! from several edges and breaks ties between nodes that become ready together.

use crate::node::NodeId;
use crate::port::MAIN_PORT;
use serde::{Deserialize, Serialize};

/// An edge connecting two ports in a workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// The name of the output port on the source node.
    pub source_port: String,
    /// The name of the input port on the target node.
    pub target_port: String,
}

impl Edge {
    /// Creates a new edge between ports.
    #[must_use]
    pub fn new(source_port: impl Into<String>, target_port: impl Into<String>) -> Self {
        Self {
            source_port: source_port.into(),
            target_port: target_port.into(),
        }
    }

    /// Creates an edge between the `main` ports.
    #[must_use]
    pub fn main() -> Self {
        Self::new(MAIN_PORT, MAIN_PORT)
    }
}

impl Default for Edge {
    fn default() -> Self {
        Self::main()
    }
}

/// A complete edge reference including source and target node IDs.
///
/// This is the form edges take in a graph snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRef {
    /// The source node ID.
    pub source_node: NodeId,
    /// The source port name.
    pub source_port: String,
    /// The target node ID.
    pub target_node: NodeId,
    /// The target port name.
    pub target_port: String,
}

impl EdgeRef {
    /// Creates a new edge reference.
    #[must_use]
    pub fn new(
        source_node: NodeId,
        source_port: impl Into<String>,
        target_node: NodeId,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            source_node,
            source_port: source_port.into(),
            target_node,
            target_port: target_port.into(),
        }
    }

    /// Creates an edge reference between the `main` ports.
    #[must_use]
    pub fn main(source_node: NodeId, target_node: NodeId) -> Self {
        Self::new(source_node, MAIN_PORT, target_node, MAIN_PORT)
    }

    /// Returns the port pair carried on the graph edge.
    #[must_use]
    pub fn edge(&self) -> Edge {
        Edge::new(self.source_port.clone(), self.target_port.clone())
    }
}
