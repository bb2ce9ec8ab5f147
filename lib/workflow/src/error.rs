//! Error types for the workflow crate.
//!
//! - `GraphError`: structural problems found while building a graph
//! - `ExpressionError`: template compilation and evaluation failures
//! - `NodeError`: failures of a single node execution
//! - `StoreError`: run state persistence failures
//! - `EngineError`: failures surfaced by the engine API

use crate::edge::EdgeRef;
use crate::node::NodeId;
use std::fmt;
use weft_core::WorkflowRunId;
use weft_metering::MeteringError;

/// Which end of an edge could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DanglingEnd {
    /// The source node does not exist.
    SourceNode,
    /// The source node exists but has no such output port.
    SourcePort,
    /// The target node does not exist.
    TargetNode,
    /// The target node exists but has no such input port.
    TargetPort,
}

impl fmt::Display for DanglingEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceNode => write!(f, "source node not found"),
            Self::SourcePort => write!(f, "source port not found"),
            Self::TargetNode => write!(f, "target node not found"),
            Self::TargetPort => write!(f, "target port not found"),
        }
    }
}

/// Errors from graph construction and validation.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    /// A node's type is not registered.
    UnknownNodeType { node_id: NodeId, node_type: String },
    /// An edge references a missing node or port.
    DanglingEdge { edge: EdgeRef, end: DanglingEnd },
    /// The graph has no trigger node.
    NoTrigger,
    /// Graph contains cycles.
    CycleDetected,
    /// Two nodes share an ID.
    DuplicateNode { node_id: NodeId },
    /// Two nodes share a name.
    DuplicateNodeName { name: String },
    /// A required input port has no incoming edge.
    RequiredInputMissing { node_id: NodeId, port_name: String },
    /// The node type rejected the node's parameters.
    InvalidParameters { node_id: NodeId, reason: String },
    /// A parameter template failed to compile.
    Expression {
        node_id: NodeId,
        error: ExpressionError,
    },
    /// A node is reachable from both the loop and done ports of a batch node.
    BatchLoopOverlap { loop_node: NodeId, node_id: NodeId },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNodeType { node_id, node_type } => {
                write!(f, "node {node_id} has unknown type '{node_type}'")
            }
            Self::DanglingEdge { edge, end } => {
                write!(
                    f,
                    "dangling edge {}:{} -> {}:{}: {end}",
                    edge.source_node, edge.source_port, edge.target_node, edge.target_port
                )
            }
            Self::NoTrigger => write!(f, "graph has no trigger node"),
            Self::CycleDetected => write!(f, "graph contains cycles"),
            Self::DuplicateNode { node_id } => write!(f, "duplicate node id {node_id}"),
            Self::DuplicateNodeName { name } => write!(f, "duplicate node name '{name}'"),
            Self::RequiredInputMissing { node_id, port_name } => {
                write!(
                    f,
                    "required input port '{port_name}' on node {node_id} has no incoming edge"
                )
            }
            Self::InvalidParameters { node_id, reason } => {
                write!(f, "invalid parameters for node {node_id}: {reason}")
            }
            Self::Expression { node_id, error } => {
                write!(f, "expression error in node {node_id}: {error}")
            }
            Self::BatchLoopOverlap { loop_node, node_id } => {
                write!(
                    f,
                    "node {node_id} is reachable from both the loop and done outputs of {loop_node}"
                )
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors from compiling or evaluating template expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    /// A `$` root, identifier, or node name that does not exist.
    UnknownReference { reference: String },
    /// The expression text could not be parsed.
    SyntaxError { position: usize, message: String },
    /// An operator or accessor was applied to a value of the wrong type.
    TypeMismatch { message: String },
}

impl ExpressionError {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self::SyntaxError {
            position,
            message: message.into(),
        }
    }

    pub(crate) fn mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            message: message.into(),
        }
    }
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownReference { reference } => write!(f, "unknown reference '{reference}'"),
            Self::SyntaxError { position, message } => {
                write!(f, "syntax error at {position}: {message}")
            }
            Self::TypeMismatch { message } => write!(f, "type mismatch: {message}"),
        }
    }
}

impl std::error::Error for ExpressionError {}

/// Errors raised while executing a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The node, or the remote call it made, did not finish in time.
    Timeout { timeout_ms: Option<u64> },
    /// A remote call or the handler itself failed.
    RemoteError { message: String },
    /// Inputs or resolved parameters were invalid.
    ValidationError { message: String },
    /// Credentials could not be resolved or were rejected.
    CredentialError { message: String },
    /// A parameter template failed at evaluation time.
    Expression(ExpressionError),
    /// The metering gate refused to charge for this node.
    InsufficientBalance { operation_key: String },
}

impl NodeError {
    /// Shorthand for a `RemoteError`.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteError {
            message: message.into(),
        }
    }

    /// Shorthand for a `ValidationError`.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout {
                timeout_ms: Some(ms),
            } => write!(f, "node timed out after {ms}ms"),
            Self::Timeout { timeout_ms: None } => write!(f, "node timed out"),
            Self::RemoteError { message } => write!(f, "remote error: {message}"),
            Self::ValidationError { message } => write!(f, "validation error: {message}"),
            Self::CredentialError { message } => write!(f, "credential error: {message}"),
            Self::Expression(error) => write!(f, "expression error: {error}"),
            Self::InsufficientBalance { operation_key } => {
                write!(f, "insufficient balance for '{operation_key}'")
            }
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Expression(error) => Some(error),
            _ => None,
        }
    }
}

impl From<ExpressionError> for NodeError {
    fn from(error: ExpressionError) -> Self {
        Self::Expression(error)
    }
}

/// Errors from a run state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No run with this ID exists.
    NotFound { run_id: WorkflowRunId },
    /// A run with this ID already exists.
    AlreadyExists { run_id: WorkflowRunId },
    /// The run is sealed and no longer accepts writes.
    RunSealed { run_id: WorkflowRunId },
    /// The storage backend failed.
    Backend { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { run_id } => write!(f, "run not found: {run_id}"),
            Self::AlreadyExists { run_id } => write!(f, "run already exists: {run_id}"),
            Self::RunSealed { run_id } => write!(f, "run {run_id} is sealed"),
            Self::Backend { reason } => write!(f, "store backend error: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from the engine API.
#[derive(Debug)]
pub enum EngineError {
    /// The workflow graph failed validation.
    Graph(GraphError),
    /// The run-level charge was rejected.
    Metering(MeteringError),
    /// The run store failed.
    Store(StoreError),
    /// No run with this ID is known.
    RunNotFound { run_id: WorkflowRunId },
    /// The run already reached a terminal status.
    RunAlreadyTerminal { run_id: WorkflowRunId },
    /// The run task panicked or was aborted.
    TaskFailed { run_id: WorkflowRunId, reason: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph(error) => write!(f, "invalid workflow graph: {error}"),
            Self::Metering(error) => write!(f, "run rejected by metering: {error}"),
            Self::Store(error) => write!(f, "run store error: {error}"),
            Self::RunNotFound { run_id } => write!(f, "run not found: {run_id}"),
            Self::RunAlreadyTerminal { run_id } => write!(f, "run {run_id} already finished"),
            Self::TaskFailed { run_id, reason } => {
                write!(f, "run task for {run_id} failed: {reason}")
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Graph(error) => Some(error),
            Self::Metering(error) => Some(error),
            Self::Store(error) => Some(error),
            _ => None,
        }
    }
}

impl From<GraphError> for EngineError {
    fn from(error: GraphError) -> Self {
        Self::Graph(error)
    }
}

impl From<MeteringError> for EngineError {
    fn from(error: MeteringError) -> Self {
        Self::Metering(error)
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { run_id } => Self::RunNotFound { run_id },
            other => Self::Store(other),
        }
    }
}
