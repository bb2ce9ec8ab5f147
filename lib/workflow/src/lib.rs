//! Workflow execution engine for weft.
//!
//! This crate provides the core workflow execution engine, including:
//!
//! - **Graph Model**: Validated directed graphs over petgraph with named ports
//! - **Expressions**: `{{ }}` parameter templates evaluated per item
//! - **Node Types**: Trigger, transform, conditional, merge, batch loop, and connector nodes
//! - **Scheduling**: Ready-set dispatch with bounded concurrency and per-node timeouts
//! - **Run State**: Append-only node results behind a pluggable `RunStore`
//! - **Engine**: Start, observe, cancel, and resume runs

pub mod config;
pub mod definition;
pub mod edge;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod execution;
pub mod executor;
pub mod expression;
pub(crate) mod frontier;
pub mod graph;
pub mod item;
pub mod node;
pub mod nodes;
pub mod port;
pub mod run_state;
pub(crate) mod scheduler;
pub mod store;

pub use config::EngineConfig;
pub use definition::WorkflowSnapshot;
pub use edge::{Edge, EdgeRef};
pub use engine::Engine;
pub use envelope::{Envelope, EnvelopeError};
pub use error::{EngineError, ExpressionError, GraphError, NodeError, StoreError};
pub use execution::{AttemptKey, CANCELLED_ERROR, NodeResult, NodeStatus, RunStatus};
pub use executor::{NodeContext, NodeDescriptor, NodeHandler, NodeOutput, NodeRegistry};
pub use graph::{GraphSnapshot, WorkflowGraph};
pub use item::{Item, ItemList};
pub use node::{ExecutionMode, Node, NodeId, NodeSettings, OnError};
pub use port::{ERROR_PORT, InputPort, MAIN_PORT, OutputPort, PortSet};
pub use run_state::{RunRecord, RunState};
pub use store::{InMemoryRunStore, RunStore};
