//! Frozen workflow versions, as handed to the engine.
//!
//! Authoring and storage of definitions live elsewhere; the engine only sees
//! an immutable snapshot of one version.

use crate::graph::GraphSnapshot;
use serde::{Deserialize, Serialize};
use weft_core::{WorkflowId, WorkflowVersionId};

/// One frozen version of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    /// The workflow this version belongs to.
    pub workflow_id: WorkflowId,
    /// This version.
    pub version_id: WorkflowVersionId,
    /// Human-readable name.
    pub name: String,
    /// The graph to execute.
    pub graph: GraphSnapshot,
}

impl WorkflowSnapshot {
    /// Creates a snapshot with fresh workflow and version IDs.
    #[must_use]
    pub fn new(name: impl Into<String>, graph: GraphSnapshot) -> Self {
        Self {
            workflow_id: WorkflowId::new(),
            version_id: WorkflowVersionId::new(),
            name: name.into(),
            graph,
        }
    }

    /// Parses a snapshot from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid snapshot document.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
