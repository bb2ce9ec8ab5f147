//! Workflow node definitions.
//!
//! Nodes are the building blocks of workflows. Each node has:
//! - A unique ID and a unique name within the workflow
//! - A type name resolved through the node registry
//! - Raw parameters, possibly containing `{{ }}` templates
//! - Settings that control how the engine runs it

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use ulid::Ulid;
use weft_core::{CredentialId, ParseIdError};

/// A unique identifier for a node within a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Ulid);

impl NodeId {
    /// Creates a new random node ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Creates a node ID from a ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("node_").unwrap_or(s);
        Ulid::from_str(raw).map(Self).map_err(|e| ParseIdError {
            id_type: "NodeId",
            reason: e.to_string(),
        })
    }
}

/// How often a node's parameters are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Resolve once per input item, with that item as context.
    EachItem,
    /// Resolve once, with the first input item as context.
    AllItems,
}

/// What happens when a node fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// The node fails and the run stops dispatching new nodes.
    #[default]
    Stop,
    /// The node gains an `error` output; if wired, failures are routed there.
    ErrorOutput,
}

/// Per-node engine settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Overrides the node type's default mode.
    #[serde(default)]
    pub mode: Option<ExecutionMode>,
    /// Overrides the engine's default node timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Failure handling.
    #[serde(default)]
    pub on_error: OnError,
    /// Credential resolved and handed to the node at execution time.
    #[serde(default)]
    pub credentials: Option<CredentialId>,
}

impl NodeSettings {
    /// Sets the execution mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Sets the timeout in milliseconds.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Routes failures to an `error` output port.
    #[must_use]
    pub fn with_error_output(mut self) -> Self {
        self.on_error = OnError::ErrorOutput;
        self
    }

    /// Sets the credential reference.
    #[must_use]
    pub fn with_credentials(mut self, id: CredentialId) -> Self {
        self.credentials = Some(id);
        self
    }
}

fn empty_parameters() -> JsonValue {
    JsonValue::Object(Default::default())
}

/// A workflow node as it appears in a frozen graph snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node within the workflow.
    pub id: NodeId,
    /// Human-readable name, unique within the workflow.
    pub name: String,
    /// Registered node type name.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Raw parameters; strings may contain `{{ }}` templates.
    #[serde(default = "empty_parameters")]
    pub parameters: JsonValue,
    /// Engine settings.
    #[serde(default)]
    pub settings: NodeSettings,
}

impl Node {
    /// Creates a new node with empty parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self::with_id(NodeId::new(), name, node_type)
    }

    /// Creates a new node with a specific ID.
    #[must_use]
    pub fn with_id(id: NodeId, name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            node_type: node_type.into(),
            parameters: empty_parameters(),
            settings: NodeSettings::default(),
        }
    }

    /// Sets the raw parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: JsonValue) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the engine settings.
    #[must_use]
    pub fn with_settings(mut self, settings: NodeSettings) -> Self {
        self.settings = settings;
        self
    }
}
