//! Run and node status, and the per-attempt node result record.
//!
//! Node results only move forward: a `running` write never replaces a
//! terminal one. Results for the same `(node, attempt)` key overwrite each
//! other, so re-delivery is idempotent.

use crate::item::ItemList;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// The overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run record exists, scheduling has not started.
    Pending,
    /// Run is actively executing.
    Running,
    /// All reachable nodes finished and none failed unabsorbed.
    Success,
    /// A node failed with no wired error output, or the run was cancelled.
    Failed,
}

/// Error recorded on a run sealed after a cancel.
pub const CANCELLED_ERROR: &str = "run cancelled";

impl RunStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Returns the stored string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Parses the stored string form.
    #[must_use]
    pub fn from_str_value(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The status of one node attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Waiting for inputs.
    Pending,
    /// Dispatched.
    Running,
    /// Completed, possibly with an error routed to its error output.
    Success,
    /// Failed.
    Failed,
    /// Never ran because its inputs were skipped.
    Skipped,
}

impl NodeStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    /// Progress rank: pending < running < terminal.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Success | Self::Failed | Self::Skipped => 2,
        }
    }

    /// Returns true if a result in `next` may replace one in `self`.
    #[must_use]
    pub fn can_transition_to(&self, next: NodeStatus) -> bool {
        next.rank() >= self.rank()
    }

    /// Returns the stored string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Parses the stored string form.
    #[must_use]
    pub fn from_str_value(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node execution counter; batch loops bump it on each re-entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptKey(pub u32);

impl AttemptKey {
    /// The first execution of a node.
    pub const FIRST: Self = Self(0);

    /// Returns the following attempt.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The recorded outcome of one node attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub status: NodeStatus,
    /// Items emitted per output port. Empty for skipped and failed nodes.
    #[serde(default)]
    pub outputs: BTreeMap<String, ItemList>,
    /// Error message when failed, or when a failure was routed to the error output.
    #[serde(default)]
    pub error: Option<String>,
    /// Cursor returned by a re-entrant node.
    #[serde(default)]
    pub cursor: Option<JsonValue>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeResult {
    /// A dispatched, unfinished attempt.
    #[must_use]
    pub fn running(started_at: DateTime<Utc>) -> Self {
        Self {
            status: NodeStatus::Running,
            outputs: BTreeMap::new(),
            error: None,
            cursor: None,
            started_at: Some(started_at),
            finished_at: None,
        }
    }

    /// A completed attempt.
    #[must_use]
    pub fn success(
        outputs: BTreeMap<String, ItemList>,
        cursor: Option<JsonValue>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: NodeStatus::Success,
            outputs,
            error: None,
            cursor,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        }
    }

    /// A failed attempt.
    #[must_use]
    pub fn failed(error: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            status: NodeStatus::Failed,
            outputs: BTreeMap::new(),
            error: Some(error.into()),
            cursor: None,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        }
    }

    /// An attempt that never ran.
    #[must_use]
    pub fn skipped() -> Self {
        Self {
            status: NodeStatus::Skipped,
            outputs: BTreeMap::new(),
            error: None,
            cursor: None,
            started_at: None,
            finished_at: Some(Utc::now()),
        }
    }

    /// Keeps the failure message on an otherwise successful result.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Returns true if this result may replace `existing` under the same key.
    #[must_use]
    pub fn supersedes(&self, existing: &NodeResult) -> bool {
        existing.status.can_transition_to(self.status)
    }

    /// Items of the first non-empty port in `port_order`, falling back to any port.
    #[must_use]
    pub fn first_output<'a>(&'a self, port_order: &[String]) -> Option<&'a ItemList> {
        port_order
            .iter()
            .filter_map(|port| self.outputs.get(port))
            .find(|items| !items.is_empty())
            .or_else(|| self.outputs.values().find(|items| !items.is_empty()))
    }
}
