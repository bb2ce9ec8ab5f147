//! Engine configuration.
//!
//! Deserialized as part of the host process's configuration; every field has
//! a default so an empty section is valid.

use serde::Deserialize;
use std::time::Duration;

/// Engine-wide execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Maximum nodes of one run executing at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Node timeout used when a node does not set its own.
    #[serde(default = "default_node_timeout_ms")]
    pub node_timeout_ms: u64,

    /// Metering operation charged once before a run starts.
    #[serde(default = "default_run_operation_key")]
    pub run_operation_key: String,

    /// Quantity charged under `run_operation_key`. Zero disables the charge.
    #[serde(default = "default_run_quantity")]
    pub run_quantity: u64,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_node_timeout_ms() -> u64 {
    60_000
}

fn default_run_operation_key() -> String {
    "workflow.run".to_string()
}

fn default_run_quantity() -> u64 {
    1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            node_timeout_ms: default_node_timeout_ms(),
            run_operation_key: default_run_operation_key(),
            run_quantity: default_run_quantity(),
        }
    }
}

impl EngineConfig {
    /// The default node timeout.
    #[must_use]
    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    /// The concurrency cap, never below one.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }
}
