//! Centralized runner configuration.
//!
//! Loaded via the `config` crate from environment variables. Nested sections
//! use `__` as the separator, e.g. `ENGINE__MAX_CONCURRENCY=8` or
//! `METERING__INITIAL_BALANCE=500`.
//!
//! See [`EngineConfig`] for engine settings.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use weft_core::AccountId;
use weft_metering::PriceTable;
use weft_workflow::EngineConfig;

/// Runner configuration composed from library configs.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Workflow snapshot to run. Without one the runner only resumes.
    #[serde(default)]
    pub workflow_path: Option<PathBuf>,

    /// JSON document given to the trigger nodes.
    #[serde(default)]
    pub trigger_input_path: Option<PathBuf>,

    /// PostgreSQL connection URL. Runs are kept in memory when absent.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Account charged for runs. A fresh one is generated when absent.
    #[serde(default)]
    pub account_id: AccountId,

    /// JSON list of credential entries.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,

    /// Resume runs left unsealed by an earlier process.
    #[serde(default = "default_resume_unfinished")]
    pub resume_unfinished: bool,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub metering: MeteringConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

fn default_resume_unfinished() -> bool {
    true
}

/// Credit settings for the in-process ledger.
#[derive(Debug, Clone, Deserialize)]
pub struct MeteringConfig {
    /// Credits deposited for the configured account at startup.
    #[serde(default = "default_initial_balance")]
    pub initial_balance: u64,

    /// Unit price for operations without an explicit price.
    #[serde(default = "default_price")]
    pub default_price: u64,

    /// Unit prices by operation key.
    #[serde(default)]
    pub prices: HashMap<String, u64>,
}

fn default_initial_balance() -> u64 {
    1_000
}

fn default_price() -> u64 {
    1
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            default_price: default_price(),
            prices: HashMap::new(),
        }
    }
}

impl MeteringConfig {
    /// Builds the ledger's price table.
    #[must_use]
    pub fn price_table(&self) -> PriceTable {
        self.prices
            .iter()
            .fold(PriceTable::flat(self.default_price), |table, (key, price)| {
                table.with_price(key.clone(), *price)
            })
    }
}

/// Settings for the built-in HTTP connector.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in milliseconds.
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl HttpConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl RunnerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, File, FileFormat};

    fn from_json(json: &str) -> RunnerConfig {
        Config::builder()
            .add_source(File::from_str(json, FileFormat::Json))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn metering_config_has_correct_defaults() {
        let config = MeteringConfig::default();
        assert_eq!(config.initial_balance, 1_000);
        assert_eq!(config.default_price, 1);
        assert!(config.prices.is_empty());
        assert_eq!(HttpConfig::default().timeout(), Duration::from_secs(30));
    }

    #[test]
    fn empty_source_uses_defaults() {
        let config = from_json("{}");
        assert!(config.workflow_path.is_none());
        assert!(config.database_url.is_none());
        assert!(config.resume_unfinished);
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn nested_sections_override_defaults() {
        let config = from_json(
            r#"{
                "workflow_path": "/srv/wf.json",
                "resume_unfinished": false,
                "engine": { "max_concurrency": 8 },
                "metering": { "default_price": 2, "prices": { "http_request": 5 } }
            }"#,
        );
        assert_eq!(config.workflow_path, Some(PathBuf::from("/srv/wf.json")));
        assert!(!config.resume_unfinished);
        assert_eq!(config.engine.max_concurrency, 8);
        assert_eq!(config.engine.node_timeout_ms, 60_000);

        let prices = config.metering.price_table();
        assert_eq!(prices.unit_price("http_request"), 5);
        assert_eq!(prices.unit_price("workflow.run"), 2);
    }
}
