//! Connector trait and related types.
//!
//! Connector nodes in a workflow delegate to a `Connector`. The engine owns
//! only the call and its timeout; retries and backoff stay inside the
//! connector and surface as a final success or failure.

use crate::credential::CredentialData;
use crate::error::ConnectorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Information about a connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorInfo {
    /// Unique identifier for this connector type.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Description of the connector.
    pub description: String,
    /// Protocol used (e.g., "rest", "imap").
    pub protocol: String,
    /// Names of the supported operations.
    pub operations: Vec<String>,
}

/// An operation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// The operation name.
    pub name: String,
    /// Operation parameters.
    pub parameters: JsonValue,
}

impl Operation {
    /// Creates a new operation.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: JsonValue::Object(Default::default()),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        if let JsonValue::Object(ref mut map) = self.parameters {
            map.insert(key.into(), value);
        }
        self
    }

    /// Sets all parameters at once.
    #[must_use]
    pub fn with_parameters(mut self, parameters: JsonValue) -> Self {
        self.parameters = parameters;
        self
    }
}

/// The result of an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Output data (if successful).
    pub data: Option<JsonValue>,
    /// Error message (if failed).
    pub error: Option<String>,
    /// Metadata about the operation.
    pub metadata: OperationMetadata,
}

/// Metadata about an operation execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Number of API calls made.
    pub api_calls: u32,
    /// Rate limit remaining (if applicable).
    pub rate_limit_remaining: Option<u32>,
}

impl OperationResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(data: JsonValue, metadata: OperationMetadata) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(error: impl Into<String>, metadata: OperationMetadata) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metadata,
        }
    }
}

/// Trait for integration connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns information about this connector.
    fn info(&self) -> ConnectorInfo;

    /// Executes an operation with the credentials resolved for the node.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation could not be carried out at all.
    /// Remote-side failures that produced a response are reported through
    /// `OperationResult::failure`.
    async fn execute(
        &self,
        operation: Operation,
        credentials: Option<&CredentialData>,
    ) -> Result<OperationResult, ConnectorError>;

    /// Checks if this connector supports the named operation.
    fn supports(&self, operation: &str) -> bool {
        self.info().operations.iter().any(|op| op == operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_builder() {
        let op = Operation::new("request")
            .with_param("url", serde_json::json!("https://example.com"))
            .with_param("method", serde_json::json!("GET"));

        assert_eq!(op.name, "request");
        if let JsonValue::Object(params) = op.parameters {
            assert_eq!(params.get("method"), Some(&serde_json::json!("GET")));
        } else {
            panic!("parameters should be an object");
        }
    }

    #[test]
    fn operation_result_failure() {
        let result = OperationResult::failure("Connection timeout", OperationMetadata::default());

        assert!(!result.success);
        assert!(result.data.is_none());
        assert_eq!(result.error, Some("Connection timeout".to_string()));
    }

    struct Fixed;

    #[async_trait]
    impl Connector for Fixed {
        fn info(&self) -> ConnectorInfo {
            ConnectorInfo {
                id: "fixed".to_string(),
                name: "Fixed".to_string(),
                description: "Returns a constant".to_string(),
                protocol: "none".to_string(),
                operations: vec!["get".to_string()],
            }
        }

        async fn execute(
            &self,
            _operation: Operation,
            _credentials: Option<&CredentialData>,
        ) -> Result<OperationResult, ConnectorError> {
            Ok(OperationResult::success(
                serde_json::json!(1),
                OperationMetadata::default(),
            ))
        }
    }

    #[test]
    fn supports_declared_operations() {
        assert!(Fixed.supports("get"));
        assert!(!Fixed.supports("delete"));
    }
}
