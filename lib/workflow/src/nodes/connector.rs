//! Connector-backed node types.

use crate::error::NodeError;
use crate::executor::{NodeContext, NodeDescriptor, NodeHandler, NodeOutput, parse_parameters};
use crate::item::{ItemList, items_from_json};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use weft_integration::{Connector, ConnectorError, Operation};

#[derive(Debug, Deserialize)]
struct ConnectorParams {
    operation: String,
    #[serde(default)]
    parameters: JsonValue,
}

/// Runs a [`Connector`] operation once per input item.
pub struct ConnectorNode {
    type_name: String,
    connector: Arc<dyn Connector>,
    operation_key: String,
}

impl ConnectorNode {
    /// Wraps a connector as node type `type_name`, charged under `operation_key`.
    pub fn new(
        type_name: impl Into<String>,
        connector: Arc<dyn Connector>,
        operation_key: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            connector,
            operation_key: operation_key.into(),
        }
    }
}

impl fmt::Debug for ConnectorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorNode")
            .field("type_name", &self.type_name)
            .field("connector", &self.connector.info().id)
            .field("operation_key", &self.operation_key)
            .finish()
    }
}

fn map_connector_error(error: ConnectorError) -> NodeError {
    match error {
        ConnectorError::AuthenticationFailed { reason } => NodeError::CredentialError { message: reason },
        ConnectorError::Timeout => NodeError::Timeout { timeout_ms: None },
        ConnectorError::InvalidParameters { .. } | ConnectorError::OperationNotSupported { .. } => {
            NodeError::validation(error.to_string())
        }
        other => NodeError::remote(other.to_string()),
    }
}

#[async_trait]
impl NodeHandler for ConnectorNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new(self.type_name.clone()).with_operation_key(self.operation_key.clone())
    }

    fn validate(&self, parameters: &JsonValue) -> Result<(), NodeError> {
        let params: ConnectorParams = parse_parameters(parameters)?;
        if !params.operation.contains("{{") && !self.connector.supports(&params.operation) {
            return Err(NodeError::validation(format!(
                "connector '{}' does not support operation '{}'",
                self.connector.info().id,
                params.operation
            )));
        }
        Ok(())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let count = ctx.primary_items().len().max(1);
        let mut items = ItemList::new();

        for index in 0..count {
            let params: ConnectorParams = ctx.parameters.parse(index)?;
            let operation = Operation::new(params.operation).with_parameters(params.parameters);
            let result = self
                .connector
                .execute(operation, ctx.credentials.as_ref())
                .await
                .map_err(map_connector_error)?;

            if !result.success {
                return Err(NodeError::remote(
                    result
                        .error
                        .unwrap_or_else(|| "operation failed".to_string()),
                ));
            }
            tracing::debug!(
                node = %ctx.node_name,
                latency_ms = result.metadata.latency_ms,
                "Connector operation succeeded"
            );
            items.extend(items_from_json(result.data.unwrap_or(JsonValue::Null)));
        }
        Ok(NodeOutput::main(items))
    }
}
