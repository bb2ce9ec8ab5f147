//! Runs one node attempt: parameters, credentials, metering, then the handler.

use super::{NodeContext, NodeHandler, NodeOutput, ResolvedParameters};
use crate::error::{ExpressionError, NodeError};
use crate::expression::{EvalContext, NodeOutputs, ParameterTemplate};
use crate::item::{Item, ItemList};
use crate::node::{ExecutionMode, Node};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use weft_core::AccountId;
use weft_integration::CredentialResolver;
use weft_metering::{MeteringError, MeteringGate};

/// One node attempt, fully prepared by the scheduler.
pub(crate) struct DispatchRequest {
    pub node: Node,
    pub handler: Arc<dyn NodeHandler>,
    pub operation_key: Option<String>,
    pub template: Arc<ParameterTemplate>,
    pub mode: ExecutionMode,
    pub inputs: HashMap<String, ItemList>,
    pub primary_port: Option<String>,
    pub node_outputs: Arc<NodeOutputs>,
    pub cursor: Option<JsonValue>,
    pub trigger: Option<JsonValue>,
    pub timeout: Duration,
}

/// Shared collaborators for every node attempt of a run.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    account_id: AccountId,
    credentials: Arc<dyn CredentialResolver>,
    metering: Arc<dyn MeteringGate>,
}

impl Dispatcher {
    pub(crate) fn new(
        account_id: AccountId,
        credentials: Arc<dyn CredentialResolver>,
        metering: Arc<dyn MeteringGate>,
    ) -> Self {
        Self {
            account_id,
            credentials,
            metering,
        }
    }

    /// Executes one attempt.
    ///
    /// Handler panics are caught and reported as `RemoteError`.
    #[tracing::instrument(
        skip(self, request),
        fields(node_id = %request.node.id, node_type = %request.node.node_type)
    )]
    pub(crate) async fn dispatch(&self, request: DispatchRequest) -> Result<NodeOutput, NodeError> {
        let DispatchRequest {
            node,
            handler,
            operation_key,
            template,
            mode,
            inputs,
            primary_port,
            node_outputs,
            cursor,
            trigger,
            timeout,
        } = request;

        let primary_items = primary_port
            .as_deref()
            .and_then(|port| inputs.get(port))
            .map_or(&[][..], Vec::as_slice);
        let parameters = resolve_parameters(&template, mode, primary_items, &node_outputs, Utc::now())?;

        let credentials = match node.settings.credentials {
            Some(id) => Some(self.credentials.resolve(id).await.map_err(|e| {
                NodeError::CredentialError {
                    message: e.to_string(),
                }
            })?),
            None => None,
        };

        if let Some(key) = &operation_key {
            self.charge(key).await?;
        }

        let ctx = NodeContext {
            node_id: node.id,
            node_name: node.name,
            parameters,
            inputs,
            primary_port,
            credentials,
            cursor,
            trigger,
        };

        let timeout_ms = u64::try_from(timeout.as_millis()).ok();
        let execution = AssertUnwindSafe(handler.execute(ctx)).catch_unwind();
        match tokio::time::timeout(timeout, execution).await {
            Err(_) => Err(NodeError::Timeout { timeout_ms }),
            Ok(Err(panic)) => Err(NodeError::remote(format!(
                "node panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Ok(Ok(result)) => result,
        }
    }

    async fn charge(&self, operation_key: &str) -> Result<(), NodeError> {
        match self
            .metering
            .charge_or_reject(self.account_id, operation_key, 1)
            .await
        {
            Ok(charge) => {
                tracing::debug!(
                    operation_key,
                    cost = charge.cost,
                    remaining = charge.remaining,
                    "Charged node execution"
                );
                Ok(())
            }
            Err(MeteringError::Unavailable { reason }) => Err(NodeError::remote(format!(
                "metering unavailable: {reason}"
            ))),
            Err(e) => {
                tracing::warn!(operation_key, error = %e, "Node execution rejected by metering");
                Err(NodeError::InsufficientBalance {
                    operation_key: operation_key.to_string(),
                })
            }
        }
    }
}

/// Resolves a node's parameter template for its mode.
///
/// Per-item nodes resolve once per primary item (once with no item when
/// there are none); all-items nodes resolve once against the first item.
pub(crate) fn resolve_parameters(
    template: &ParameterTemplate,
    mode: ExecutionMode,
    items: &[Item],
    nodes: &NodeOutputs,
    now: DateTime<Utc>,
) -> Result<ResolvedParameters, ExpressionError> {
    if template.is_static() || mode == ExecutionMode::AllItems || items.is_empty() {
        let ctx = EvalContext::for_item(items, 0, nodes, now);
        return template.resolve(&ctx).map(ResolvedParameters::single);
    }
    (0..items.len())
        .map(|index| template.resolve(&EvalContext::for_item(items, index, nodes, now)))
        .collect::<Result<Vec<_>, _>>()
        .map(ResolvedParameters::per_item)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::NodeDescriptor;
    use async_trait::async_trait;
    use serde_json::json;
    use weft_core::CredentialId;
    use weft_integration::{CredentialData, StaticCredentialResolver};
    use weft_metering::{InMemoryLedger, PriceTable};

    struct Echo;

    #[async_trait]
    impl NodeHandler for Echo {
        fn descriptor(&self) -> NodeDescriptor {
            NodeDescriptor::new("echo")
        }

        async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
            let items = (0..ctx.primary_items().len().max(1))
                .map(|i| Item::new(ctx.parameters.for_item(i).clone()))
                .collect();
            Ok(NodeOutput::main(items))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl NodeHandler for Sleepy {
        fn descriptor(&self) -> NodeDescriptor {
            NodeDescriptor::new("sleepy")
        }

        async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(NodeOutput::new())
        }
    }

    struct Panicky;

    #[async_trait]
    impl NodeHandler for Panicky {
        fn descriptor(&self) -> NodeDescriptor {
            NodeDescriptor::new("panicky")
        }

        async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
            panic!("boom");
        }
    }

    struct Keyed;

    #[async_trait]
    impl NodeHandler for Keyed {
        fn descriptor(&self) -> NodeDescriptor {
            NodeDescriptor::new("keyed")
        }

        async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
            let token = match ctx.credentials {
                Some(CredentialData::BearerToken { token }) => token,
                _ => String::new(),
            };
            Ok(NodeOutput::main(vec![Item::new(json!({ "token": token }))]))
        }
    }

    async fn dispatcher(balance: u64) -> (Dispatcher, AccountId, Arc<StaticCredentialResolver>) {
        let account = AccountId::new();
        let ledger = InMemoryLedger::new(PriceTable::flat(1));
        ledger.deposit(account, balance).await;
        let credentials = Arc::new(StaticCredentialResolver::new());
        (
            Dispatcher::new(account, credentials.clone(), Arc::new(ledger)),
            account,
            credentials,
        )
    }

    fn request(handler: Arc<dyn NodeHandler>, node: Node, items: ItemList) -> DispatchRequest {
        let template = ParameterTemplate::compile(&node.parameters).unwrap();
        let mut inputs = HashMap::new();
        inputs.insert("main".to_string(), items);
        DispatchRequest {
            node,
            handler,
            operation_key: None,
            template: Arc::new(template),
            mode: ExecutionMode::EachItem,
            inputs,
            primary_port: Some("main".to_string()),
            node_outputs: Arc::new(NodeOutputs::new()),
            cursor: None,
            trigger: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn resolves_parameters_per_item() {
        let (dispatcher, _, _) = dispatcher(0).await;
        let node = Node::new("Echo", "echo").with_parameters(json!({ "double": "{{ $json.n * 2 }}" }));
        let items = vec![Item::new(json!({ "n": 1 })), Item::new(json!({ "n": 4 }))];

        let output = dispatcher
            .dispatch(request(Arc::new(Echo), node, items))
            .await
            .unwrap();
        assert_eq!(
            output.ports["main"],
            vec![Item::new(json!({ "double": 2 })), Item::new(json!({ "double": 8 }))]
        );
    }

    #[tokio::test]
    async fn all_items_mode_resolves_once() {
        let (dispatcher, _, _) = dispatcher(0).await;
        let node = Node::new("Echo", "echo").with_parameters(json!({ "count": "{{ $items.length }}" }));
        let items = vec![Item::new(json!({})), Item::new(json!({}))];
        let mut req = request(Arc::new(Echo), node, items);
        req.mode = ExecutionMode::AllItems;

        let output = dispatcher.dispatch(req).await.unwrap();
        assert_eq!(output.ports["main"][1], Item::new(json!({ "count": 2 })));
    }

    #[tokio::test]
    async fn runtime_expression_failure_is_node_error() {
        let (dispatcher, _, _) = dispatcher(0).await;
        let node = Node::new("Echo", "echo").with_parameters(json!({ "x": "{{ $json.a.b }}" }));
        let err = dispatcher
            .dispatch(request(Arc::new(Echo), node, vec![Item::empty()]))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Expression(ExpressionError::TypeMismatch { .. })));
    }

    #[tokio::test]
    async fn timeout_maps_to_timeout_error() {
        let (dispatcher, _, _) = dispatcher(0).await;
        let mut req = request(Arc::new(Sleepy), Node::new("Slow", "sleepy"), vec![Item::empty()]);
        req.timeout = Duration::from_millis(20);

        let err = dispatcher.dispatch(req).await.unwrap_err();
        assert_eq!(err, NodeError::Timeout { timeout_ms: Some(20) });
    }

    #[tokio::test]
    async fn panic_is_remote_error() {
        let (dispatcher, _, _) = dispatcher(0).await;
        let err = dispatcher
            .dispatch(request(Arc::new(Panicky), Node::new("P", "panicky"), vec![]))
            .await
            .unwrap_err();
        assert_eq!(err, NodeError::remote("node panicked: boom"));
    }

    #[tokio::test]
    async fn metering_rejection_is_insufficient_balance() {
        let (dispatcher, _, _) = dispatcher(0).await;
        let mut req = request(Arc::new(Echo), Node::new("E", "echo"), vec![Item::empty()]);
        req.operation_key = Some("http.request".to_string());

        let err = dispatcher.dispatch(req).await.unwrap_err();
        assert_eq!(
            err,
            NodeError::InsufficientBalance {
                operation_key: "http.request".to_string()
            }
        );
    }

    #[tokio::test]
    async fn credentials_are_resolved_for_the_handler() {
        let (dispatcher, _, credentials) = dispatcher(0).await;
        let id = CredentialId::new();
        credentials.insert(id, CredentialData::bearer("secret")).await;

        let node = Node::new("K", "keyed")
            .with_settings(crate::node::NodeSettings::default().with_credentials(id));
        let output = dispatcher
            .dispatch(request(Arc::new(Keyed), node, vec![Item::empty()]))
            .await
            .unwrap();
        assert_eq!(output.ports["main"][0], Item::new(json!({ "token": "secret" })));

        let missing = Node::new("K", "keyed")
            .with_settings(crate::node::NodeSettings::default().with_credentials(CredentialId::new()));
        let err = dispatcher
            .dispatch(request(Arc::new(Keyed), missing, vec![Item::empty()]))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::CredentialError { .. }));
    }
}
