//! Branching node types.

use crate::error::NodeError;
use crate::executor::{NodeContext, NodeDescriptor, NodeHandler, NodeOutput, parse_parameters};
use crate::expression::is_truthy;
use crate::item::ItemList;
use crate::node::NodeSettings;
use crate::port::{InputPort, MAIN_PORT, PortSet};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;

const TRUE_PORT: &str = "true";
const FALSE_PORT: &str = "false";
const FALLBACK_PORT: &str = "fallback";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Combinator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Deserialize)]
struct IfParams {
    #[serde(default)]
    conditions: Vec<JsonValue>,
    #[serde(default)]
    combinator: Combinator,
    #[serde(default)]
    fallback_output: bool,
}

/// Where an IF sends one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    True,
    False,
    Fallback,
}

impl IfParams {
    /// Without a fallback port, JSON truthiness decides and null is false.
    /// With one, null is unknown: it sends the item to `fallback` only when
    /// the known conditions do not already settle the combinator.
    fn branch(&self) -> Branch {
        if !self.fallback_output {
            let passed = match self.combinator {
                Combinator::And => self.conditions.iter().all(is_truthy),
                Combinator::Or => self.conditions.iter().any(is_truthy),
            };
            return if passed { Branch::True } else { Branch::False };
        }

        let settles = |outcome: bool| {
            self.conditions
                .iter()
                .any(|c| !c.is_null() && is_truthy(c) == outcome)
        };
        let has_unknown = self.conditions.iter().any(JsonValue::is_null);
        match self.combinator {
            Combinator::And if settles(false) => Branch::False,
            Combinator::Or if settles(true) => Branch::True,
            _ if has_unknown => Branch::Fallback,
            Combinator::And => Branch::True,
            Combinator::Or => Branch::False,
        }
    }
}

/// Partitions items into `true` and `false` (and optionally `fallback`).
///
/// Every item lands on exactly one port.
#[derive(Debug, Clone, Copy, Default)]
pub struct IfNode;

#[async_trait]
impl NodeHandler for IfNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("if")
    }

    fn ports(&self, parameters: &JsonValue, _settings: &NodeSettings) -> PortSet {
        let ports = PortSet::new()
            .with_input(InputPort::required(MAIN_PORT))
            .with_output(TRUE_PORT)
            .with_output(FALSE_PORT);
        let fallback = parameters
            .get("fallback_output")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        if fallback {
            ports.with_output(FALLBACK_PORT)
        } else {
            ports
        }
    }

    fn validate(&self, parameters: &JsonValue) -> Result<(), NodeError> {
        parse_parameters::<IfParams>(parameters).map(|_| ())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mut true_items = ItemList::new();
        let mut false_items = ItemList::new();
        let mut fallback_items = ItemList::new();
        let mut fallback_enabled = false;

        for (index, item) in ctx.primary_items().iter().enumerate() {
            let params: IfParams = ctx.parameters.parse(index)?;
            fallback_enabled |= params.fallback_output;
            match params.branch() {
                Branch::True => true_items.push(item.clone()),
                Branch::False => false_items.push(item.clone()),
                Branch::Fallback => fallback_items.push(item.clone()),
            }
        }

        let output = NodeOutput::new()
            .with_port(TRUE_PORT, true_items)
            .with_port(FALSE_PORT, false_items);
        Ok(if fallback_enabled {
            output.with_port(FALLBACK_PORT, fallback_items)
        } else {
            output
        })
    }
}

#[derive(Debug, Deserialize)]
struct SwitchRule {
    #[serde(default)]
    condition: JsonValue,
}

#[derive(Debug, Deserialize)]
struct SwitchParams {
    #[serde(default)]
    rules: Vec<SwitchRule>,
    #[serde(default)]
    fallback_output: bool,
}

fn output_port(index: usize) -> String {
    format!("output{index}")
}

/// Routes each item to the first rule whose condition holds.
///
/// Items matching no rule go to `fallback` when it is configured and are
/// dropped otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchNode;

#[async_trait]
impl NodeHandler for SwitchNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("switch")
    }

    fn ports(&self, parameters: &JsonValue, _settings: &NodeSettings) -> PortSet {
        let rule_count = parameters
            .get("rules")
            .and_then(JsonValue::as_array)
            .map_or(0, Vec::len);
        let mut ports = PortSet::new().with_input(InputPort::required(MAIN_PORT));
        for index in 0..rule_count {
            ports = ports.with_output(output_port(index));
        }
        let fallback = parameters
            .get("fallback_output")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        if fallback {
            ports = ports.with_output(FALLBACK_PORT);
        }
        ports
    }

    fn validate(&self, parameters: &JsonValue) -> Result<(), NodeError> {
        parse_parameters::<SwitchParams>(parameters).map(|_| ())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let first: SwitchParams = ctx.parameters.parse(0)?;
        let mut outputs = vec![ItemList::new(); first.rules.len()];
        let mut fallback_items = ItemList::new();

        for (index, item) in ctx.primary_items().iter().enumerate() {
            let params: SwitchParams = ctx.parameters.parse(index)?;
            let matched = params
                .rules
                .iter()
                .position(|rule| is_truthy(&rule.condition));
            match matched {
                Some(rule) if rule < outputs.len() => outputs[rule].push(item.clone()),
                Some(_) => {}
                None if params.fallback_output => fallback_items.push(item.clone()),
                None => {}
            }
        }

        let mut output = NodeOutput::new();
        for (index, items) in outputs.into_iter().enumerate() {
            output = output.with_port(output_port(index), items);
        }
        if first.fallback_output {
            output = output.with_port(FALLBACK_PORT, fallback_items);
        }
        Ok(output)
    }
}
