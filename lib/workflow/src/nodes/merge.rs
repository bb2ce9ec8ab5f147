//! The merge node: joins several input branches into one item list.

use super::get_path;
use crate::error::NodeError;
use crate::executor::{
    InputState, NodeContext, NodeDescriptor, NodeHandler, NodeOutput, Readiness, parse_parameters,
};
use crate::item::{Item, ItemList};
use crate::node::{ExecutionMode, NodeSettings};
use crate::port::{InputPort, MAIN_PORT, PortSet};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

/// How inputs are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Concatenate inputs in port order.
    #[default]
    Append,
    /// Join items whose `key` fields are equal.
    CombineByKey,
    /// Zip items by index.
    CombineByPosition,
    /// Cartesian product of all inputs.
    Multiplex,
    /// Emit the items of one chosen input.
    ChooseBranch,
}

fn default_inputs() -> usize {
    2
}

fn default_choose() -> String {
    input_port(1)
}

#[derive(Debug, Deserialize)]
struct MergeParams {
    #[serde(default)]
    mode: MergeMode,
    #[serde(default = "default_inputs")]
    inputs: usize,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    keep_unmatched: bool,
    #[serde(default)]
    include_unpaired: bool,
    #[serde(default = "default_choose")]
    choose: String,
}

impl MergeParams {
    fn port_names(&self) -> Vec<String> {
        (1..=self.inputs).map(input_port).collect()
    }
}

fn input_port(index: usize) -> String {
    format!("input{index}")
}

fn merge_fields(left: &mut Map<String, JsonValue>, right: Item) {
    left.extend(right.into_object());
}

/// Merges input branches according to [`MergeMode`].
///
/// Inputs are `input1..inputN`; only connected inputs take part.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeNode;

#[async_trait]
impl NodeHandler for MergeNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("merge").with_mode(ExecutionMode::AllItems)
    }

    fn ports(&self, parameters: &JsonValue, _settings: &NodeSettings) -> PortSet {
        let count = parse_parameters::<MergeParams>(parameters).map_or(default_inputs(), |p| p.inputs);
        let mut ports = PortSet::new();
        for index in 1..=count {
            ports = ports.with_input(InputPort::optional(input_port(index)));
        }
        ports.with_output(MAIN_PORT)
    }

    fn validate(&self, parameters: &JsonValue) -> Result<(), NodeError> {
        let params: MergeParams = parse_parameters(parameters)?;
        if params.inputs == 0 {
            return Err(NodeError::validation("merge needs at least one input"));
        }
        if params.mode == MergeMode::CombineByKey && params.key.is_none() {
            return Err(NodeError::validation("combine_by_key needs a 'key'"));
        }
        if params.mode == MergeMode::ChooseBranch && !params.port_names().contains(&params.choose) {
            return Err(NodeError::validation(format!(
                "'{}' is not an input of this merge",
                params.choose
            )));
        }
        Ok(())
    }

    fn readiness(&self, parameters: &JsonValue, inputs: &InputState) -> Readiness {
        let Ok(params) = parse_parameters::<MergeParams>(parameters) else {
            return inputs.default_readiness();
        };
        let all = inputs.any_data() && inputs.all_connected_have_data();
        let run = match params.mode {
            MergeMode::Append => inputs.any_data(),
            MergeMode::ChooseBranch => inputs.has_data(&params.choose),
            MergeMode::CombineByPosition if params.include_unpaired => inputs.any_data(),
            MergeMode::CombineByKey if params.keep_unmatched => inputs.any_data(),
            MergeMode::CombineByPosition | MergeMode::CombineByKey | MergeMode::Multiplex => all,
        };
        if run { Readiness::Run } else { Readiness::Skip }
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let params: MergeParams = ctx.parameters.parse(0)?;
        let branches: Vec<ItemList> = params
            .port_names()
            .iter()
            .filter_map(|port| ctx.inputs.get(port).cloned())
            .collect();

        let items = match params.mode {
            MergeMode::Append => branches.into_iter().flatten().collect(),
            MergeMode::ChooseBranch => ctx.input(&params.choose).to_vec(),
            MergeMode::CombineByPosition => combine_by_position(branches, params.include_unpaired),
            MergeMode::CombineByKey => {
                let key = params
                    .key
                    .as_deref()
                    .ok_or_else(|| NodeError::validation("combine_by_key needs a 'key'"))?;
                let mut branches = branches.into_iter();
                let first = branches.next().unwrap_or_default();
                branches.fold(first, |left, right| {
                    combine_by_key(left, right, key, params.keep_unmatched)
                })
            }
            MergeMode::Multiplex => {
                let mut branches = branches.into_iter();
                let first = branches.next().unwrap_or_default();
                branches.fold(first, multiplex)
            }
        };
        Ok(NodeOutput::main(items))
    }
}

fn combine_by_position(branches: Vec<ItemList>, include_unpaired: bool) -> ItemList {
    let lengths = branches.iter().map(Vec::len);
    let len = if include_unpaired {
        lengths.max().unwrap_or(0)
    } else {
        lengths.min().unwrap_or(0)
    };
    (0..len)
        .map(|index| {
            let mut map = Map::new();
            for branch in &branches {
                if let Some(item) = branch.get(index) {
                    merge_fields(&mut map, item.clone());
                }
            }
            Item::from(map)
        })
        .collect()
}

fn key_of(item: &Item, key: &str) -> Option<String> {
    get_path(item.json(), key)
        .filter(|v| !v.is_null())
        .map(JsonValue::to_string)
}

fn combine_by_key(left: ItemList, right: ItemList, key: &str, keep_unmatched: bool) -> ItemList {
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (position, item) in right.iter().enumerate() {
        if let Some(k) = key_of(item, key) {
            index.entry(k).or_default().push(position);
        }
    }

    let mut matched_right = vec![false; right.len()];
    let mut result = ItemList::new();
    for item in left {
        let matches = key_of(&item, key).and_then(|k| index.get(&k));
        match matches {
            Some(positions) => {
                for &position in positions {
                    matched_right[position] = true;
                    let mut map = item.clone().into_object();
                    merge_fields(&mut map, right[position].clone());
                    result.push(Item::from(map));
                }
            }
            None if keep_unmatched => result.push(item),
            None => {}
        }
    }
    if keep_unmatched {
        result.extend(
            right
                .into_iter()
                .zip(matched_right)
                .filter(|(_, matched)| !matched)
                .map(|(item, _)| item),
        );
    }
    result
}

fn multiplex(left: ItemList, right: ItemList) -> ItemList {
    let mut result = Vec::with_capacity(left.len() * right.len());
    for l in &left {
        for r in &right {
            let mut map = l.clone().into_object();
            merge_fields(&mut map, r.clone());
            result.push(Item::from(map));
        }
    }
    result
}
