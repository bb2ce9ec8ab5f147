//! Built-in node types.

mod batch;
mod conditional;
mod connector;
mod merge;
mod transform;
mod trigger;

pub use batch::SplitInBatchesNode;
pub use conditional::{IfNode, SwitchNode};
pub use connector::ConnectorNode;
pub use merge::{MergeMode, MergeNode};
pub use transform::{JsonParseNode, NoOpNode, SetNode};
pub use trigger::ManualTrigger;

use serde_json::{Map, Value as JsonValue};

/// Reads a dotted path such as `user.address.city`.
pub(crate) fn get_path<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}

/// Writes a dotted path, creating (or replacing non-object) intermediate
/// values with objects.
pub(crate) fn set_path(map: &mut Map<String, JsonValue>, path: &str, value: JsonValue) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| JsonValue::Object(Map::new()));
            if !entry.is_object() {
                *entry = JsonValue::Object(Map::new());
            }
            if let JsonValue::Object(child) = entry {
                set_path(child, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_path_creates_nested_objects() {
        let mut map = Map::new();
        map.insert("user".to_string(), json!("flat"));
        set_path(&mut map, "user.address.city", json!("Oslo"));
        set_path(&mut map, "id", json!(1));

        let value = JsonValue::Object(map);
        assert_eq!(value, json!({ "user": { "address": { "city": "Oslo" } }, "id": 1 }));
        assert_eq!(get_path(&value, "user.address.city"), Some(&json!("Oslo")));
        assert_eq!(get_path(&value, "user.zip"), None);
    }
}
