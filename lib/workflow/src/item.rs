//! Items: the records that flow between nodes.
//!
//! Items travel as ordered lists along edges. Order within one list is
//! preserved from the producing port to every consumer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// An ordered list of items on one port.
pub type ItemList = Vec<Item>;

/// One JSON record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(JsonValue);

impl Item {
    /// Wraps a JSON value.
    #[must_use]
    pub fn new(json: JsonValue) -> Self {
        Self(json)
    }

    /// Creates an item holding an empty object.
    #[must_use]
    pub fn empty() -> Self {
        Self(JsonValue::Object(Map::new()))
    }

    /// Returns the JSON value.
    #[must_use]
    pub fn json(&self) -> &JsonValue {
        &self.0
    }

    /// Consumes the item, returning its JSON value.
    #[must_use]
    pub fn into_json(self) -> JsonValue {
        self.0
    }

    /// Returns a top-level field of an object item.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.0.get(field)
    }

    /// Returns the item's fields if it is an object.
    #[must_use]
    pub fn as_object(&self) -> Option<&Map<String, JsonValue>> {
        self.0.as_object()
    }

    /// Returns the item's fields as an owned map.
    ///
    /// Non-object items are wrapped as `{"value": ...}` so they can take part
    /// in field-wise merges.
    #[must_use]
    pub fn into_object(self) -> Map<String, JsonValue> {
        match self.0 {
            JsonValue::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        }
    }
}

impl From<JsonValue> for Item {
    fn from(json: JsonValue) -> Self {
        Self(json)
    }
}

impl From<Map<String, JsonValue>> for Item {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(JsonValue::Object(map))
    }
}

/// Converts a JSON value into items: arrays spread, null yields none.
#[must_use]
pub fn items_from_json(value: JsonValue) -> ItemList {
    match value {
        JsonValue::Array(values) => values.into_iter().map(Item::new).collect(),
        JsonValue::Null => Vec::new(),
        other => vec![Item::new(other)],
    }
}
