use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::path::{FieldPath, PathError, Segment};

/// Current values of a form, stored as one nested JSON object.
///
/// Field names are dot/bracket paths, so `address.city` and `address.zip` share the
/// `address` object and `contacts[0]` lives inside the `contacts` array.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueMap {
    root: Map<String, Value>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a JSON object; any other JSON value yields an empty map.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(root) => Self { root },
            _ => Self::default(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        // fast path for flat names
        if let Some(value) = self.root.get(name) {
            return Some(value);
        }
        let path = FieldPath::parse(name).ok()?;
        self.get_path(&path)
    }

    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        let (first, rest) = path.segments().split_first()?;
        let Segment::Key(key) = first else {
            return None;
        };
        let mut current = self.root.get(key)?;
        for segment in rest {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key)?,
                (Segment::Index(index), Value::Array(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn set(&mut self, name: &str, value: Value) -> Result<(), PathError> {
        let path = FieldPath::parse(name)?;
        self.set_path(&path, value);
        Ok(())
    }

    pub fn set_path(&mut self, path: &FieldPath, value: Value) {
        let mut root = Value::Object(std::mem::take(&mut self.root));
        path.set(&mut root, value);
        if let Value::Object(map) = root {
            self.root = map;
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        if let Some(value) = self.root.remove(name) {
            return Some(value);
        }
        let path = FieldPath::parse(name).ok()?;
        let mut root = Value::Object(std::mem::take(&mut self.root));
        let removed = path.remove(&mut root);
        if let Value::Object(map) = root {
            self.root = map;
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn clear(&mut self) {
        self.root.clear();
    }

    pub fn as_object(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.root.clone())
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.root)
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, serde_cbor::Error> {
        serde_cbor::to_vec(&self.root)
    }
}

impl From<Map<String, Value>> for ValueMap {
    fn from(root: Map<String, Value>) -> Self {
        Self { root }
    }
}

/// Whether a value counts as "filled in" for required checks and completion tracking.
pub fn is_filled(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_names_share_parent_objects() {
        let mut values = ValueMap::new();
        values.set("address.city", json!("Oslo")).expect("set");
        values.set("address.zip", json!("0150")).expect("set");
        assert_eq!(values.get("address.city"), Some(&json!("Oslo")));
        assert_eq!(
            values.to_json(),
            json!({ "address": { "city": "Oslo", "zip": "0150" } })
        );
        assert_eq!(values.remove("address.city"), Some(json!("Oslo")));
        assert!(!values.contains("address.city"));
    }

    #[test]
    fn filled_ignores_blank_strings() {
        assert!(!is_filled(Some(&json!("   "))));
        assert!(!is_filled(Some(&Value::Null)));
        assert!(is_filled(Some(&json!(false))));
        assert!(is_filled(Some(&json!(0))));
    }
}
