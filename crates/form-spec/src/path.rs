use serde_json::{Map, Value};
use thiserror::Error;

/// One step of a field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("field path is empty")]
    Empty,
    #[error("field path '{path}' has an unterminated index")]
    UnterminatedIndex { path: String },
    #[error("field path '{path}' has a non-numeric index '{index}'")]
    InvalidIndex { path: String, index: String },
    #[error("field path '{path}' has an empty segment")]
    EmptySegment { path: String },
}

/// Dot/bracket address of a (possibly nested) field, e.g. `contacts[1].email`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = raw.chars().peekable();
        // true right after a closing bracket, where a key may follow without a dot
        let mut after_index = false;

        while let Some(ch) = chars.next() {
            match ch {
                '.' => {
                    if current.is_empty() && !after_index {
                        return Err(PathError::EmptySegment { path: raw.into() });
                    }
                    if !current.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut current)));
                    }
                    after_index = false;
                    if chars.peek().is_none() {
                        return Err(PathError::EmptySegment { path: raw.into() });
                    }
                }
                '[' => {
                    if !current.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut current)));
                    } else if segments.is_empty() {
                        return Err(PathError::EmptySegment { path: raw.into() });
                    }
                    let mut index = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == ']' {
                            closed = true;
                            break;
                        }
                        index.push(inner);
                    }
                    if !closed {
                        return Err(PathError::UnterminatedIndex { path: raw.into() });
                    }
                    let parsed = index.trim().parse::<usize>().map_err(|_| {
                        PathError::InvalidIndex {
                            path: raw.into(),
                            index: index.clone(),
                        }
                    })?;
                    segments.push(Segment::Index(parsed));
                    after_index = true;
                }
                other => {
                    current.push(other);
                    after_index = false;
                }
            }
        }
        if !current.is_empty() {
            segments.push(Segment::Key(current));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Name of the outermost object key this path writes under.
    pub fn root_key(&self) -> Option<&str> {
        match self.segments.first() {
            Some(Segment::Key(key)) => Some(key),
            _ => None,
        }
    }

    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key)?,
                (Segment::Index(index), Value::Array(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Writes `value`, creating intermediate objects and arrays (padded with nulls).
    pub fn set(&self, root: &mut Value, value: Value) {
        let mut current = root;
        for (position, segment) in self.segments.iter().enumerate() {
            let last = position + 1 == self.segments.len();
            let next_is_index = matches!(self.segments.get(position + 1), Some(Segment::Index(_)));
            let empty_container = || {
                if next_is_index {
                    Value::Array(Vec::new())
                } else {
                    Value::Object(Map::new())
                }
            };
            match segment {
                Segment::Key(key) => {
                    if !current.is_object() {
                        *current = Value::Object(Map::new());
                    }
                    let Value::Object(map) = current else {
                        unreachable!("coerced to object above");
                    };
                    if last {
                        map.insert(key.clone(), value);
                        return;
                    }
                    current = map.entry(key.clone()).or_insert_with(empty_container);
                }
                Segment::Index(index) => {
                    if !current.is_array() {
                        *current = Value::Array(Vec::new());
                    }
                    let Value::Array(items) = current else {
                        unreachable!("coerced to array above");
                    };
                    if items.len() <= *index {
                        items.resize(*index + 1, Value::Null);
                    }
                    if last {
                        items[*index] = value;
                        return;
                    }
                    if items[*index].is_null() {
                        items[*index] = empty_container();
                    }
                    current = &mut items[*index];
                }
            }
        }
    }

    /// Removes the addressed value. Array slots are nulled so sibling indices stay stable.
    pub fn remove(&self, root: &mut Value) -> Option<Value> {
        let (last, parents) = self.segments.split_last()?;
        let mut current = root;
        for segment in parents {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get_mut(key)?,
                (Segment::Index(index), Value::Array(items)) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        match (last, current) {
            (Segment::Key(key), Value::Object(map)) => map.remove(key),
            (Segment::Index(index), Value::Array(items)) => items
                .get_mut(*index)
                .map(|slot| std::mem::replace(slot, Value::Null)),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_dots_and_brackets() {
        let path = FieldPath::parse("contacts[1].email").expect("path");
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("contacts".into()),
                Segment::Index(1),
                Segment::Key("email".into())
            ]
        );
        assert_eq!(path.root_key(), Some("contacts"));
    }

    #[test]
    fn rejects_malformed_paths() {
        assert_eq!(FieldPath::parse(""), Err(PathError::Empty));
        assert!(matches!(
            FieldPath::parse("a[1"),
            Err(PathError::UnterminatedIndex { .. })
        ));
        assert!(matches!(
            FieldPath::parse("a[x]"),
            Err(PathError::InvalidIndex { .. })
        ));
        assert!(matches!(
            FieldPath::parse("a..b"),
            Err(PathError::EmptySegment { .. })
        ));
    }

    #[test]
    fn set_creates_intermediate_containers() {
        let mut root = json!({});
        FieldPath::parse("contacts[1].email")
            .expect("path")
            .set(&mut root, json!("a@b.c"));
        assert_eq!(root, json!({ "contacts": [null, { "email": "a@b.c" }] }));
    }

    #[test]
    fn remove_nulls_array_slots() {
        let mut root = json!({ "items": [1, 2, 3], "name": "x" });
        let removed = FieldPath::parse("items[1]").expect("path").remove(&mut root);
        assert_eq!(removed, Some(json!(2)));
        assert_eq!(root["items"], json!([1, null, 3]));
        FieldPath::parse("name").expect("path").remove(&mut root);
        assert!(root.get("name").is_none());
    }
}
