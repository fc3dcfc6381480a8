//! Nested JSON data addressed by slash-delimited keys.

use comex_core::{ComexError, ErrorInfo};
use serde_json::{Map, Value};

/// Tree of experiment results.
///
/// `set("metrics/loss", 0.1)` creates the `metrics` object on demand. Writing
/// below a value that is not an object is refused instead of overwriting it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataStore {
    root: Map<String, Value>,
}

fn split_key(key: &str) -> Result<Vec<&str>, ComexError> {
    let parts: Vec<&str> = key.split('/').filter(|part| !part.is_empty()).collect();
    if parts.is_empty() {
        return Err(ComexError::Data(
            ErrorInfo::new("data.empty_key", "data keys must name at least one segment")
                .with_context("key", key),
        ));
    }
    Ok(parts)
}

impl DataStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store over a decoded data file. Non-object values give an empty store.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(root) => Self { root },
            _ => Self::default(),
        }
    }

    /// Stores `value` under `key`, creating intermediate objects.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<(), ComexError> {
        let parts = split_key(key)?;
        let (leaf, parents) = parts.split_last().ok_or_else(|| {
            ComexError::Data(ErrorInfo::new("data.empty_key", "empty key").with_context("key", key))
        })?;
        let mut cursor = &mut self.root;
        for (depth, part) in parents.iter().enumerate() {
            let slot = cursor
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            cursor = match slot {
                Value::Object(map) => map,
                other => {
                    return Err(ComexError::Data(
                        ErrorInfo::new(
                            "data.not_a_mapping",
                            format!("cannot nest below a {} value", kind(other)),
                        )
                        .with_context("key", key)
                        .with_context("at", parents[..=depth].join("/")),
                    ))
                }
            };
        }
        cursor.insert(leaf.to_string(), value.into());
        Ok(())
    }

    /// Reads the value under `key`.
    pub fn get(&self, key: &str) -> Result<&Value, ComexError> {
        self.lookup(key)?.ok_or_else(|| {
            ComexError::Data(
                ErrorInfo::new("data.missing", format!("no data stored under '{key}'"))
                    .with_context("key", key),
            )
        })
    }

    /// Like `get`, but `None` instead of an error.
    pub fn try_get(&self, key: &str) -> Option<&Value> {
        self.lookup(key).ok().flatten()
    }

    fn lookup(&self, key: &str) -> Result<Option<&Value>, ComexError> {
        let parts = split_key(key)?;
        let mut cursor: Option<&Value> = None;
        let mut map = &self.root;
        for (index, part) in parts.iter().enumerate() {
            let Some(value) = map.get(*part) else {
                return Ok(None);
            };
            if index + 1 == parts.len() {
                cursor = Some(value);
            } else if let Value::Object(inner) = value {
                map = inner;
            } else {
                return Ok(None);
            }
        }
        Ok(cursor)
    }

    /// Appends `value` to the list under `key`, creating the list on first use.
    pub fn append(&mut self, key: &str, value: impl Into<Value>) -> Result<usize, ComexError> {
        let mut list = match self.lookup(key)? {
            None => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(ComexError::Data(
                    ErrorInfo::new(
                        "data.not_a_list",
                        format!("cannot append to a {} value", kind(other)),
                    )
                    .with_context("key", key),
                ))
            }
        };
        list.push(value.into());
        let len = list.len();
        self.set(key, Value::Array(list))?;
        Ok(len)
    }

    /// Top-level entries, `_` keys included.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Tree written to `experiment_data.json`: top-level keys starting with `_` are dropped.
    pub fn persisted(&self) -> Value {
        Value::Object(
            self.root
                .iter()
                .filter(|(key, _)| !key.starts_with('_'))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_set_creates_intermediate_levels() {
        let mut store = DataStore::new();
        store.set("metrics/x", 5).expect("set");
        store.set("metrics/y/z", "deep").expect("set");
        assert_eq!(
            Value::Object(store.as_map().clone()),
            json!({"metrics": {"x": 5, "y": {"z": "deep"}}})
        );
        assert_eq!(store.get("metrics/y/z").expect("get"), &json!("deep"));
    }

    #[test]
    fn refuses_to_nest_below_a_scalar() {
        let mut store = DataStore::new();
        store.set("a", 1).expect("set");
        let err = store.set("a/b", 2).expect_err("scalar intermediate");
        assert_eq!(err.info().code, "data.not_a_mapping");
        assert_eq!(store.get("a").expect("get"), &json!(1));
    }

    #[test]
    fn append_builds_lists() {
        let mut store = DataStore::new();
        assert_eq!(store.append("loss", 0.5).expect("append"), 1);
        assert_eq!(store.append("loss", 0.25).expect("append"), 2);
        assert_eq!(store.get("loss").expect("get"), &json!([0.5, 0.25]));
    }

    #[test]
    fn private_keys_are_not_persisted() {
        let mut store = DataStore::new();
        store.set("_cache/blob", 1).expect("set");
        store.set("kept", 2).expect("set");
        assert_eq!(store.persisted(), json!({"kept": 2}));
    }
}
