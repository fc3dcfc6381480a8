//! JSON and YAML encoding for archive files and configuration.
//!
//! Archive JSON is written with object keys in sorted order, so two runs with
//! the same content produce identical files and identical digests.

use comex_core::{ComexError, ErrorInfo};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

fn serde_error(code: &str, err: impl ToString) -> ComexError {
    ComexError::Serde(ErrorInfo::new(code, err.to_string()))
}

/// Reorders every object in `value`, at any depth, by key.
fn sort_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
            entries.sort_by(|(left, _), (right, _)| left.cmp(right));
            for (_, nested) in &mut entries {
                sort_keys(nested);
            }
            map.extend(entries);
        }
        Value::Array(items) => items.iter_mut().for_each(sort_keys),
        _ => {}
    }
}

fn sorted_value<T: Serialize>(value: &T) -> Result<Value, ComexError> {
    let mut value = serde_json::to_value(value).map_err(|err| serde_error("json.serialize", err))?;
    sort_keys(&mut value);
    Ok(value)
}

/// Compact JSON with sorted keys; the input of content digests.
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, ComexError> {
    serde_json::to_vec(&sorted_value(value)?).map_err(|err| serde_error("json.write", err))
}

/// Indented JSON with sorted keys and a trailing newline, for archive files.
pub fn to_pretty_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, ComexError> {
    let mut bytes =
        serde_json::to_vec_pretty(&sorted_value(value)?).map_err(|err| serde_error("json.write", err))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decodes a JSON archive file.
pub fn from_json_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, ComexError> {
    serde_json::from_slice(data).map_err(|err| serde_error("json.deserialize", err))
}

/// Decodes a YAML settings or experiment config file.
pub fn from_yaml_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, ComexError> {
    serde_yaml::from_slice(data).map_err(|err| serde_error("yaml.deserialize", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_bytes_sort_nested_keys() {
        let bytes = to_canonical_json_bytes(&json!({"b": {"z": 1, "a": 2}, "a": [{"y": 0, "x": 1}]}))
            .expect("serialize");
        assert_eq!(
            String::from_utf8(bytes).expect("utf8"),
            r#"{"a":[{"x":1,"y":0}],"b":{"a":2,"z":1}}"#
        );
    }

    #[test]
    fn pretty_bytes_end_with_a_newline() {
        let bytes = to_pretty_json_bytes(&json!({"k": 1})).expect("serialize");
        assert_eq!(String::from_utf8(bytes).expect("utf8"), "{\n  \"k\": 1\n}\n");
    }

    #[test]
    fn malformed_yaml_is_a_serde_error() {
        let err = from_yaml_slice::<Value>(b"key: [open").unwrap_err();
        assert!(matches!(err, ComexError::Serde(_)));
        assert_eq!(err.info().code, "yaml.deserialize");
    }
}
