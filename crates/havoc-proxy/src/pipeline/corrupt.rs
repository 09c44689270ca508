//! Safe structural corruption of JSON response bodies.
//!
//! The mutation stays at the top level and keeps the output valid JSON: one
//! element is removed or nullified, chosen at random. Anything that cannot
//! be mutated that way (primitives, empty containers, unparseable bytes)
//! passes through untouched with a skip action naming the reason. This
//! routine is total; it must never fail a request.

use rand::Rng;
use serde_json::Value;

/// Mutate one top-level element of a JSON body. Returns the (possibly
/// unchanged) body and the action tag describing what happened.
pub fn corrupt_json_body(body: &[u8]) -> (Vec<u8>, String) {
    let mut value: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => {
            return (
                body.to_vec(),
                "corrupt_json:skipped(reason=parse_error)".to_string(),
            )
        }
    };

    let mut rng = rand::thread_rng();
    let nullify = rng.gen_bool(0.5);

    let action = match &mut value {
        Value::Array(items) => {
            if items.is_empty() {
                return (
                    body.to_vec(),
                    "corrupt_json:skipped(reason=empty_array)".to_string(),
                );
            }
            let index = rng.gen_range(0..items.len());
            if nullify {
                items[index] = Value::Null;
                format!("corrupt_json:null_index:{index}")
            } else {
                items.remove(index);
                format!("corrupt_json:removed_index:{index}")
            }
        }
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            if keys.is_empty() {
                return (
                    body.to_vec(),
                    "corrupt_json:skipped(reason=empty_object)".to_string(),
                );
            }
            let key = keys[rng.gen_range(0..keys.len())].clone();
            if nullify {
                map.insert(key.clone(), Value::Null);
                format!("corrupt_json:null_value:{key}")
            } else {
                map.remove(&key);
                format!("corrupt_json:removed_key:{key}")
            }
        }
        _ => {
            return (
                body.to_vec(),
                "corrupt_json:skipped(reason=primitive_value)".to_string(),
            )
        }
    };

    match serde_json::to_vec(&value) {
        Ok(bytes) => (bytes, action),
        Err(_) => (
            body.to_vec(),
            "corrupt_json:skipped(reason=parse_error)".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_loses_or_nullifies_one_key() {
        let input = json!({"a": 1, "b": 2, "c": 3});
        let bytes = serde_json::to_vec(&input).unwrap();
        for _ in 0..50 {
            let (out, action) = corrupt_json_body(&bytes);
            let value: Value = serde_json::from_slice(&out).unwrap();
            let map = value.as_object().unwrap();
            if action.starts_with("corrupt_json:removed_key:") {
                assert_eq!(map.len(), 2);
            } else {
                assert!(action.starts_with("corrupt_json:null_value:"));
                assert_eq!(map.len(), 3);
                assert_eq!(map.values().filter(|v| v.is_null()).count(), 1);
            }
        }
    }

    #[test]
    fn test_array_loses_or_nullifies_one_element() {
        let input = json!([1, 2, 3, 4]);
        let bytes = serde_json::to_vec(&input).unwrap();
        for _ in 0..50 {
            let (out, action) = corrupt_json_body(&bytes);
            let value: Value = serde_json::from_slice(&out).unwrap();
            let items = value.as_array().unwrap();
            if action.starts_with("corrupt_json:removed_index:") {
                assert_eq!(items.len(), 3);
            } else {
                assert!(action.starts_with("corrupt_json:null_index:"));
                assert_eq!(items.len(), 4);
                assert_eq!(items.iter().filter(|v| v.is_null()).count(), 1);
            }
        }
    }

    #[test]
    fn test_empty_containers_pass_through() {
        let (out, action) = corrupt_json_body(b"[]");
        assert_eq!(out, b"[]");
        assert_eq!(action, "corrupt_json:skipped(reason=empty_array)");

        let (out, action) = corrupt_json_body(b"{}");
        assert_eq!(out, b"{}");
        assert_eq!(action, "corrupt_json:skipped(reason=empty_object)");
    }

    #[test]
    fn test_primitives_pass_through() {
        for body in [&b"42"[..], b"\"hello\"", b"true", b"null"] {
            let (out, action) = corrupt_json_body(body);
            assert_eq!(out, body);
            assert_eq!(action, "corrupt_json:skipped(reason=primitive_value)");
        }
    }

    #[test]
    fn test_unparseable_body_passes_through() {
        let body = b"<html>not json</html>";
        let (out, action) = corrupt_json_body(body);
        assert_eq!(out, body);
        assert_eq!(action, "corrupt_json:skipped(reason=parse_error)");
    }

    #[test]
    fn test_single_key_object_can_become_empty() {
        let bytes = serde_json::to_vec(&json!({"only": 1})).unwrap();
        let mut saw_removed = false;
        let mut saw_nulled = false;
        for _ in 0..100 {
            let (out, action) = corrupt_json_body(&bytes);
            let value: Value = serde_json::from_slice(&out).unwrap();
            if action.starts_with("corrupt_json:removed_key:") {
                assert!(value.as_object().unwrap().is_empty());
                saw_removed = true;
            } else {
                assert!(value["only"].is_null());
                saw_nulled = true;
            }
        }
        assert!(saw_removed && saw_nulled, "both mutations should occur");
    }
}
