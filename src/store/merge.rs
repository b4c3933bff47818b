//! # JSON Merge Patch
//!
//! Minimal RFC 7386 support: compute the merge patch between two documents
//! and apply a merge patch to a document. Arrays are replaced wholesale.

use serde_json::{Map, Value};

/// Merge patch turning `old` into `new`, or `None` when they are equal
pub fn merge_patch_diff(old: &Value, new: &Value) -> Option<Value> {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut patch = Map::new();
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            for (key, new_value) in new_map {
                match old_map.get(key) {
                    None => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                    Some(old_value) => {
                        if let Some(child) = merge_patch_diff(old_value, new_value) {
                            patch.insert(key.clone(), child);
                        }
                    }
                }
            }
            if patch.is_empty() {
                None
            } else {
                Some(Value::Object(patch))
            }
        }
        _ if old == new => None,
        _ => Some(new.clone()),
    }
}

/// Apply `patch` to `target` in place
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                apply_merge_patch(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_of_equal_documents_is_none() {
        let doc = json!({"a": 1, "b": {"c": [1, 2]}});
        assert_eq!(merge_patch_diff(&doc, &doc), None);
    }

    #[test]
    fn test_diff_nests_and_nulls_removed_keys() {
        let old = json!({"status": {"a": 1, "b": 2, "list": [1]}});
        let new = json!({"status": {"a": 1, "c": 3, "list": [1, 2]}});
        let patch = merge_patch_diff(&old, &new).unwrap();
        assert_eq!(
            patch,
            json!({"status": {"b": null, "c": 3, "list": [1, 2]}})
        );
    }

    #[test]
    fn test_applying_diff_reproduces_target() {
        let old = json!({"metadata": {"labels": {"x": "1"}}, "spec": {"n": 1}});
        let new = json!({"metadata": {"labels": {"y": "2"}}, "spec": {"n": 2, "m": true}});
        let patch = merge_patch_diff(&old, &new).unwrap();
        let mut doc = old.clone();
        apply_merge_patch(&mut doc, &patch);
        assert_eq!(doc, new);
    }

    #[test]
    fn test_apply_replaces_non_object_target() {
        let mut doc = json!("scalar");
        apply_merge_patch(&mut doc, &json!({"a": {"b": 1}}));
        assert_eq!(doc, json!({"a": {"b": 1}}));
    }
}
