//! JSON metadata merge helpers shared by session and message metadata writes.

use serde_json::{Map, Value};

/// Deep-merge `overlay` onto `base`, in place. Objects merge key by key
/// (overlay wins on scalar/array conflicts); non-object overlay values
/// replace the base value outright.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => {
                        base_map.insert(key, overlay_val);
                    }
                }
            }
        }
        (base_slot, overlay_val) => {
            *base_slot = overlay_val;
        }
    }
}

/// Remove the reserved top-level `system` key from a metadata object.
/// Unprivileged writers never get to set this key — it is stripped *from
/// the incoming write*, not from what's already stored.
pub fn strip_system_key(value: &mut Value) {
    if let Value::Object(map) = value {
        map.remove("system");
    }
}

/// Place `value` at a dot-delimited key path inside `base`, creating
/// intermediate objects as needed. An empty path merges `value` at the root.
pub fn set_at_path(base: &mut Value, path: &str, value: Value) {
    if path.is_empty() {
        if let Value::Object(_) = value {
            deep_merge(base, value);
        } else {
            *base = value;
        }
        return;
    }

    if !base.is_object() {
        *base = Value::Object(Map::new());
    }
    let mut cursor = base;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let map = cursor.as_object_mut().expect("cursor is always an object");
        if i == segments.len() - 1 {
            map.insert((*segment).to_string(), value);
            return;
        }
        let entry = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        cursor = entry;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_overlays_nested_objects() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "b": 3});
        let overlay = json!({"a": {"y": 20, "z": 30}});
        deep_merge(&mut base, overlay);
        assert_eq!(base, json!({"a": {"x": 1, "y": 20, "z": 30}, "b": 3}));
    }

    #[test]
    fn deep_merge_request_wins_on_scalar_conflict() {
        let mut base = json!({"a": 1});
        deep_merge(&mut base, json!({"a": 2}));
        assert_eq!(base, json!({"a": 2}));
    }

    #[test]
    fn strip_system_key_removes_only_top_level() {
        let mut v = json!({"system": {"x": 1}, "y": {"system": 2}});
        strip_system_key(&mut v);
        assert_eq!(v, json!({"y": {"system": 2}}));
    }

    #[test]
    fn set_at_path_creates_intermediate_maps() {
        let mut base = json!({});
        set_at_path(&mut base, "a.b.c", json!(42));
        assert_eq!(base, json!({"a": {"b": {"c": 42}}}));
    }

    #[test]
    fn set_at_path_empty_path_merges_at_root() {
        let mut base = json!({"x": 1});
        set_at_path(&mut base, "", json!({"y": 2}));
        assert_eq!(base, json!({"x": 1, "y": 2}));
    }
}
