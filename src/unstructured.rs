//! Typed accessors over schema-free API objects
//!
//! Migrated manifests are handled as dynamic objects whose body is a tree
//! of string-keyed maps ([`serde_json::Value`]). These helpers give the
//! transformer typed access to known paths (`spec.replicas`,
//! `spec.clusterIP`, `spec.claimRef.name`, ...) without ad-hoc matching
//! at every call site.

use serde_json::Value;

use crate::error::{Error, Result};

/// Walk `path` down nested maps, returning the value at the end.
pub fn get<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        current = current.as_object()?.get(*key)?;
    }
    Some(current)
}

/// String at `path`, if present and a string.
pub fn get_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    get(value, path)?.as_str()
}

/// Remove and return the value at `path`. Intermediate maps are left in
/// place; a missing segment is a no-op.
pub fn remove(value: &mut Value, path: &[&str]) -> Option<Value> {
    let (last, parents) = path.split_last()?;
    let mut current = value;
    for key in parents {
        current = current.as_object_mut()?.get_mut(*key)?;
    }
    current.as_object_mut()?.remove(*last)
}

/// Set `path` to `new`, creating intermediate maps as needed. Non-map
/// values along the way are replaced by maps.
pub fn set(value: &mut Value, path: &[&str], new: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = value;
    for key in parents {
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        current = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    if !current.is_object() {
        *current = Value::Object(Default::default());
    }
    if let Some(map) = current.as_object_mut() {
        map.insert(last.to_string(), new);
    }
}

/// Integer at `path`.
///
/// Wire encodings disagree on numeric width, so any integer-valued number
/// is accepted (i64, u64 within range, or a float with zero fraction).
/// A present but non-integer value is an error; a missing path is `None`.
pub fn get_int(value: &Value, path: &[&str]) -> Result<Option<i64>> {
    let Some(found) = get(value, path) else {
        return Ok(None);
    };
    as_integer(found).map(Some).ok_or_else(|| Error::Internal(format!(
        "expected integer at {}, found {}",
        path.join("."),
        found
    )))
}

fn as_integer(value: &Value) -> Option<i64> {
    let number = value.as_number()?;
    if let Some(i) = number.as_i64() {
        return Some(i);
    }
    if let Some(u) = number.as_u64() {
        return i64::try_from(u).ok();
    }
    let f = number.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        return Some(f as i64);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_walks_nested_maps() {
        let value = json!({"spec": {"claimRef": {"name": "data", "namespace": "team-a"}}});
        assert_eq!(
            get_str(&value, &["spec", "claimRef", "name"]),
            Some("data")
        );
        assert_eq!(get(&value, &["spec", "missing"]), None);
        assert_eq!(get(&value, &["spec", "claimRef", "name", "deeper"]), None);
    }

    #[test]
    fn test_remove_leaves_siblings() {
        let mut value = json!({"spec": {"clusterIP": "10.0.0.5", "ports": []}});
        let removed = remove(&mut value, &["spec", "clusterIP"]);
        assert_eq!(removed, Some(json!("10.0.0.5")));
        assert_eq!(value, json!({"spec": {"ports": []}}));

        // Missing path is a no-op
        assert_eq!(remove(&mut value, &["spec", "clusterIP"]), None);
    }

    #[test]
    fn test_set_creates_intermediate_maps() {
        let mut value = json!({});
        set(&mut value, &["spec", "replicas"], json!(0));
        assert_eq!(value, json!({"spec": {"replicas": 0}}));

        set(&mut value, &["spec", "replicas"], json!(3));
        assert_eq!(value, json!({"spec": {"replicas": 3}}));
    }

    #[test]
    fn test_get_int_accepts_any_integer_width() {
        assert_eq!(get_int(&json!({"r": 3}), &["r"]).unwrap(), Some(3));
        assert_eq!(get_int(&json!({"r": 3u64}), &["r"]).unwrap(), Some(3));
        assert_eq!(get_int(&json!({"r": 3.0}), &["r"]).unwrap(), Some(3));
        assert_eq!(get_int(&json!({}), &["r"]).unwrap(), None);
    }

    #[test]
    fn test_get_int_rejects_non_integers() {
        assert!(get_int(&json!({"r": 3.5}), &["r"]).is_err());
        assert!(get_int(&json!({"r": "three"}), &["r"]).is_err());
        assert!(get_int(&json!({"r": u64::MAX}), &["r"]).is_err());
    }
}
