//! RFC 7396 merge patch generation.

use serde_json::{Map, Value};

/// Compute the merge patch that turns `original` into `modified`
///
/// Keys removed from an object become `null`. Nested objects are diffed
/// recursively; arrays and scalars are replaced wholesale. Returns an empty
/// object when nothing changed.
#[must_use]
pub fn create_merge_patch(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(original), Value::Object(modified)) => {
            Value::Object(diff_objects(original, modified))
        }
        (_, modified) => modified.clone(),
    }
}

fn diff_objects(
    original: &Map<String, Value>,
    modified: &Map<String, Value>,
) -> Map<String, Value> {
    let mut patch = Map::new();

    for key in original.keys() {
        if !modified.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    for (key, new_value) in modified {
        match original.get(key) {
            Some(old_value) if old_value == new_value => {}
            None if new_value.is_null() => {}
            Some(Value::Object(old)) => {
                if let Value::Object(new) = new_value {
                    let nested = diff_objects(old, new);
                    if !nested.is_empty() {
                        patch.insert(key.clone(), Value::Object(nested));
                    }
                } else {
                    patch.insert(key.clone(), new_value.clone());
                }
            }
            _ => {
                patch.insert(key.clone(), new_value.clone());
            }
        }
    }

    patch
}

/// `true` for a patch that would not change anything
#[must_use]
pub(crate) fn is_empty_patch(patch: &Value) -> bool {
    patch.as_object().is_some_and(Map::is_empty)
}
