use kube::Resource;
use serde_json::{Map, Value};

pub fn is_status(error: &kube::Error, code: u16) -> bool {
    matches!(error, kube::Error::Api(status) if status.code == code)
}

pub fn is_not_found(error: &kube::Error) -> bool {
    is_status(error, 404)
}

pub fn is_conflict(error: &kube::Error) -> bool {
    is_status(error, 409)
}

pub fn is_invalid(error: &kube::Error) -> bool {
    is_status(error, 422)
}

/// Whether `obj` has an owner reference with the given uid.
pub fn is_owned_by<K: Resource>(obj: &K, owner_uid: &str) -> bool {
    obj.meta()
        .owner_references
        .iter()
        .flatten()
        .any(|owner| owner.uid == owner_uid)
}

pub fn is_being_deleted<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

pub fn label<'a, K: Resource>(obj: &'a K, key: &str) -> Option<&'a str> {
    obj.meta().labels.as_ref()?.get(key).map(String::as_str)
}

/// The JSON merge patch turning `before` into `after`.
///
/// Keys missing from `after` are set to `null` so that the server removes them, arrays are
/// replaced as a whole.
pub fn merge_patch(before: &Value, after: &Value) -> Value {
    match (before, after) {
        (Value::Object(before), Value::Object(after)) => {
            let mut patch = Map::new();
            for (key, old) in before {
                match after.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(new) if new != old => {
                        patch.insert(key.clone(), merge_patch(old, new));
                    }
                    Some(_) => {}
                }
            }
            for (key, new) in after {
                if !before.contains_key(key) {
                    patch.insert(key.clone(), new.clone());
                }
            }
            Value::Object(patch)
        }
        (_, after) => after.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn merge_patch_removes_and_replaces() {
        let before = json!({
            "observedGeneration": 1,
            "version": "v1",
            "conditions": [{"type": "Running", "status": "True"}],
            "internal": {"stateStoreRootPath": "hummock"},
        });
        let after = json!({
            "observedGeneration": 2,
            "conditions": [],
            "internal": {"stateStoreRootPath": "hummock"},
        });

        assert_eq!(
            merge_patch(&before, &after),
            json!({"observedGeneration": 2, "version": null, "conditions": []})
        );
    }

    #[test]
    fn nested_objects_are_diffed() {
        let before = json!({"a": {"b": 1, "c": 2}});
        let after = json!({"a": {"b": 1, "d": 3}});
        assert_eq!(merge_patch(&before, &after), json!({"a": {"c": null, "d": 3}}));
    }
}
