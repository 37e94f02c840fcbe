//! Minimal merge patches between two snapshots of the same object
//!
//! A [`PatchDelta`] is an [RFC 7386](https://datatracker.ietf.org/doc/html/rfc7386) JSON merge patch
//! holding only the fields that differ between an original and a modified snapshot.
//! Fields the controller never touched are left out, so concurrent writers of
//! those fields are not clobbered when the patch is applied server side.
use kube::api::Patch;
use serde::Serialize;
use serde_json::{Map, Value};

/// A field-scoped delta between two snapshots
#[derive(Clone, Debug, PartialEq)]
pub struct PatchDelta {
    patch: Value,
}

impl PatchDelta {
    /// Compute the delta turning `original` into `modified`
    ///
    /// Keys present in `modified` but not `original` are added, changed keys are
    /// replaced, and keys dropped from `modified` are removed with `null`.
    /// Lists are replaced wholesale, as merge patches require.
    pub fn between<K: Serialize>(original: &K, modified: &K) -> Result<Self, serde_json::Error> {
        let original = serde_json::to_value(original)?;
        let modified = serde_json::to_value(modified)?;
        Ok(Self::from_values(&original, &modified))
    }

    /// Compute the delta between two already serialized snapshots
    pub fn from_values(original: &Value, modified: &Value) -> Self {
        let patch = diff(original, modified).unwrap_or_else(|| Value::Object(Map::new()));
        Self { patch }
    }

    /// Require the server copy to still be at `resource_version`
    ///
    /// The API server rejects a merge patch carrying a stale `metadata.resourceVersion`
    /// with a `409 Conflict`.
    #[must_use]
    pub fn guarded_by(mut self, resource_version: Option<&str>) -> Self {
        let Some(rv) = resource_version else {
            return self;
        };
        if let Value::Object(root) = &mut self.patch {
            let meta = root
                .entry("metadata")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(meta) = meta {
                meta.insert("resourceVersion".into(), Value::String(rv.into()));
            }
        }
        self
    }

    /// The raw merge patch document
    pub fn as_value(&self) -> &Value {
        &self.patch
    }

    /// The patch in the form [`kube::Api::patch`] submits
    pub fn as_patch(&self) -> Patch<&Value> {
        Patch::Merge(&self.patch)
    }
}

fn diff(original: &Value, modified: &Value) -> Option<Value> {
    match (original, modified) {
        (Value::Object(orig), Value::Object(modi)) => {
            let mut patch = Map::new();
            for (key, new) in modi {
                match orig.get(key) {
                    Some(old) => {
                        if let Some(d) = diff(old, new) {
                            patch.insert(key.clone(), d);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), new.clone());
                    }
                }
            }
            for key in orig.keys().filter(|k| !modi.contains_key(*k)) {
                patch.insert(key.clone(), Value::Null);
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        (old, new) if old == new => None,
        (_, new) => Some(new.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::PatchDelta;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    #[test]
    fn delta_holds_only_changed_and_added_fields() {
        let delta = PatchDelta::from_values(&json!({"a": 1, "b": 2}), &json!({"a": 1, "b": 3, "c": 4}));
        assert_json_eq!(delta.as_value(), json!({"b": 3, "c": 4}));
        assert!(delta.as_value().get("a").is_none());
    }

    #[test]
    fn nested_objects_are_diffed_per_field() {
        let original = json!({
            "metadata": {"name": "x", "annotations": {"keep": "1"}, "labels": {"l": "v"}},
            "spec": {"initializers": {"pending": [{"name": "a"}, {"name": "b"}]}, "rules": [{"host": "a.b"}]}
        });
        let modified = json!({
            "metadata": {"name": "x", "annotations": {"keep": "1", "new": "2"}, "labels": {"l": "v"}},
            "spec": {"initializers": {"pending": [{"name": "b"}]}, "rules": [{"host": "a.b"}]}
        });
        let delta = PatchDelta::from_values(&original, &modified);
        assert_json_eq!(
            delta.as_value(),
            json!({
                "metadata": {"annotations": {"new": "2"}},
                "spec": {"initializers": {"pending": [{"name": "b"}]}}
            })
        );
    }

    #[test]
    fn dropped_fields_become_null() {
        let delta = PatchDelta::from_values(
            &json!({"spec": {"initializers": {"pending": [{"name": "a"}]}, "rules": []}}),
            &json!({"spec": {"rules": []}}),
        );
        assert_json_eq!(delta.as_value(), json!({"spec": {"initializers": null}}));
    }

    #[test]
    fn identical_snapshots_give_empty_delta() {
        let doc = json!({"a": {"b": [1, 2]}});
        let delta = PatchDelta::from_values(&doc, &doc);
        assert_json_eq!(delta.as_value(), json!({}));
    }

    #[test]
    fn applying_twice_equals_applying_once() {
        let original = json!({"a": 1, "b": 2, "d": {"e": 5}});
        let modified = json!({"a": 1, "b": 3, "c": 4, "d": {"e": 5}});
        let delta = PatchDelta::from_values(&original, &modified);

        // the server copy may carry fields this side never saw
        let mut server = json!({"a": 1, "b": 2, "d": {"e": 5, "f": 6}, "z": true});
        json_patch::merge(&mut server, delta.as_value());
        let once = server.clone();
        json_patch::merge(&mut server, delta.as_value());
        assert_eq!(server, once);
        assert_json_eq!(server, json!({"a": 1, "b": 3, "c": 4, "d": {"e": 5, "f": 6}, "z": true}));
    }

    #[test]
    fn guard_pins_resource_version() {
        let delta = PatchDelta::from_values(&json!({"b": 1}), &json!({"b": 2})).guarded_by(Some("42"));
        assert_json_eq!(delta.as_value(), json!({"b": 2, "metadata": {"resourceVersion": "42"}}));
        let unguarded = PatchDelta::from_values(&json!({}), &json!({})).guarded_by(None);
        assert_json_eq!(unguarded.as_value(), json!({}));
    }
}
