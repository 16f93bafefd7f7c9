//! Helpers for free-form value trees.
//!
//! Value trees are plain [`serde_json::Value`]s. This module adds dotted-path
//! lookups (`spec.values.global.hub`) and a deep merge used when combining
//! global and component values.

use serde_json::{Map, Value};

/// Dotted-path accessors for [`Value`] trees.
///
/// Path segments are separated by `.`. A segment addressing an array must be a
/// zero-based index. Missing intermediate nodes yield [`None`] (or the
/// respective zero value), never an error.
pub trait ValueExt {
    /// Returns the node at `path`, if present.
    fn get_path(&self, path: &str) -> Option<&Value>;

    /// Returns `true` only if the node at `path` is the boolean `true`.
    fn get_path_bool(&self, path: &str) -> bool;

    /// Returns the node at `path` rendered as a string.
    ///
    /// Strings are returned as-is, numbers and booleans are formatted, all
    /// other nodes (including missing ones) yield an empty string.
    fn get_path_string(&self, path: &str) -> String;

    /// Returns the object at `path`, if the node exists and is an object.
    fn get_path_map(&self, path: &str) -> Option<&Map<String, Value>>;
}

impl ValueExt for Value {
    fn get_path(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index)),
                _ => None,
            })
    }

    fn get_path_bool(&self, path: &str) -> bool {
        self.get_path(path)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    fn get_path_string(&self, path: &str) -> String {
        match self.get_path(path) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        }
    }

    fn get_path_map(&self, path: &str) -> Option<&Map<String, Value>> {
        self.get_path(path).and_then(Value::as_object)
    }
}

/// Deep-merges `overlay` into `base`.
///
/// Objects are merged key by key. Any other overlay value, including arrays and
/// `null`, replaces the base value.
pub fn merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, overlay_value) in overlay {
                match base.get_mut(key) {
                    Some(base_value) => merge(base_value, overlay_value),
                    None => {
                        base.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn tree() -> Value {
        json!({
            "spec": {
                "values": {
                    "gateways": {
                        "istio-ingressgateway": {
                            "autoscaleEnabled": true,
                            "autoscaleMin": 3
                        }
                    },
                    "global": {"hub": "docker.io/istio"}
                },
                "components": {
                    "ingressGateways": [
                        {"name": "istio-ingressgateway", "enabled": true}
                    ]
                }
            }
        })
    }

    #[rstest]
    #[case("spec.values.global.hub", Some(json!("docker.io/istio")))]
    #[case("spec.components.ingressGateways.0.name", Some(json!("istio-ingressgateway")))]
    #[case("spec.components.ingressGateways.1.name", None)]
    #[case("spec.values.global.hub.nested", None)]
    #[case("spec.missing", None)]
    fn get_path(#[case] path: &str, #[case] expected: Option<Value>) {
        assert_eq!(tree().get_path(path).cloned(), expected);
    }

    #[rstest]
    #[case("spec.values.gateways.istio-ingressgateway.autoscaleEnabled", true)]
    #[case("spec.values.gateways.istio-egressgateway.autoscaleEnabled", false)]
    #[case("spec.values.global.hub", false)]
    fn get_path_bool(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(tree().get_path_bool(path), expected);
    }

    #[rstest]
    #[case("spec.values.gateways.istio-ingressgateway.autoscaleMin", "3")]
    #[case("spec.values.gateways.istio-ingressgateway.autoscaleEnabled", "true")]
    #[case("spec.values.global.hub", "docker.io/istio")]
    #[case("spec.values.global", "")]
    #[case("spec.values.missing", "")]
    fn get_path_string(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(tree().get_path_string(path), expected);
    }

    #[test]
    fn get_path_map() {
        let tree = tree();
        let global = tree.get_path_map("spec.values.global").expect("global is a map");
        assert_eq!(global.get("hub"), Some(&json!("docker.io/istio")));
        assert!(tree.get_path_map("spec.values.global.hub").is_none());
    }

    #[test]
    fn merge_nested_objects() {
        let mut base = json!({
            "global": {"hub": "docker.io/istio", "tag": "1.22.8"},
            "pilot": {"replicaCount": 1},
            "list": [1, 2]
        });
        merge(
            &mut base,
            &json!({
                "global": {"tag": "1.25.5"},
                "pilot": {"resources": {"limits": {"cpu": "1500m"}}},
                "list": [3]
            }),
        );

        assert_eq!(
            base,
            json!({
                "global": {"hub": "docker.io/istio", "tag": "1.25.5"},
                "pilot": {"replicaCount": 1, "resources": {"limits": {"cpu": "1500m"}}},
                "list": [3]
            })
        );
    }

    #[test]
    fn merge_replaces_non_objects() {
        let mut base = json!("scalar");
        merge(&mut base, &json!({"a": 1}));
        assert_eq!(base, json!({"a": 1}));
    }
}
