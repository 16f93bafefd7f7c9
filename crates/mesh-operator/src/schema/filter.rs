use serde_json::{Map, Value};

use super::{AdditionalProperties, SchemaNode};

/// Returns a copy of `values` containing only the fields `schema` permits.
///
/// Without a schema the values are returned unchanged. A top-level object is
/// always filtered as an object, independent of the schema's `type`.
///
/// Fields declared in `properties` are filtered recursively against their
/// property schema and dropped if the result is `null`. Undeclared fields are
/// kept verbatim if `additionalProperties` is `true`, filtered against it if it
/// is a schema and dropped otherwise. An object schema without `properties`
/// keeps everything, whatever its `additionalProperties` says.
///
/// Type mismatches are never treated as errors: a value that does not have the
/// shape its schema's type asks for is passed through unchanged.
pub fn filter(schema: Option<&SchemaNode>, values: &Value) -> Value {
    let Some(schema) = schema else {
        return values.clone();
    };

    match values {
        Value::Object(object) => Value::Object(filter_object(object, schema)),
        _ => filter_value(values, schema),
    }
}

fn filter_value(value: &Value, schema: &SchemaNode) -> Value {
    match (schema.primary_type(), value) {
        ("object", Value::Object(object)) => Value::Object(filter_object(object, schema)),
        ("array", Value::Array(items)) => Value::Array(filter_array(items, schema)),
        _ => value.clone(),
    }
}

fn filter_object(object: &Map<String, Value>, schema: &SchemaNode) -> Map<String, Value> {
    let Some(properties) = &schema.properties else {
        return object.clone();
    };

    let mut filtered = Map::new();
    for (key, value) in object {
        let kept = match properties.get(key) {
            Some(property) => Some(filter_value(value, property)).filter(|v| !v.is_null()),
            None => filter_additional(value, schema.additional_properties.as_ref()),
        };
        if let Some(kept) = kept {
            filtered.insert(key.clone(), kept);
        }
    }
    filtered
}

fn filter_additional(value: &Value, additional: Option<&AdditionalProperties>) -> Option<Value> {
    match additional {
        Some(AdditionalProperties::Allowed(true)) => Some(value.clone()),
        Some(AdditionalProperties::Schema(schema)) => {
            Some(filter_value(value, schema)).filter(|v| !v.is_null())
        }
        Some(AdditionalProperties::Allowed(false)) | None => None,
    }
}

fn filter_array(items: &[Value], schema: &SchemaNode) -> Vec<Value> {
    let Some(item_schema) = &schema.items else {
        return items.to_vec();
    };

    items
        .iter()
        .map(|item| filter_value(item, item_schema))
        .filter(|item| !item.is_null())
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::schema::resolve;

    fn schema(value: Value) -> SchemaNode {
        serde_json::from_value(value).expect("test schema is valid")
    }

    #[test]
    fn no_schema_is_identity() {
        let values = json!({"a": "x", "b": {"c": [1, 2, 3]}});
        assert_eq!(filter(None, &values), values);
    }

    #[test]
    fn closed_object_drops_undeclared_fields() {
        let schema = schema(json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "additionalProperties": false
        }));

        assert_eq!(
            filter(Some(&schema), &json!({"a": "x", "b": "y"})),
            json!({"a": "x"})
        );
    }

    #[rstest]
    #[case(json!({"type": "object"}))]
    #[case(json!({"type": "object", "additionalProperties": true}))]
    #[case(json!({"type": "object", "additionalProperties": false}))]
    #[case(json!({"type": ["object", "null"]}))]
    #[case(json!({
        "type": "object",
        "additionalProperties": {
            "type": "object",
            "properties": {"value": {"type": "string"}},
            "additionalProperties": false
        }
    }))]
    fn object_without_properties_is_permissive(#[case] schema_value: Value) {
        let values = json!({"a": "x", "b": {"c": 1, "nested": true}});
        assert_eq!(filter(Some(&schema(schema_value)), &values), values);
    }

    #[test]
    fn nested_object_without_properties_is_kept_verbatim() {
        let schema = schema(json!({
            "type": "object",
            "properties": {
                "podAnnotations": {"type": "object", "additionalProperties": false}
            },
            "additionalProperties": false
        }));

        assert_eq!(
            filter(
                Some(&schema),
                &json!({"podAnnotations": {"sidecar.istio.io/inject": "false"}, "x": 1})
            ),
            json!({"podAnnotations": {"sidecar.istio.io/inject": "false"}})
        );
    }

    #[test]
    fn absent_additional_properties_drops_undeclared_fields() {
        let schema = schema(json!({
            "type": "object",
            "properties": {"replicaCount": {"type": "integer"}}
        }));

        assert_eq!(
            filter(Some(&schema), &json!({"replicaCount": 2, "global": {"hub": "x"}})),
            json!({"replicaCount": 2})
        );
    }

    #[test]
    fn nested_objects_and_arrays_are_filtered() {
        let schema = schema(json!({
            "type": "object",
            "properties": {
                "service": {
                    "type": ["object", "null"],
                    "properties": {
                        "type": {"type": "string"},
                        "ports": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": {"type": "string"},
                                    "port": {"type": "integer"}
                                },
                                "additionalProperties": false
                            }
                        }
                    },
                    "additionalProperties": false
                },
                "podAnnotations": {"type": "object", "additionalProperties": true}
            },
            "additionalProperties": false
        }));

        let values = json!({
            "service": {
                "type": "LoadBalancer",
                "loadBalancerIP": "10.0.0.1",
                "ports": [
                    {"name": "http2", "port": 80, "targetPort": 8080},
                    null,
                    {"name": "https", "port": 443}
                ]
            },
            "podAnnotations": {"prometheus.io/scrape": "true"},
            "unknown": 1
        });

        assert_eq!(
            filter(Some(&schema), &values),
            json!({
                "service": {
                    "type": "LoadBalancer",
                    "ports": [
                        {"name": "http2", "port": 80},
                        {"name": "https", "port": 443}
                    ]
                },
                "podAnnotations": {"prometheus.io/scrape": "true"}
            })
        );
    }

    #[test]
    fn null_values_of_declared_fields_are_dropped() {
        let schema = schema(json!({
            "type": "object",
            "properties": {"a": {"type": "string"}, "b": {"type": "string"}}
        }));

        assert_eq!(
            filter(Some(&schema), &json!({"a": null, "b": "y"})),
            json!({"b": "y"})
        );
    }

    #[rstest]
    #[case(json!({"type": "string"}), json!({"nested": true}))]
    #[case(json!({"type": "integer"}), json!("3"))]
    #[case(json!({"type": "array", "items": {"type": "string"}}), json!("not-an-array"))]
    #[case(json!({"type": "object", "properties": {}}), json!([1, 2]))]
    #[case(json!({}), json!({"anything": ["goes"]}))]
    fn type_mismatches_pass_through(#[case] property: Value, #[case] value: Value) {
        let schema = schema(json!({"type": "object", "properties": {"field": property}}));
        let values = json!({ "field": value });
        assert_eq!(filter(Some(&schema), &values), values);
    }

    #[test]
    fn referenced_definitions_are_filtered_after_resolution() {
        let schema = resolve(schema(json!({
            "$defs": {
                "values": {
                    "type": "object",
                    "properties": {
                        "autoscaling": {
                            "type": "object",
                            "properties": {
                                "enabled": {"type": "boolean"},
                                "minReplicas": {"type": "integer"}
                            },
                            "additionalProperties": false
                        }
                    },
                    "additionalProperties": false
                }
            },
            "$ref": "#/$defs/values"
        })));

        assert_eq!(
            filter(
                Some(&schema),
                &json!({
                    "autoscaling": {"enabled": true, "minReplicas": "3", "maxReplicas": 5},
                    "global": {"hub": "docker.io/istio"}
                })
            ),
            json!({"autoscaling": {"enabled": true, "minReplicas": "3"}})
        );
    }

    /// Every key in the output must be declared or permitted by the schema.
    #[test]
    fn filtered_keys_are_permitted() {
        let schema = schema(json!({
            "type": "object",
            "properties": {
                "a": {"type": "string"},
                "b": {"type": "object", "properties": {"c": {"type": "integer"}}}
            },
            "additionalProperties": false
        }));
        let values = json!({
            "a": "x",
            "b": {"c": 1, "d": 2},
            "e": {"f": 3},
            "g": [1]
        });

        let filtered = filter(Some(&schema), &values);
        let object = filtered.as_object().expect("filtered values are an object");
        let declared = schema.properties.as_ref().expect("schema declares properties");
        assert!(object.keys().all(|key| declared.contains_key(key)));
        assert_eq!(filtered, json!({"a": "x", "b": {"c": 1}}));
    }

    #[test]
    fn open_schema_preserves_all_keys() {
        let schema = schema(json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "additionalProperties": true
        }));
        let values = json!({"a": "x", "b": {"nested": [1, 2]}, "c": null});
        assert_eq!(filter(Some(&schema), &values), values);
    }
}
