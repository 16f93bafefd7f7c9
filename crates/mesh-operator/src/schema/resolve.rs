use std::collections::BTreeMap;

use tracing::debug;

use super::{AdditionalProperties, SchemaNode};

/// The only supported reference form, pointing into a `$defs` table.
const LOCAL_DEFINITIONS_POINTER: &str = "#/$defs/";

/// Inlines all local `$ref`s of `schema`.
///
/// A reference of the form `#/$defs/<key>` is replaced by a resolved copy of
/// the definition `<key>`, looked up in the referencing node's own `$defs` first
/// and then in the `$defs` of its enclosing nodes. `$defs` tables are dropped
/// from the result once their definitions have been inlined.
///
/// Unsupported or dangling references are left in place. A reference that
/// points back into a definition currently being inlined is left in place as
/// well, which bounds the expansion of self-referential definitions. Resolving
/// an already resolved schema returns it unchanged.
pub fn resolve(schema: SchemaNode) -> SchemaNode {
    Resolver::default().resolve_node(schema)
}

#[derive(Default)]
struct Resolver {
    /// Definition tables in scope, innermost last.
    scopes: Vec<BTreeMap<String, SchemaNode>>,

    /// References currently being inlined.
    expanding: Vec<String>,
}

impl Resolver {
    fn resolve_node(&mut self, mut node: SchemaNode) -> SchemaNode {
        let scoped = match node.definitions.take() {
            Some(definitions) => {
                self.scopes.push(definitions);
                true
            }
            None => false,
        };

        let target = node
            .reference
            .as_deref()
            .filter(|reference| !self.expanding.iter().any(|r| r == reference))
            .and_then(|reference| self.lookup(reference).map(|t| (reference.to_owned(), t)));

        let resolved = match target {
            Some((reference, target)) => {
                self.expanding.push(reference);
                let resolved = self.resolve_node(target);
                self.expanding.pop();
                resolved
            }
            None => {
                if let Some(reference) = &node.reference {
                    debug!(%reference, "leaving schema reference unresolved");
                }
                self.resolve_children(node)
            }
        };

        if scoped {
            self.scopes.pop();
        }
        resolved
    }

    fn resolve_children(&mut self, mut node: SchemaNode) -> SchemaNode {
        if let Some(properties) = node.properties.take() {
            node.properties = Some(
                properties
                    .into_iter()
                    .map(|(key, property)| (key, self.resolve_node(property)))
                    .collect(),
            );
        }

        if let Some(items) = node.items.take() {
            node.items = Some(Box::new(self.resolve_node(*items)));
        }

        node.additional_properties = match node.additional_properties.take() {
            Some(AdditionalProperties::Schema(additional)) => Some(AdditionalProperties::Schema(
                Box::new(self.resolve_node(*additional)),
            )),
            other => other,
        };

        node
    }

    fn lookup(&self, reference: &str) -> Option<SchemaNode> {
        let key = reference.strip_prefix(LOCAL_DEFINITIONS_POINTER)?;
        if key.is_empty() || key.contains('/') {
            return None;
        }

        self.scopes
            .iter()
            .rev()
            .find_map(|definitions| definitions.get(key))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn schema(value: serde_json::Value) -> SchemaNode {
        serde_json::from_value(value).expect("test schema is valid")
    }

    #[test]
    fn resolve_root_reference() {
        let resolved = resolve(schema(json!({
            "$defs": {
                "values": {
                    "type": "object",
                    "properties": {"replicaCount": {"type": "integer"}}
                }
            },
            "$ref": "#/$defs/values"
        })));

        assert_eq!(
            resolved,
            schema(json!({
                "type": "object",
                "properties": {"replicaCount": {"type": "integer"}}
            }))
        );
    }

    #[test]
    fn resolve_nested_references() {
        let resolved = resolve(schema(json!({
            "$defs": {
                "values": {
                    "type": "object",
                    "properties": {
                        "service": {"$ref": "#/$defs/service"},
                        "env": {
                            "type": "object",
                            "additionalProperties": {"$ref": "#/$defs/envValue"}
                        },
                        "volumes": {"type": "array", "items": {"$ref": "#/$defs/volume"}}
                    }
                },
                "service": {"type": "object", "properties": {"type": {"type": "string"}}},
                "envValue": {"type": "string"},
                "volume": {"type": "object", "properties": {"name": {"type": "string"}}}
            },
            "$ref": "#/$defs/values"
        })));

        assert_eq!(
            resolved,
            schema(json!({
                "type": "object",
                "properties": {
                    "service": {"type": "object", "properties": {"type": {"type": "string"}}},
                    "env": {"type": "object", "additionalProperties": {"type": "string"}},
                    "volumes": {
                        "type": "array",
                        "items": {"type": "object", "properties": {"name": {"type": "string"}}}
                    }
                }
            }))
        );
    }

    #[test]
    fn unsupported_references_pass_through() {
        let input = schema(json!({
            "type": "object",
            "properties": {
                "remote": {"$ref": "https://example.com/schema.json"},
                "dangling": {"$ref": "#/$defs/missing"},
                "pointer": {"$ref": "#/properties/remote"}
            }
        }));

        assert_eq!(resolve(input.clone()), input);
    }

    #[test]
    fn self_referential_definitions_terminate() {
        let resolved = resolve(schema(json!({
            "$defs": {
                "node": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "children": {"type": "array", "items": {"$ref": "#/$defs/node"}}
                    }
                }
            },
            "$ref": "#/$defs/node"
        })));

        assert_eq!(
            resolved,
            schema(json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "children": {"type": "array", "items": {"$ref": "#/$defs/node"}}
                }
            }))
        );
    }

    #[test]
    fn resolution_is_idempotent() {
        let input = schema(json!({
            "type": "object",
            "$defs": {
                "node": {
                    "type": ["object", "null"],
                    "properties": {"next": {"$ref": "#/$defs/node"}}
                }
            },
            "properties": {
                "head": {"$ref": "#/$defs/node"},
                "labels": {"type": "object", "additionalProperties": true}
            }
        }));

        let once = resolve(input);
        let twice = resolve(once.clone());
        assert_eq!(once, twice);
        assert!(once.definitions.is_none());
    }
}
