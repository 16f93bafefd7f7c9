use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    crd::raw_object_schema,
    schema::{self, SchemaNode},
    values,
};

/// A set of chart installs sharing one set of global values.
///
/// `HelmApp`s created by this operator are derived from an `IstioOperator` of
/// the same name and carry the managed label. They are rewritten on every
/// change of their source and must not be edited by hand.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "operator.meshinstall.io",
    version = "v1alpha1",
    kind = "HelmApp",
    status = "HelmAppStatus",
    namespaced,
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct HelmAppSpec {
    /// The charts to install, in order.
    #[serde(default)]
    pub components: Vec<HelmComponent>,

    /// Values shared by every component, merged below each component's own
    /// values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub global_values: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<HelmRepo>,
}

/// A single chart install request.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmComponent {
    pub name: String,
    pub chart: String,

    #[serde(default)]
    pub version: String,

    /// Whether the merged values are filtered against the chart's
    /// `values.schema.json` before installing.
    #[serde(default)]
    pub enable_schema_validation: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub component_values: Option<Value>,
}

impl HelmComponent {
    /// A component can only be installed if it names itself and its chart.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.chart.is_empty()
    }

    /// Computes the values the chart is installed with.
    ///
    /// The component values are merged on top of `global_values`. If schema
    /// validation is enabled, the result is filtered against `chart_schema`,
    /// dropping every field the chart does not declare.
    pub fn effective_values(
        &self,
        global_values: Option<&Value>,
        chart_schema: Option<&SchemaNode>,
    ) -> Value {
        let mut merged = global_values
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        if let Some(component_values) = &self.component_values {
            values::merge(&mut merged, component_values);
        }

        if !self.enable_schema_validation {
            return merged;
        }
        schema::filter(chart_schema, &merged)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmRepo {
    pub name: String,
    pub url: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmAppStatus {
    #[serde(default)]
    pub phase: HelmAppPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The install progress of a [`HelmApp`], as reported by whoever executes it.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    JsonSchema,
    PartialEq,
    Serialize,
    strum::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum HelmAppPhase {
    #[default]
    Unknown,
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl HelmApp {
    /// The phase reported in the status, [`HelmAppPhase::Unknown`] if no status
    /// was written yet.
    pub fn phase(&self) -> HelmAppPhase {
        self.status
            .as_ref()
            .map(|status| status.phase)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn component(name: &str, chart: &str) -> HelmComponent {
        HelmComponent {
            name: name.to_owned(),
            chart: chart.to_owned(),
            version: "1.25.5".to_owned(),
            ..HelmComponent::default()
        }
    }

    #[rstest]
    #[case("istio-gateway", "gateway", true)]
    #[case("istio-istiod", "istiod", true)]
    #[case("", "gateway", false)]
    #[case("istio-gateway", "", false)]
    fn component_validity(#[case] name: &str, #[case] chart: &str, #[case] expected: bool) {
        assert_eq!(component(name, chart).is_valid(), expected);
    }

    #[test]
    fn effective_values_merge_component_over_global() {
        let global = json!({
            "global": {"hub": "docker.io/istio", "istioNamespace": "istio-system"},
            "meshConfig": {"defaultConfig": {"extraStatTags": ["destination_mesh_id"]}}
        });
        let component = HelmComponent {
            component_values: Some(json!({
                "global": {"hub": "registry.example.com/mesh"},
                "pilot": {"resources": {"limits": {"cpu": "1500m"}}}
            })),
            ..component("iop-mesh-istiod", "istiod")
        };

        assert_eq!(
            component.effective_values(Some(&global), None),
            json!({
                "global": {"hub": "registry.example.com/mesh", "istioNamespace": "istio-system"},
                "meshConfig": {"defaultConfig": {"extraStatTags": ["destination_mesh_id"]}},
                "pilot": {"resources": {"limits": {"cpu": "1500m"}}}
            })
        );
    }

    #[test]
    fn effective_values_filtered_when_schema_validation_enabled() {
        let chart_schema: SchemaNode = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "autoscaling": {
                    "type": "object",
                    "properties": {
                        "enabled": {"type": "boolean"},
                        "minReplicas": {"type": "integer"}
                    }
                },
                "labels": {"type": "object", "additionalProperties": true}
            },
            "additionalProperties": false
        }))
        .expect("test schema is valid");
        let global = json!({"global": {"hub": "docker.io/istio"}, "meshConfig": {}});
        let gateway = HelmComponent {
            enable_schema_validation: true,
            component_values: Some(json!({
                "autoscaling": {"enabled": true, "minReplicas": 1},
                "labels": {"app": "istio-ingressgateway"}
            })),
            ..component("istio-ingressgateway", "gateway")
        };

        let filtered = gateway.effective_values(Some(&global), Some(&chart_schema));
        assert_eq!(
            filtered,
            json!({
                "autoscaling": {"enabled": true, "minReplicas": 1},
                "labels": {"app": "istio-ingressgateway"}
            })
        );

        let unfiltered = HelmComponent {
            enable_schema_validation: false,
            ..gateway
        }
        .effective_values(Some(&global), Some(&chart_schema));
        assert!(unfiltered.get("global").is_some());
    }

    #[test]
    fn missing_status_is_unknown_phase() {
        let app = HelmApp::new("mesh", HelmAppSpec::default());
        assert_eq!(app.phase(), HelmAppPhase::Unknown);
    }
}
