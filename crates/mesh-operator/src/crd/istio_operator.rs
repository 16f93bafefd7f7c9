use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crd::{raw_object_schema, raw_value_schema};

/// The high-level mesh install declaration.
///
/// Only the fields needed to address the install are typed, everything else is
/// kept as a free-form value tree and handed to the migration verbatim.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "install.istio.io",
    version = "v1alpha1",
    kind = "IstioOperator",
    shortname = "iop",
    status = "InstallStatus",
    namespaced,
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct IstioOperatorSpec {
    /// Name of the installation profile the migration starts from, e.g. `default`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<String>,

    /// Version tag of the installed charts. Only string tags are honored when
    /// picking the chart version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_value_schema")]
    pub tag: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub mesh_config: Option<Value>,

    /// Per component settings, e.g. `ingressGateways` or `pilot.k8s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub components: Option<Value>,

    /// Legacy helm values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub values: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub unvalidated_values: Option<Value>,
}

impl IstioOperatorSpec {
    /// Returns the explicit chart version tag, if the spec carries a non-empty
    /// string tag.
    pub fn version_tag(&self) -> Option<&str> {
        self.tag
            .as_ref()
            .and_then(Value::as_str)
            .filter(|tag| !tag.is_empty())
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallStatus {
    #[serde(default)]
    pub status: InstallPhase,
}

/// The aggregate health of a mesh install, as reported on the
/// [`IstioOperator`].
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
pub enum InstallPhase {
    #[default]
    None,
    Updating,
    Reconciling,
    Healthy,
    Error,
    ActionRequired,
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("tag: 1.25.5", Some("1.25.5"))]
    #[case("tag: ''", None)]
    #[case("tag: 1.25", None)]
    #[case("hub: docker.io/istio", None)]
    fn version_tag(#[case] input: &str, #[case] expected: Option<&str>) {
        let spec: IstioOperatorSpec = serde_yaml::from_str(input).expect("test YAML is valid");
        assert_eq!(spec.version_tag(), expected);
    }

    #[test]
    fn parse_istio_operator() {
        let iop: IstioOperator = serde_yaml::from_str(indoc! {"
            apiVersion: install.istio.io/v1alpha1
            kind: IstioOperator
            metadata:
              name: mesh
              namespace: istio-system
            spec:
              tag: 1.25.5
              meshConfig:
                accessLogFile: /dev/stdout
              components:
                ingressGateways:
                  - name: istio-ingressgateway
                    enabled: true
              values:
                global:
                  istioNamespace: istio-system
            status:
              status: HEALTHY
        "})
        .expect("test YAML is valid");

        assert_eq!(iop.spec.version_tag(), Some("1.25.5"));
        assert_eq!(
            iop.status.map(|status| status.status),
            Some(InstallPhase::Healthy)
        );
        assert!(iop.spec.components.is_some());
        assert!(iop.spec.mesh_config.is_some());
    }

    #[test]
    fn phase_display_matches_wire_format() {
        assert_eq!(InstallPhase::Reconciling.to_string(), "RECONCILING");
        assert_eq!(
            serde_json::to_value(InstallPhase::ActionRequired).expect("phase serializes"),
            serde_json::json!("ACTION_REQUIRED")
        );
    }
}
