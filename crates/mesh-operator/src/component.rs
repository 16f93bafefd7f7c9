//! Classification of mesh components by their spec name.
//!
//! The spec name is the key a component is configured under in an
//! `IstioOperator`, e.g. `spec.components.ingressGateways`.

use serde::{Deserialize, Serialize};

use crate::constants::GATEWAY_CHART_NAME;

pub const BASE_SPEC_NAME: &str = "base";
pub const PILOT_SPEC_NAME: &str = "pilot";
pub const INGRESS_GATEWAYS_SPEC_NAME: &str = "ingressGateways";
pub const EGRESS_GATEWAYS_SPEC_NAME: &str = "egressGateways";
pub const CNI_SPEC_NAME: &str = "cni";
pub const ISTIOD_REMOTE_SPEC_NAME: &str = "istiodRemote";
pub const ZTUNNEL_SPEC_NAME: &str = "ztunnel";

/// The structural identity of a component, as reported by the migration.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub spec_name: String,
    pub release_name: String,

    /// Root key of the component's settings in the legacy values layout,
    /// e.g. `gateways.istio-ingressgateway`.
    #[serde(default)]
    pub to_helm_values_tree_root: String,
}

impl Component {
    pub fn is_ingress_gateway(&self) -> bool {
        is_ingress_gateway(&self.spec_name)
    }

    pub fn is_egress_gateway(&self) -> bool {
        is_egress_gateway(&self.spec_name)
    }

    pub fn is_gateway(&self) -> bool {
        is_gateway(&self.spec_name)
    }

    /// The chart installing this component. Unknown components are installed
    /// with the chart named after their release.
    pub fn chart_name(&self) -> &str {
        let known = get_component(&self.spec_name);
        if known.is_known() {
            known.chart_name
        } else {
            &self.release_name
        }
    }
}

pub fn is_ingress_gateway(spec_name: &str) -> bool {
    spec_name == INGRESS_GATEWAYS_SPEC_NAME
}

pub fn is_egress_gateway(spec_name: &str) -> bool {
    spec_name == EGRESS_GATEWAYS_SPEC_NAME
}

pub fn is_gateway(spec_name: &str) -> bool {
    is_ingress_gateway(spec_name) || is_egress_gateway(spec_name)
}

/// Describes how a known component is installed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MeshComponent {
    pub spec_name: &'static str,
    pub release_name: &'static str,
    pub values_tree_root: &'static str,

    /// The chart installing this component. All gateways share one chart.
    pub chart_name: &'static str,

    /// Key under which the component's Kubernetes overrides are nested, for
    /// charts that still expect the legacy values layout.
    pub values_root_key: Option<&'static str>,
}

impl MeshComponent {
    /// The zero descriptor, returned for unknown spec names.
    pub fn is_known(&self) -> bool {
        !self.spec_name.is_empty()
    }
}

/// (spec name, release name, values tree root) of every component the
/// migration can produce.
const KNOWN_COMPONENTS: [(&str, &str, &str); 7] = [
    (BASE_SPEC_NAME, "base", "global"),
    (PILOT_SPEC_NAME, "istiod", "pilot"),
    (
        INGRESS_GATEWAYS_SPEC_NAME,
        "istio-ingressgateway",
        "gateways.istio-ingressgateway",
    ),
    (
        EGRESS_GATEWAYS_SPEC_NAME,
        "istio-egressgateway",
        "gateways.istio-egressgateway",
    ),
    (CNI_SPEC_NAME, "istio-cni", "cni"),
    (ISTIOD_REMOTE_SPEC_NAME, "istiod-remote", "istiodRemote"),
    (ZTUNNEL_SPEC_NAME, "ztunnel", "ztunnel"),
];

/// Looks up the descriptor of the component configured under `spec_name`.
///
/// Unknown spec names yield [`MeshComponent::default`], which callers treat as
/// "no special handling".
pub fn get_component(spec_name: &str) -> MeshComponent {
    let Some(&(spec_name, release_name, values_tree_root)) = KNOWN_COMPONENTS
        .iter()
        .find(|(known, ..)| *known == spec_name)
    else {
        return MeshComponent::default();
    };

    let chart_name = if is_gateway(spec_name) {
        GATEWAY_CHART_NAME
    } else {
        release_name
    };
    let values_root_key = match spec_name {
        PILOT_SPEC_NAME | CNI_SPEC_NAME => Some(values_tree_root),
        _ => None,
    };

    MeshComponent {
        spec_name,
        release_name,
        values_tree_root,
        chart_name,
        values_root_key,
    }
}
