//! Annotation, label and finalizer keys shared by the two resource kinds.

use const_format::concatcp;

/// The mesh operator specific key prefix.
const MESH_OPERATOR_KEY_PREFIX: &str = "meshinstall.io/";

/// The annotation key `meshinstall.io/source-repo`. When set on an
/// `IstioOperator`, its value replaces the default chart repository URL of the
/// derived `HelmApp`.
pub const SOURCE_REPO_ANNOTATION_KEY: &str = concatcp!(MESH_OPERATOR_KEY_PREFIX, "source-repo");

/// The label key `meshinstall.io/managed-by`. A `HelmApp` carrying this label
/// with [`MANAGED_LABEL_VALUE`] is owned by the operator and may be overwritten
/// or deleted by it.
pub const MANAGED_LABEL_KEY: &str = concatcp!(MESH_OPERATOR_KEY_PREFIX, "managed-by");

/// The value of [`MANAGED_LABEL_KEY`] written by this operator.
pub const MANAGED_LABEL_VALUE: &str = "mesh-operator";

/// The label key `meshinstall.io/allow-force-upgrade`. Marks a `HelmApp` as
/// eligible for forced chart upgrades.
pub const ALLOW_FORCE_UPGRADE_LABEL_KEY: &str =
    concatcp!(MESH_OPERATOR_KEY_PREFIX, "allow-force-upgrade");

/// The label key `meshinstall.io/source-from-iop`. Points back to the name of
/// the `IstioOperator` a `HelmApp` was derived from.
pub const SOURCE_FROM_LABEL_KEY: &str = concatcp!(MESH_OPERATOR_KEY_PREFIX, "source-from-iop");

/// The finalizer added to every `IstioOperator` before its `HelmApp` is created.
pub const IOP_FINALIZER: &str = concatcp!(MESH_OPERATOR_KEY_PREFIX, "iop-finalizer");

/// Chart version used when the `IstioOperator` does not carry a tag.
pub const DEFAULT_CHART_VERSION: &str = "1.22.8";

/// Chart repository used when no [`SOURCE_REPO_ANNOTATION_KEY`] is present.
pub const DEFAULT_CHART_REPO_URL: &str = "https://istio-release.storage.googleapis.com/charts";

/// Name of the chart repository referenced by every derived `HelmApp`.
pub const DEFAULT_CHART_REPO_NAME: &str = "istio";

/// The chart shared by all ingress and egress gateways.
pub const GATEWAY_CHART_NAME: &str = "gateway";

/// The file name of a chart's values schema.
pub const VALUES_SCHEMA_FILE_NAME: &str = "values.schema.json";
