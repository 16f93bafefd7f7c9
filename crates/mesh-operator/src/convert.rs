//! Conversion of an [`IstioOperator`] into the [`HelmApp`] installing it.
//!
//! The operator document is expanded into its components by the
//! [`Migrator`]. Every component becomes one [`HelmComponent`]: gateways are
//! installed with the shared gateway chart and get their values extracted from
//! the gateway overrides, all other components are installed with their own
//! chart and only carry their Kubernetes overrides.

use std::{collections::BTreeMap, io::Write, sync::Arc};

use k8s_openapi::api::{
    apps::v1::DeploymentStrategy,
    core::v1::{
        Affinity, EnvVar, PodSecurityContext, Probe, ResourceRequirements, ServiceSpec,
        Toleration, Volume, VolumeMount,
    },
};
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::warn;

use crate::{
    component::get_component,
    constants::{
        ALLOW_FORCE_UPGRADE_LABEL_KEY, DEFAULT_CHART_REPO_NAME, DEFAULT_CHART_REPO_URL,
        DEFAULT_CHART_VERSION, MANAGED_LABEL_KEY, MANAGED_LABEL_VALUE, SOURCE_FROM_LABEL_KEY,
        SOURCE_REPO_ANNOTATION_KEY,
    },
    crd::{HelmApp, HelmAppSpec, HelmComponent, HelmRepo, IstioOperator},
    migration::{BoxError, ComponentMigration, Migrator},
    store::ObjectKey,
    values::ValueExt,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("IstioOperator has no namespace or name"))]
    MissingObjectKey,

    #[snafu(display("failed to serialize IstioOperator {key} for migration"))]
    SerializeSource {
        source: serde_yaml::Error,
        key: ObjectKey,
    },

    #[snafu(display("failed to write IstioOperator {key} to a temporary file"))]
    WriteSourceFile {
        source: std::io::Error,
        key: ObjectKey,
    },

    #[snafu(display("failed to migrate IstioOperator {key}"))]
    Migrate { source: BoxError, key: ObjectKey },

    #[snafu(display("IstioOperator {key} does not yield any valid component"))]
    NoValidComponents { key: ObjectKey },
}

/// Defaults applied to every derived [`HelmApp`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConverterConfig {
    /// Chart version used if the `IstioOperator` has no tag.
    pub default_chart_version: String,

    /// Chart repository used if the `IstioOperator` is not annotated with
    /// [`SOURCE_REPO_ANNOTATION_KEY`].
    pub default_chart_repo_url: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            default_chart_version: DEFAULT_CHART_VERSION.to_owned(),
            default_chart_repo_url: DEFAULT_CHART_REPO_URL.to_owned(),
        }
    }
}

/// One entry of `spec.components.ingressGateways` or
/// `spec.components.egressGateways`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct GatewayComponentSpec {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default)]
    pub label: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub k8s: Option<KubernetesResources>,

    #[serde(default)]
    pub enabled: Option<Value>,

    #[serde(default)]
    pub hub: Option<String>,

    #[serde(default)]
    pub tag: Option<Value>,
}

/// The Kubernetes settings a component can override. Unknown keys are dropped.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVar>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hpa_spec: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_disruption_budget: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_annotations: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<DeploymentStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_annotations: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<Volume>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mounts: Option<Vec<VolumeMount>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlays: Option<Value>,
}

impl KubernetesResources {
    /// The overrides as chart values.
    fn to_values(&self) -> Result<Map<String, Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(values) => Ok(values),
            _ => Ok(Map::new()),
        }
    }

    /// The environment variables as a name to value map, as expected by the
    /// gateway chart.
    fn env_values(&self) -> Map<String, Value> {
        self.env
            .iter()
            .flatten()
            .map(|var| {
                (
                    var.name.clone(),
                    Value::String(var.value.clone().unwrap_or_default()),
                )
            })
            .collect()
    }
}

/// Converts [`IstioOperator`]s into [`HelmApp`]s.
#[derive(Clone)]
pub struct Converter {
    migrator: Arc<dyn Migrator>,
    config: ConverterConfig,
}

impl Converter {
    pub fn new(migrator: Arc<dyn Migrator>, config: ConverterConfig) -> Self {
        Self { migrator, config }
    }

    /// Derives the [`HelmApp`] installing `iop`.
    ///
    /// The result has the same namespace and name as `iop`. Components that
    /// cannot be converted are logged and skipped, but at least one valid
    /// component must remain.
    ///
    /// Dropping the returned future cancels the migration and removes its
    /// temporary source file.
    pub async fn convert(&self, iop: &IstioOperator) -> Result<HelmApp, Error> {
        let key = ObjectKey::of(iop).context(MissingObjectKeySnafu)?;
        let migrated = self.migrate(&key, iop).await?;

        let version = iop
            .spec
            .version_tag()
            .unwrap_or(self.config.default_chart_version.as_str());
        let mut conversion = Conversion::new(&key.name, version);
        for component in &migrated {
            conversion.push(component);
        }
        let Conversion {
            components,
            global_values,
            ..
        } = conversion;

        ensure!(!components.is_empty(), NoValidComponentsSnafu { key });

        let annotations = iop.metadata.annotations.as_ref();
        let repo_url = annotations
            .and_then(|annotations| annotations.get(SOURCE_REPO_ANNOTATION_KEY))
            .filter(|url| !url.is_empty())
            .unwrap_or(&self.config.default_chart_repo_url);

        Ok(HelmApp {
            metadata: ObjectMeta {
                namespace: Some(key.namespace.clone()),
                name: Some(key.name.clone()),
                labels: Some(derived_labels(iop, &key.name)),
                ..ObjectMeta::default()
            },
            spec: HelmAppSpec {
                components,
                global_values,
                repo: Some(HelmRepo {
                    name: DEFAULT_CHART_REPO_NAME.to_owned(),
                    url: repo_url.clone(),
                }),
            },
            status: None,
        })
    }

    /// Hands `iop` to the migrator as a YAML document in a temporary file,
    /// which is removed again once the migration returns or is cancelled.
    async fn migrate(
        &self,
        key: &ObjectKey,
        iop: &IstioOperator,
    ) -> Result<Vec<ComponentMigration>, Error> {
        let source = serde_yaml::to_string(iop).with_context(|_| SerializeSourceSnafu {
            key: key.clone(),
        })?;

        let source_file = tempfile::Builder::new()
            .prefix("iop-")
            .suffix(".yaml")
            .tempfile()
            .and_then(|mut file| {
                file.write_all(source.as_bytes())?;
                file.flush()?;
                Ok(file)
            })
            .with_context(|_| WriteSourceFileSnafu { key: key.clone() })?;

        self.migrator
            .migrate(&[source_file.path().to_owned()])
            .await
            .with_context(|_| MigrateSnafu { key: key.clone() })
    }
}

/// The labels of a derived [`HelmApp`]. An explicit
/// [`ALLOW_FORCE_UPGRADE_LABEL_KEY`] on the source wins over the default.
fn derived_labels(iop: &IstioOperator, name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        (MANAGED_LABEL_KEY.to_owned(), MANAGED_LABEL_VALUE.to_owned()),
        (ALLOW_FORCE_UPGRADE_LABEL_KEY.to_owned(), "true".to_owned()),
        (SOURCE_FROM_LABEL_KEY.to_owned(), name.to_owned()),
    ]);

    if let Some(force_upgrade) = iop
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(ALLOW_FORCE_UPGRADE_LABEL_KEY))
    {
        labels.insert(
            ALLOW_FORCE_UPGRADE_LABEL_KEY.to_owned(),
            force_upgrade.clone(),
        );
    }
    labels
}

/// State of a single conversion pass over the migrated components.
struct Conversion<'a> {
    iop_name: &'a str,
    version: &'a str,
    components: Vec<HelmComponent>,
    global_values: Option<Value>,

    /// Number of gateway overrides consumed so far, across ingress and egress
    /// gateways.
    gateway_index: usize,
}

impl<'a> Conversion<'a> {
    fn new(iop_name: &'a str, version: &'a str) -> Self {
        Self {
            iop_name,
            version,
            components: Vec::new(),
            global_values: None,
            gateway_index: 0,
        }
    }

    fn push(&mut self, migration: &ComponentMigration) {
        if self.global_values.is_none() {
            let values = migration
                .values
                .get_path_map("spec.values")
                .cloned()
                .unwrap_or_default();
            self.global_values = Some(Value::Object(values));
        }

        let component = if migration.component.is_gateway() {
            self.gateway_component(migration)
        } else {
            self.chart_component(migration)
        };

        match component {
            Some(component) if component.is_valid() => self.components.push(component),
            Some(component) => warn!(
                spec_name = %migration.component.spec_name,
                name = %component.name,
                chart = %component.chart,
                "skipping component without name or chart"
            ),
            None => {}
        }
    }

    fn gateway_component(&mut self, migration: &ComponentMigration) -> Option<HelmComponent> {
        let component = &migration.component;
        let mut values = Map::new();
        let mut labels = BTreeMap::new();

        let overrides_path = format!("spec.components.{}", component.spec_name);
        if let Some(overrides) = migration
            .values
            .get_path(&overrides_path)
            .filter(|overrides| !overrides.is_null())
        {
            let gateways: Vec<GatewayComponentSpec> =
                match serde_json::from_value(overrides.clone()) {
                    Ok(gateways) => gateways,
                    Err(error) => {
                        warn!(
                            error = &error as &dyn std::error::Error,
                            path = %overrides_path,
                            gateway = %migration.component_spec.name,
                            "skipping gateway with malformed overrides"
                        );
                        return None;
                    }
                };

            if let Some(gateway) = gateways.into_iter().nth(self.gateway_index) {
                self.gateway_index += 1;

                if let Some(k8s) = &gateway.k8s {
                    let k8s_values = override_values(&component.spec_name, k8s)?;
                    values.extend(k8s_values.into_iter().filter(|(key, _)| key != "env"));
                    values.insert("env".to_owned(), Value::Object(k8s.env_values()));
                }
                if let Some(label) = gateway.label {
                    labels = label;
                }
            }
        }

        values.insert(
            "autoscaling".to_owned(),
            autoscaling_values(migration, &component.to_helm_values_tree_root),
        );

        let (app, istio) = if component.is_egress_gateway() {
            ("istio-egressgateway", "egressgateway")
        } else {
            ("istio-ingressgateway", "ingressgateway")
        };
        labels
            .entry("app".to_owned())
            .or_insert_with(|| app.to_owned());
        labels
            .entry("istio".to_owned())
            .or_insert_with(|| istio.to_owned());
        values.insert(
            "labels".to_owned(),
            Value::Object(
                labels
                    .into_iter()
                    .map(|(key, value)| (key, Value::String(value)))
                    .collect(),
            ),
        );

        Some(HelmComponent {
            name: migration.component_spec.name.clone(),
            chart: component.chart_name().to_owned(),
            version: self.version.to_owned(),
            enable_schema_validation: true,
            component_values: Some(Value::Object(values)),
        })
    }

    fn chart_component(&self, migration: &ComponentMigration) -> Option<HelmComponent> {
        let component = &migration.component;
        let mut values = Map::new();

        let k8s_path = format!("spec.components.{}.k8s", component.spec_name);
        if let Some(k8s) = migration
            .values
            .get_path(&k8s_path)
            .filter(|k8s| !k8s.is_null())
        {
            let k8s: KubernetesResources = match serde_json::from_value(k8s.clone()) {
                Ok(k8s) => k8s,
                Err(error) => {
                    warn!(
                        error = &error as &dyn std::error::Error,
                        path = %k8s_path,
                        "skipping component with malformed Kubernetes overrides"
                    );
                    return None;
                }
            };

            let k8s_values = override_values(&component.spec_name, &k8s)?;
            match get_component(&component.spec_name).values_root_key {
                Some(root_key) => {
                    values.insert(root_key.to_owned(), Value::Object(k8s_values));
                }
                None => values.extend(k8s_values),
            }
        }

        let release_name = &component.release_name;
        let name = if release_name.is_empty() {
            String::new()
        } else {
            format!("iop-{}-{release_name}", self.iop_name)
        };

        Some(HelmComponent {
            name,
            chart: component.chart_name().to_owned(),
            version: self.version.to_owned(),
            enable_schema_validation: false,
            component_values: (!values.is_empty()).then_some(Value::Object(values)),
        })
    }
}

fn override_values(spec_name: &str, k8s: &KubernetesResources) -> Option<Map<String, Value>> {
    match k8s.to_values() {
        Ok(values) => Some(values),
        Err(error) => {
            warn!(
                error = &error as &dyn std::error::Error,
                spec_name,
                "skipping component with unserializable Kubernetes overrides"
            );
            None
        }
    }
}

/// The gateway chart's `autoscaling` values, taken from the legacy
/// `autoscaleEnabled` and `autoscaleMin` settings below `values_tree_root`.
fn autoscaling_values(migration: &ComponentMigration, values_tree_root: &str) -> Value {
    let mut autoscaling = Map::new();
    let enabled = migration
        .values
        .get_path_bool(&format!("spec.values.{values_tree_root}.autoscaleEnabled"));
    autoscaling.insert("enabled".to_owned(), Value::Bool(enabled));

    if enabled {
        let min_replicas = migration
            .values
            .get_path_string(&format!("spec.values.{values_tree_root}.autoscaleMin"));
        if !min_replicas.is_empty() {
            autoscaling.insert("minReplicas".to_owned(), Value::String(min_replicas));
        }
    }
    Value::Object(autoscaling)
}
