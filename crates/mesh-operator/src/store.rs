//! Access to the backing store holding `IstioOperator`s and `HelmApp`s.
//!
//! The controller only talks to the cluster through [`Store`], so reconcile
//! logic can be exercised against an in-memory store.

use std::{fmt, future::Future};

use async_trait::async_trait;
use kube::{
    Api, Resource,
    api::{DeleteParams, Patch, PatchParams, PostParams},
    core::NamespaceResourceScope,
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::time::{Instant, timeout_at};

use crate::crd::{HelmApp, InstallStatus, IstioOperator};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("object has no namespace or name"))]
    MissingObjectKey,

    #[snafu(display("failed to get {kind} {key}"))]
    Get {
        source: kube::Error,
        kind: String,
        key: ObjectKey,
    },

    #[snafu(display("failed to create {kind} {key}"))]
    Create {
        source: kube::Error,
        kind: String,
        key: ObjectKey,
    },

    #[snafu(display("failed to update {kind} {key}"))]
    Update {
        source: kube::Error,
        kind: String,
        key: ObjectKey,
    },

    #[snafu(display("failed to update status of {kind} {key}"))]
    UpdateStatus {
        source: kube::Error,
        kind: String,
        key: ObjectKey,
    },

    #[snafu(display("failed to delete {kind} {key}"))]
    Delete {
        source: kube::Error,
        kind: String,
        key: ObjectKey,
    },

    #[snafu(display("deadline exceeded while trying to {operation}"))]
    DeadlineExceeded { operation: &'static str },
}

/// Namespace and name of a namespaced object.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns the key of `obj`, or [`None`] if its namespace or name is
    /// missing or empty.
    pub fn of<K: Resource>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        let namespace = meta.namespace.as_deref().filter(|ns| !ns.is_empty())?;
        let name = meta.name.as_deref().filter(|name| !name.is_empty())?;
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reads and writes the two resource kinds.
///
/// Reads of missing objects return `Ok(None)`, all other failures are errors.
/// Updates are rejected if the object changed since it was read.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_istio_operator(&self, key: &ObjectKey) -> Result<Option<IstioOperator>, Error>;

    /// Replaces metadata and spec of `iop`, returning the stored object.
    async fn update_istio_operator(&self, iop: &IstioOperator) -> Result<IstioOperator, Error>;

    async fn update_istio_operator_status(
        &self,
        key: &ObjectKey,
        status: &InstallStatus,
    ) -> Result<(), Error>;

    async fn get_helm_app(&self, key: &ObjectKey) -> Result<Option<HelmApp>, Error>;

    async fn create_helm_app(&self, app: &HelmApp) -> Result<HelmApp, Error>;

    async fn update_helm_app(&self, app: &HelmApp) -> Result<HelmApp, Error>;

    async fn delete_helm_app(&self, key: &ObjectKey) -> Result<(), Error>;
}

/// Runs a store call, aborting it once `deadline` has passed.
pub async fn with_deadline<T, F>(
    deadline: Instant,
    operation: &'static str,
    call: F,
) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match timeout_at(deadline, call).await {
        Ok(result) => result,
        Err(_) => DeadlineExceededSnafu { operation }.fail(),
    }
}

/// A [`Store`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
}

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, key: &ObjectKey) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + fmt::Debug,
    {
        self.api::<K>(&key.namespace)
            .get_opt(&key.name)
            .await
            .with_context(|_| GetSnafu {
                kind: K::kind(&()).into_owned(),
                key: key.clone(),
            })
    }

    async fn create<K>(&self, obj: &K) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + fmt::Debug,
    {
        let key = ObjectKey::of(obj).context(MissingObjectKeySnafu)?;
        self.api::<K>(&key.namespace)
            .create(&PostParams::default(), obj)
            .await
            .with_context(|_| CreateSnafu {
                kind: K::kind(&()).into_owned(),
                key: key.clone(),
            })
    }

    async fn replace<K>(&self, obj: &K) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + fmt::Debug,
    {
        let key = ObjectKey::of(obj).context(MissingObjectKeySnafu)?;
        self.api::<K>(&key.namespace)
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .with_context(|_| UpdateSnafu {
                kind: K::kind(&()).into_owned(),
                key: key.clone(),
            })
    }
}

#[async_trait]
impl Store for KubeStore {
    async fn get_istio_operator(&self, key: &ObjectKey) -> Result<Option<IstioOperator>, Error> {
        self.get(key).await
    }

    async fn update_istio_operator(&self, iop: &IstioOperator) -> Result<IstioOperator, Error> {
        self.replace(iop).await
    }

    async fn update_istio_operator_status(
        &self,
        key: &ObjectKey,
        status: &InstallStatus,
    ) -> Result<(), Error> {
        let patch = Patch::Merge(json!({ "status": status }));
        self.api::<IstioOperator>(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &patch)
            .await
            .with_context(|_| UpdateStatusSnafu {
                kind: IstioOperator::kind(&()).into_owned(),
                key: key.clone(),
            })?;
        Ok(())
    }

    async fn get_helm_app(&self, key: &ObjectKey) -> Result<Option<HelmApp>, Error> {
        self.get(key).await
    }

    async fn create_helm_app(&self, app: &HelmApp) -> Result<HelmApp, Error> {
        self.create(app).await
    }

    async fn update_helm_app(&self, app: &HelmApp) -> Result<HelmApp, Error> {
        self.replace(app).await
    }

    async fn delete_helm_app(&self, key: &ObjectKey) -> Result<(), Error> {
        self.api::<HelmApp>(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await
            .with_context(|_| DeleteSnafu {
                kind: HelmApp::kind(&()).into_owned(),
                key: key.clone(),
            })?;
        Ok(())
    }
}
