//! Command line and environment configuration.

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser};
use kube::{Api, Resource, core::NamespaceResourceScope};

use crate::{
    constants::{DEFAULT_CHART_REPO_URL, DEFAULT_CHART_VERSION},
    convert::ConverterConfig,
};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "MESH_OPERATOR_LOG";

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(
    name = "mesh-operator",
    author,
    version,
    about = "Reconciles IstioOperator mesh installs into HelmApp chart installs"
)]
pub struct Opts {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, Parser)]
pub enum Command {
    /// Print the CustomResourceDefinitions of IstioOperator and HelmApp.
    Crd,

    /// Run the operator.
    Run(RunArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct RunArguments {
    /// Namespace to watch, all namespaces if empty.
    #[arg(long, env, default_value = "")]
    pub watch_namespace: WatchNamespace,

    /// Executable migrating an IstioOperator document into its components.
    ///
    /// It is called with the paths of the documents and must print the
    /// components as JSON array.
    #[arg(long, env, value_name = "FILE")]
    pub migrate_command: PathBuf,

    /// Chart version installed for IstioOperators without a tag.
    #[arg(long, env, default_value = DEFAULT_CHART_VERSION)]
    pub default_chart_version: String,

    /// Chart repository used unless overridden by annotation.
    #[arg(long, env, default_value = DEFAULT_CHART_REPO_URL)]
    pub default_chart_repo: String,

    /// Upper bound for a single reconcile, in seconds.
    #[arg(long, env, default_value_t = 30, value_name = "SECONDS")]
    pub reconcile_timeout: u64,
}

impl RunArguments {
    pub fn converter_config(&self) -> ConverterConfig {
        ConverterConfig {
            default_chart_version: self.default_chart_version.clone(),
            default_chart_repo_url: self.default_chart_repo.clone(),
        }
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout)
    }
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum WatchNamespace {
    All,
    One(String),
}

impl From<&str> for WatchNamespace {
    fn from(namespace: &str) -> Self {
        if namespace.is_empty() {
            Self::All
        } else {
            Self::One(namespace.to_owned())
        }
    }
}

impl WatchNamespace {
    /// An [`Api`] for the watched namespace, or for all namespaces.
    pub fn get_api<K>(&self, client: &kube::Client) -> Api<K>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        match self {
            Self::All => Api::all(client.clone()),
            Self::One(namespace) => Api::namespaced(client.clone(), namespace),
        }
    }
}
