//! The custom resources this operator reads and writes.
//!
//! [`IstioOperator`] is the high-level mesh install edited by users, [`HelmApp`]
//! is the chart-oriented install derived from it.

use std::io::Write;

use kube::CustomResourceExt;
use schemars::{Schema, SchemaGenerator, json_schema};
use snafu::{ResultExt, Snafu};

mod helm_app;
mod istio_operator;

pub use helm_app::*;
pub use istio_operator::*;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize CustomResourceDefinition {name}"))]
    SerializeCrd {
        source: serde_yaml::Error,
        name: String,
    },

    #[snafu(display("failed to write CustomResourceDefinitions"))]
    WriteCrds { source: std::io::Error },
}

/// Writes the CustomResourceDefinitions of [`IstioOperator`] and [`HelmApp`]
/// as explicit YAML documents, each starting with `---`.
pub fn write_crds<W: Write>(mut writer: W) -> Result<(), Error> {
    for crd in [IstioOperator::crd(), HelmApp::crd()] {
        let yaml = serde_yaml::to_string(&crd).with_context(|_| SerializeCrdSnafu {
            name: crd.metadata.name.clone().unwrap_or_default(),
        })?;
        writer
            .write_all(format!("---\n{yaml}").as_bytes())
            .context(WriteCrdsSnafu)?;
    }
    writer.flush().context(WriteCrdsSnafu)
}

/// Schema for free-form value trees, which Kubernetes must store verbatim.
pub fn raw_object_schema(_: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true,
    })
}

/// Schema for fields that may hold any JSON value (e.g. a tag given as a
/// string or a number).
pub fn raw_value_schema(_: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "x-kubernetes-preserve-unknown-fields": true,
    })
}
