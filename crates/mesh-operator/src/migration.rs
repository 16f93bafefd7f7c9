//! The migration step expanding an `IstioOperator` into per-component value
//! trees.
//!
//! The migration itself is an external collaborator. [`Migrator`] is the seam
//! the converter calls, [`CommandMigrator`] implements it by running an
//! executable.

use std::{ffi::OsString, path::PathBuf, process::ExitStatus};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{ResultExt, Snafu, ensure};
use tokio::process::Command;
use tracing::debug;

use crate::component::Component;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Expands `IstioOperator` documents into their components.
///
/// Dropping the returned future cancels the migration. Implementations must
/// not leave work running past that point.
#[async_trait]
pub trait Migrator: Send + Sync {
    /// Migrates the documents stored at `source_paths`, in order.
    async fn migrate(
        &self,
        source_paths: &[PathBuf],
    ) -> Result<Vec<ComponentMigration>, BoxError>;
}

/// One component produced by the migration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentMigration {
    pub component: Component,

    #[serde(default)]
    pub component_spec: ComponentSpec,

    /// The complete migrated install document. Accessed with
    /// [`ValueExt`](crate::values::ValueExt), e.g. `spec.values.global`.
    #[serde(default)]
    pub values: Value,
}

/// The user-facing settings of a migrated component.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ComponentSpec {
    /// Name of the component instance, e.g. the gateway name.
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to run migrate command {program:?}"))]
    SpawnCommand {
        source: std::io::Error,
        program: OsString,
    },

    #[snafu(display("migrate command {program:?} exited with {status}: {stderr}"))]
    CommandFailed {
        program: OsString,
        status: ExitStatus,
        stderr: String,
    },

    #[snafu(display("failed to parse the migrate command output"))]
    ParseOutput { source: serde_json::Error },
}

/// Runs an external executable as the migration.
///
/// The executable receives the source paths as trailing arguments and must
/// print the migrated components as a JSON array to stdout. It is killed if
/// the migration is cancelled before it exits.
#[derive(Clone, Debug)]
pub struct CommandMigrator {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandMigrator {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Adds arguments passed before the source paths.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    async fn run(&self, source_paths: &[PathBuf]) -> Result<Vec<ComponentMigration>, Error> {
        debug!(program = ?self.program, ?source_paths, "running migrate command");

        let output = Command::new(&self.program)
            .args(&self.args)
            .args(source_paths)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|_| SpawnCommandSnafu {
                program: self.program.clone(),
            })?;

        ensure!(output.status.success(), CommandFailedSnafu {
            program: self.program.clone(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });

        serde_json::from_slice(&output.stdout).context(ParseOutputSnafu)
    }
}

#[async_trait]
impl Migrator for CommandMigrator {
    async fn migrate(
        &self,
        source_paths: &[PathBuf],
    ) -> Result<Vec<ComponentMigration>, BoxError> {
        Ok(self.run(source_paths).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use indoc::indoc;
    use tempfile::{NamedTempFile, TempDir};

    use super::*;
    use crate::values::ValueExt;

    const MIGRATED: &str = indoc! {r#"
        [
          {
            "component": {
              "specName": "ingressGateways",
              "releaseName": "istio-ingressgateway",
              "toHelmValuesTreeRoot": "gateways.istio-ingressgateway"
            },
            "componentSpec": {"name": "istio-ingressgateway"},
            "values": {"spec": {"values": {"global": {"hub": "docker.io/istio"}}}}
          }
        ]
    "#};

    #[test]
    fn parse_migrated_components() {
        let components: Vec<ComponentMigration> =
            serde_json::from_str(MIGRATED).expect("test JSON is valid");

        assert_eq!(components.len(), 1);
        assert!(components[0].component.is_ingress_gateway());
        assert_eq!(components[0].component_spec.name, "istio-ingressgateway");
        assert_eq!(
            components[0].values.get_path_string("spec.values.global.hub"),
            "docker.io/istio"
        );
    }

    #[tokio::test]
    async fn command_migrator_reads_stdout() {
        let mut output = NamedTempFile::new().expect("temp file is created");
        output
            .write_all(MIGRATED.as_bytes())
            .expect("temp file is written");

        let components = CommandMigrator::new("cat")
            .migrate(&[output.path().to_owned()])
            .await
            .expect("cat succeeds");
        assert_eq!(components[0].component.release_name, "istio-ingressgateway");
    }

    #[tokio::test]
    async fn command_migrator_reports_failure() {
        let error = CommandMigrator::new("sh")
            .with_args(["-c", "echo broken >&2; exit 3"])
            .run(&[])
            .await
            .expect_err("command fails");

        match error {
            Error::CommandFailed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn command_migrator_rejects_invalid_output() {
        let error = CommandMigrator::new("echo")
            .with_args(["not json"])
            .run(&[])
            .await
            .expect_err("output is not JSON");
        assert!(matches!(error, Error::ParseOutput { .. }));
    }

    #[tokio::test]
    async fn cancelled_command_is_killed() {
        let dir = TempDir::new().expect("temp dir is created");
        let marker = dir.path().join("migrated");
        let migrator = CommandMigrator::new("sh").with_args(["-c", "sleep 1; touch \"$0\""]);

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            migrator.migrate(&[marker.clone()]),
        )
        .await;
        assert!(result.is_err(), "migration is cancelled");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "command was killed before finishing");
    }
}
