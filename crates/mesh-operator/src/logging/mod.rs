//! `tracing` setup and reporting of reconcile outcomes.

use std::{
    io::{Sink, sink},
    path::PathBuf,
};

use snafu::{ResultExt, Snafu};
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::{InitError, RollingFileAppender};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{
        MakeWriter,
        writer::{EitherWriter, MakeWriterExt as _},
    },
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

pub mod controller;
mod k8s_events;

pub use controller::{ReconcilerError, report_controller_reconciled};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to initialize rolling file appender in {}", directory.display()))]
    InitRollingFileAppender {
        source: InitError,
        directory: PathBuf,
    },

    #[snafu(display("failed to install the global tracing subscriber"))]
    InstallSubscriber { source: TryInitError },
}

/// Initializes `tracing` with the filter directives read from the environment
/// variable `env`, e.g. `MESH_OPERATOR_LOG=debug`. Without directives, the
/// maximum level is INFO.
///
/// Setting `{env}_DIRECTORY` to a directory additionally writes the log to
/// rotated files named after `app_name` in that directory.
pub fn initialize_logging(env: &str, app_name: &str) -> Result<(), Error> {
    let filter = EnvFilter::try_from_env(env)
        .unwrap_or_else(|_| EnvFilter::new(LevelFilter::INFO.to_string()));

    let directory = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    let file_appender = directory
        .as_deref()
        .map(|directory| {
            RollingFileAppender::builder()
                .filename_suffix(format!("{app_name}.log"))
                .max_log_files(6)
                .build(directory)
                .with_context(|_| InitRollingFileAppenderSnafu { directory })
        })
        .transpose()?;

    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout.and(OptionalMakeWriter::from(file_appender)));
    Registry::default()
        .with(filter)
        .with(fmt)
        .try_init()
        .context(InstallSubscriberSnafu)?;

    match directory {
        Some(directory) => tracing::info!(directory = %directory.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, no log directory set"),
    }
    Ok(())
}

/// A [`MakeWriter`] writing to `T` if present, and nowhere otherwise.
enum OptionalMakeWriter<T> {
    Some(T),
    None,
}

impl<T> From<Option<T>> for OptionalMakeWriter<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(writer) => Self::Some(writer),
            None => Self::None,
        }
    }
}

impl<'a, T> MakeWriter<'a> for OptionalMakeWriter<T>
where
    T: MakeWriter<'a>,
{
    type Writer = EitherWriter<T::Writer, Sink>;

    fn make_writer(&'a self) -> Self::Writer {
        match self {
            Self::Some(writer) => EitherWriter::A(writer.make_writer()),
            Self::None => EitherWriter::B(sink()),
        }
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        match self {
            Self::Some(writer) => EitherWriter::A(writer.make_writer_for(meta)),
            Self::None => EitherWriter::B(sink()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing::{debug, error, info};

    // Only checks that initialization succeeds, run with `--nocapture` to see
    // which levels are printed.
    #[test]
    fn default_level_is_info() {
        super::initialize_logging("MESH_OPERATOR_TEST_LOG_NOT_SET", "mesh-operator")
            .expect("logging is initialized");

        error!("ERROR level messages are printed");
        info!("INFO level messages are printed by default");
        debug!("DEBUG level messages are only printed if the filter asks for them");
    }
}
