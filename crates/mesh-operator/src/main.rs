use std::sync::Arc;

use clap::Parser;
use mesh_operator::{
    cli::{Command, LOG_ENV, Opts, RunArguments},
    controller::{self, Context},
    convert::Converter,
    crd, logging,
    migration::CommandMigrator,
    store::KubeStore,
};
use snafu::{ResultExt, Snafu};

const APP_NAME: &str = "mesh-operator";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to print CustomResourceDefinitions"))]
    PrintCrds { source: crd::Error },

    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to create Kubernetes client"))]
    CreateClient { source: kube::Error },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();
    match opts.command {
        Command::Crd => crd::write_crds(std::io::stdout().lock()).context(PrintCrdsSnafu),
        Command::Run(run) => run_operator(run).await,
    }
}

async fn run_operator(run: RunArguments) -> Result<(), Error> {
    logging::initialize_logging(LOG_ENV, APP_NAME).context(InitializeLoggingSnafu)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        watch_namespace = ?run.watch_namespace,
        migrate_command = %run.migrate_command.display(),
        "starting {APP_NAME}"
    );

    let client = kube::Client::try_default()
        .await
        .context(CreateClientSnafu)?;
    let ctx = Context {
        store: Arc::new(KubeStore::new(client.clone())),
        converter: Converter::new(
            Arc::new(CommandMigrator::new(&run.migrate_command)),
            run.converter_config(),
        ),
        reconcile_timeout: run.reconcile_timeout(),
    };

    controller::run(client, &run.watch_namespace, ctx).await;
    Ok(())
}
