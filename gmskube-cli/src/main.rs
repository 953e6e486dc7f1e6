//! `gmskube` - install and configure GMS instances on Kubernetes

use std::process::ExitCode;

use clap::Parser;
use gmskube_cli::commands::{self, Cli};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = cli.global.verbose;
    init_logging(verbose);

    match commands::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(kind) = e.downcast_ref::<gmskube_cli::Error>().map(gmskube_cli::Error::kind) {
                debug!("Failure kind: {kind:?}");
            }
            if verbose {
                error!("{e:?}");
            } else {
                error!("{e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}
