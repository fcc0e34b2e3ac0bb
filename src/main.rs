mod config;
mod endpoint;
mod process;
mod shutdown;
mod stopfile;
mod supervisor;

use clap::Parser;
use config::{Cli, Config};
use supervisor::Supervisor;

/// Exit status for a missing or empty configuration value (matches clap's usage errors).
const EXIT_CONFIG: i32 = 2;
/// Exit status when the child could not be launched.
const EXIT_LAUNCH: i32 = 3;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "sidecar_entrypoint=debug,tower_http=debug"
    } else {
        "sidecar_entrypoint=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let config = match Config::from_cli(&cli) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load configuration: {e}");
            std::process::exit(EXIT_CONFIG);
        }
    };
    tracing::debug!(?config, "resolved configuration");
    tracing::info!("sidecar-entrypoint starting up");

    let supervisor = Supervisor::new(config);

    match shutdown::SignalListener::install() {
        Ok(listener) => {
            tokio::spawn(listener.run(supervisor.shutdown_signal()));
        }
        Err(e) => tracing::error!(error = %e, "failed to install signal handlers"),
    }

    match supervisor.run().await {
        Ok(outcome) if outcome.child_exit.success() => {
            tracing::info!(reason = %outcome.reason, "sidecar-entrypoint exiting");
        }
        Ok(outcome) => {
            tracing::info!(
                reason = %outcome.reason,
                child_exit = %outcome.child_exit,
                "sidecar-entrypoint exiting, child did not exit cleanly"
            );
        }
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(EXIT_LAUNCH);
        }
    }
}
