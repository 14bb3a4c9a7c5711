//! apssh
//!
//! SSH `ProxyCommand` that authenticates through an access proxy in the
//! browser, installs the short-lived certificate it issues into the SSH
//! agent and then carries the SSH connection over stdin/stdout:
//!
//! ```text
//! Host *.internal
//!     ProxyCommand apssh %h:%p:%r
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ap_core::config::resolve_client_config;
use ap_core::{CredentialType, TargetSpec};
use apssh::commands::{self, EXIT_FAILURE};
use apssh::output::print_error;

#[derive(Parser)]
#[command(name = "apssh")]
#[command(author, version, about = "SSH ProxyCommand with access-proxy issued certificates")]
struct Cli {
    /// Destination as substituted by ssh, e.g. `apssh %h:%p:%r`
    #[arg(value_name = "HOST:PORT:USER")]
    target: TargetSpec,

    /// Credential type to request
    #[arg(short = 't', long = "type", default_value_t = CredentialType::Ssh)]
    kind: CredentialType,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Access proxy URL (overrides config)
    #[arg(long, env = "APSSH_PROXY_URL")]
    proxy_url: Option<String>,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

/// Install the stderr logger for the lifetime of the returned guard
fn init_logging(verbose: u8, quiet: bool) -> DefaultGuard {
    let log_level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .set_default()
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, shutting down");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, shutting down");
            }
        }

        cancel.cancel();
    });
}

async fn run(cli: Cli) -> u8 {
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let config = match resolve_client_config(cli.config.as_deref(), cli.proxy_url.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            print_error(&format!("Invalid configuration: {}", e));
            return EXIT_FAILURE;
        }
    };

    commands::connect(&config, &cli.target, cli.kind, cancel).await
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(EXIT_FAILURE),
            };
        }
    };

    let _log_guard = init_logging(cli.verbose, cli.quiet);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            print_error(&format!("Failed to start runtime: {}", e));
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let code = runtime.block_on(run(cli));

    // The stdin reader may still be parked in a blocking read
    runtime.shutdown_background();
    ExitCode::from(code)
}
