//! The ProxyCommand pipeline
//!
//! Load a cached certificate, or authenticate and fetch a new one, then
//! relay stdin/stdout to the SSH server. The credential is on disk and in
//! the agent before the tunnel opens.

use anyhow::{Context, Result};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ap_client::tunnel::run_tunnel;
use ap_client::{
    AuthError, AuthSettings, Authenticator, BrowserLauncher, CredentialManager, ProxyClient,
    RelayStats,
};
use ap_core::{ClientConfig, CredentialType, TargetSpec, TokenStore};

use super::{EXIT_AUTH_TIMEOUT, EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_OK};
use crate::output::{print_error, print_info, print_success};

/// Reasons the pipeline stops before or during the tunnel
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Credential type '{0}' is not supported by this client")]
    UnsupportedCredentialType(CredentialType),

    #[error("Access denied: no valid SSH credential for {0}")]
    AccessDenied(String),

    #[error("Interrupted")]
    Interrupted,
}

/// Map a pipeline failure to the process exit status
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<AuthError>() {
        Some(AuthError::Timeout { .. }) => return EXIT_AUTH_TIMEOUT,
        Some(AuthError::Cancelled) => return EXIT_INTERRUPTED,
        _ => {}
    }
    match err.downcast_ref::<ConnectError>() {
        Some(ConnectError::Interrupted) => EXIT_INTERRUPTED,
        _ => EXIT_FAILURE,
    }
}

/// Make sure a valid credential is loaded, fetching one if needed
async fn ensure_credential(
    config: &ClientConfig,
    target: &TargetSpec,
    kind: CredentialType,
    cancel: &CancellationToken,
) -> Result<()> {
    let manager = CredentialManager::from_config(config);
    if manager.load_credentials() {
        debug!("Using cached SSH credential");
        return Ok(());
    }

    let mut store = TokenStore::load(&config.token_cache_path);
    let proxy = ProxyClient::new(config).context("Failed to create access-proxy client")?;
    let auth = Authenticator::new(
        proxy,
        AuthSettings::from(config),
        BrowserLauncher::new(config.browser_command.clone()),
        cancel.clone(),
    )
    .with_prompt(|url| {
        print_info(&format!("Authenticate in your browser: {}", url));
    });

    let issued = manager
        .request_new_credentials(&auth, &mut store, target, kind)
        .await?;

    if !issued || !manager.load_credentials() {
        return Err(ConnectError::AccessDenied(target.to_string()).into());
    }

    print_success(&format!("SSH credential loaded for {}", target));
    Ok(())
}

async fn run(
    config: &ClientConfig,
    target: &TargetSpec,
    kind: CredentialType,
    cancel: &CancellationToken,
) -> Result<RelayStats> {
    if kind != CredentialType::Ssh {
        return Err(ConnectError::UnsupportedCredentialType(kind).into());
    }

    ensure_credential(config, target, kind, cancel).await?;

    tokio::select! {
        _ = cancel.cancelled() => Err(ConnectError::Interrupted.into()),
        stats = run_tunnel(target, config.connect_timeout) => {
            stats.with_context(|| format!("Failed to connect to {}", target.address()))
        }
    }
}

/// Run the pipeline and report the outcome; returns the exit status
pub async fn connect(
    config: &ClientConfig,
    target: &TargetSpec,
    kind: CredentialType,
    cancel: CancellationToken,
) -> u8 {
    match run(config, target, kind, &cancel).await {
        Ok(stats) => {
            info!(ended_by = %stats.ended_by, "Session finished");
            EXIT_OK
        }
        Err(e) => {
            let code = exit_code(&e);
            match code {
                EXIT_AUTH_TIMEOUT => {
                    print_error(&format!("{}", e));
                    print_info(&format!(
                        "Open {} in your browser, log in, then run ssh again",
                        config.proxy_url
                    ));
                }
                EXIT_INTERRUPTED => debug!("Interrupted"),
                _ => print_error(&format!("{:#}", e)),
            }
            code
        }
    }
}
