//! Browser-interactive authentication against the access proxy
//!
//! The CLI cannot log in by itself. It mints a random CLI token, sends the
//! user's browser to the proxy with that token in the URL, and polls the
//! proxy until the browser side has bound the token to a proxy session.
//!
//! ```text
//! NoCliToken -> CliTokenValid -> OpenAuthPrompt -> Polling -> Authenticated
//!                      \                                 \-> Timeout
//!                       \-> Authenticated (cached session still accepted)
//! ```

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use reqwest::Url;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ap_core::{ClientConfig, CliToken, CredentialType, TargetSpec, TokenStore};

use crate::browser::BrowserLauncher;
use crate::error::AuthError;
use crate::proxy::{ProxyClient, SessionStatus};

/// Stages of one authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NoCliToken,
    CliTokenValid,
    OpenAuthPrompt,
    Polling,
    Authenticated,
    Timeout,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthState::NoCliToken => "no-cli-token",
            AuthState::CliTokenValid => "cli-token-valid",
            AuthState::OpenAuthPrompt => "open-auth-prompt",
            AuthState::Polling => "polling",
            AuthState::Authenticated => "authenticated",
            AuthState::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Timing and token parameters for the handshake
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Delay between session status polls
    pub poll_interval: Duration,
    /// Total time allowed for the browser side to complete
    pub timeout: Duration,
    /// Length of newly minted CLI tokens
    pub token_length: usize,
    /// Lifetime of newly minted CLI tokens
    pub token_lifetime: Duration,
}

impl From<&ClientConfig> for AuthSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            timeout: config.auth_timeout,
            token_length: config.cli_token_length,
            token_lifetime: config.cli_token_lifetime,
        }
    }
}

/// Tokens proving an authenticated access-proxy session
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub cli_token: String,
    pub ap_session: String,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("cli_token", &"<redacted>")
            .field("ap_session", &"<redacted>")
            .finish()
    }
}

type PromptFn = Box<dyn Fn(&Url) + Send + Sync>;

/// Drives the authentication state machine
pub struct Authenticator {
    proxy: ProxyClient,
    settings: AuthSettings,
    browser: BrowserLauncher,
    cancel: CancellationToken,
    prompt: Option<PromptFn>,
}

impl Authenticator {
    pub fn new(
        proxy: ProxyClient,
        settings: AuthSettings,
        browser: BrowserLauncher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            proxy,
            settings,
            browser,
            cancel,
            prompt: None,
        }
    }

    /// Show the authorization URL to the user before the browser opens
    pub fn with_prompt(mut self, prompt: impl Fn(&Url) + Send + Sync + 'static) -> Self {
        self.prompt = Some(Box::new(prompt));
        self
    }

    pub fn proxy(&self) -> &ProxyClient {
        &self.proxy
    }

    fn transition(state: &mut AuthState, next: AuthState) {
        debug!(from = %state, to = %next, "Auth state transition");
        *state = next;
    }

    /// Produce an authenticated session, prompting the user if needed
    ///
    /// A cached session that the proxy still accepts is reused without
    /// opening a browser. A new session is persisted to `store` before
    /// this returns.
    pub async fn authenticate(
        &self,
        store: &mut TokenStore,
        target: &TargetSpec,
        kind: CredentialType,
    ) -> Result<AuthSession, AuthError> {
        let mut state = AuthState::NoCliToken;

        let cli_token = self.cli_token(store)?;
        Self::transition(&mut state, AuthState::CliTokenValid);

        if let Some(session) = store.ap_session().map(str::to_string) {
            let accepted = tokio::select! {
                _ = self.cancel.cancelled() => return Err(AuthError::Cancelled),
                accepted = self.proxy.is_authenticated(Some(&session)) => accepted,
            };
            if accepted {
                Self::transition(&mut state, AuthState::Authenticated);
                info!("Reusing existing access-proxy session");
                return Ok(AuthSession {
                    cli_token: cli_token.value,
                    ap_session: session,
                });
            }
            debug!("Cached access-proxy session was not accepted");
        }

        Self::transition(&mut state, AuthState::OpenAuthPrompt);
        let url = self.proxy.authorize_url(target, kind, &cli_token.value)?;
        if let Some(prompt) = &self.prompt {
            prompt(&url);
        }
        self.browser.open(url.as_str());

        Self::transition(&mut state, AuthState::Polling);
        match self.poll_session(&cli_token).await {
            Ok(session) => {
                Self::transition(&mut state, AuthState::Authenticated);
                if let Err(e) = store.set_ap_session(session.clone()) {
                    warn!("Failed to cache access-proxy session: {}", e);
                }
                info!("Authenticated with the access proxy");
                Ok(AuthSession {
                    cli_token: cli_token.value,
                    ap_session: session,
                })
            }
            Err(AuthError::Timeout { waited }) => {
                Self::transition(&mut state, AuthState::Timeout);
                Err(AuthError::Timeout { waited })
            }
            Err(e) => Err(e),
        }
    }

    /// Reuse or mint the CLI token
    ///
    /// A token that cannot be saved is still usable for this invocation.
    fn cli_token(&self, store: &mut TokenStore) -> Result<CliToken, AuthError> {
        match store.ensure_cli_token(
            self.settings.token_length,
            self.settings.token_lifetime,
            self.settings.timeout,
            Utc::now(),
        ) {
            Ok(token) => Ok(token),
            Err(e) => match store.cli_token() {
                Some(token) => {
                    warn!("Failed to cache CLI token: {}", e);
                    Ok(token.clone())
                }
                None => Err(e.into()),
            },
        }
    }

    /// Poll until the proxy binds the CLI token, the deadline passes or
    /// the operation is cancelled
    async fn poll_session(&self, cli_token: &CliToken) -> Result<String, AuthError> {
        let started = Instant::now();
        let deadline = started + self.settings.timeout;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let poll = timeout_at(deadline, self.proxy.session_status(&cli_token.value));

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(AuthError::Cancelled),
                outcome = poll => outcome,
            };

            match outcome {
                Ok(Ok(SessionStatus::Authenticated(session))) => {
                    debug!(attempts, "Session authenticated");
                    return Ok(session);
                }
                Ok(Ok(SessionStatus::Pending)) => {}
                Ok(Err(e)) => debug!(attempts, "Session poll failed: {}", e),
                Err(_) => break,
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let wake = std::cmp::min(now + self.settings.poll_interval, deadline);
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(AuthError::Cancelled),
                _ = sleep_until(wake) => {}
            }
        }

        warn!(attempts, "Gave up waiting for browser authentication");
        Err(AuthError::Timeout {
            waited: started.elapsed(),
        })
    }
}
