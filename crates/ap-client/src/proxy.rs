//! HTTP client for the access-proxy API
//!
//! Endpoints consumed:
//! - `GET /api/ping` (session cookie) → `{"PONG": true}` for a live session
//! - `GET /api/session?cli_token=..` → 202 while pending, 200 with
//!   `{"cli_token_authenticated": true, "ap_session": ".."}` once done
//! - `GET /api/ssh?cli_token=..` (session cookie) → key material
//!
//! The browser is sent to `{proxy_url}?type=..&host=..&user=..&port=..&cli_token=..`.

use reqwest::header::COOKIE;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, trace};

use ap_core::{ClientConfig, CredentialType, TargetSpec};

use crate::error::ProxyError;

#[derive(Debug, Deserialize)]
struct PingResponse {
    #[serde(rename = "PONG", default)]
    pong: bool,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(default)]
    cli_token_authenticated: bool,
    #[serde(default)]
    ap_session: Option<String>,
}

/// Key material returned by the issuance endpoint
///
/// Every field is optional on the wire; completeness is checked by the
/// credential manager.
#[derive(Deserialize, Default)]
pub struct CredentialResponse {
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub certificate: Option<String>,
}

impl std::fmt::Debug for CredentialResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResponse")
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("public_key", &self.public_key.is_some())
            .field("certificate", &self.certificate.is_some())
            .finish()
    }
}

/// Result of one session status poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// The browser side has not completed yet
    Pending,
    /// The CLI token is bound to this access-proxy session
    Authenticated(String),
}

/// Decode a response body, but only if it came from an authenticated session
///
/// The proxy answers unauthenticated API calls with a redirect or error
/// page, so anything other than a 200 carrying the expected JSON means
/// the session is not accepted.
pub fn authenticated_json<T: DeserializeOwned>(
    status: StatusCode,
    body: &[u8],
) -> Result<T, ProxyError> {
    if status != StatusCode::OK {
        return Err(ProxyError::NotAuthenticated(status));
    }
    Ok(serde_json::from_slice(body)?)
}

/// Client for the access-proxy HTTP API
///
/// Clone is cheap - reqwest::Client uses Arc internally.
#[derive(Clone)]
pub struct ProxyClient {
    client: Client,
    base_url: String,
    session_cookie: String,
}

impl ProxyClient {
    /// Create a client from configuration
    pub fn new(config: &ClientConfig) -> Result<Self, ProxyError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.proxy_url.trim_end_matches('/').to_string(),
            session_cookie: config.session_cookie.clone(),
        })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/api/{}", self.base_url, endpoint)
    }

    fn cookie(&self, session: &str) -> String {
        format!("{}={}", self.session_cookie, session)
    }

    /// URL the user opens in a browser to bind `cli_token` to a session
    pub fn authorize_url(
        &self,
        target: &TargetSpec,
        kind: CredentialType,
        cli_token: &str,
    ) -> Result<Url, ProxyError> {
        let port = target.port.to_string();
        Url::parse_with_params(
            &self.base_url,
            &[
                ("type", kind.as_str()),
                ("host", target.host.as_str()),
                ("user", target.user.as_str()),
                ("port", port.as_str()),
                ("cli_token", cli_token),
            ],
        )
        .map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", self.base_url, e)))
    }

    /// Check whether the proxy currently accepts `session`
    ///
    /// Never fails: transport errors, non-200 responses and bodies
    /// without the pong marker all mean "not authenticated".
    pub async fn is_authenticated(&self, session: Option<&str>) -> bool {
        let Some(session) = session else {
            return false;
        };

        let response = match self
            .client
            .get(self.api_url("ping"))
            .header(COOKIE, self.cookie(session))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!("Ping request failed: {}", e);
                return false;
            }
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                debug!("Failed to read ping response: {}", e);
                return false;
            }
        };

        match authenticated_json::<PingResponse>(status, &body) {
            Ok(ping) => ping.pong,
            Err(e) => {
                debug!("Session not accepted: {}", e);
                false
            }
        }
    }

    /// Poll the proxy for the outcome of the browser handshake
    ///
    /// Anything other than a 200 confirming the CLI token is `Pending`;
    /// only transport failures are errors.
    pub async fn session_status(&self, cli_token: &str) -> Result<SessionStatus, ProxyError> {
        let response = self
            .client
            .get(self.api_url("session"))
            .query(&[("cli_token", cli_token)])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            trace!("Session still pending");
            return Ok(SessionStatus::Pending);
        }
        if status != StatusCode::OK {
            debug!(status = %status, "Unexpected session status response");
            return Ok(SessionStatus::Pending);
        }

        let body = response.bytes().await?;
        let session: SessionResponse = match serde_json::from_slice(&body) {
            Ok(session) => session,
            Err(e) => {
                debug!("Undecodable session response: {}", e);
                return Ok(SessionStatus::Pending);
            }
        };
        match session.ap_session {
            Some(value) if session.cli_token_authenticated && !value.is_empty() => {
                Ok(SessionStatus::Authenticated(value))
            }
            _ => {
                debug!("Session response does not confirm the CLI token yet");
                Ok(SessionStatus::Pending)
            }
        }
    }

    /// Request SSH key material for an authenticated session
    ///
    /// The response body is not zeroed after decoding.
    pub async fn fetch_ssh_credential(
        &self,
        cli_token: &str,
        session: &str,
    ) -> Result<CredentialResponse, ProxyError> {
        let response = self
            .client
            .get(self.api_url("ssh"))
            .query(&[("cli_token", cli_token)])
            .header(COOKIE, self.cookie(session))
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        authenticated_json(status, &body)
    }
}
