//! ap-client: Access-proxy client for apssh
//!
//! Drives the browser-based authentication handshake with the access
//! proxy, fetches and installs short-lived SSH certificates, and relays
//! the SSH byte stream between standard I/O and the target host.

pub mod auth;
pub mod browser;
pub mod credential;
pub mod error;
pub mod proxy;
pub mod tunnel;

#[cfg(test)]
mod test_support;

pub use auth::{AuthSession, AuthSettings, AuthState, Authenticator};
pub use browser::BrowserLauncher;
pub use credential::{CredentialManager, CredentialPaths, SshCredential};
pub use error::{AuthError, CredentialError, ProxyError};
pub use proxy::{ProxyClient, SessionStatus};
pub use tunnel::{RelayEnd, RelayStats};
