//! Error types for the access-proxy client

use std::time::Duration;

use ap_core::CacheError;
use thiserror::Error;

/// Errors talking to the access proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Transport-level failure
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    /// The configured proxy URL cannot be used
    #[error("Invalid proxy URL: {0}")]
    InvalidUrl(String),

    /// The response did not come from an authenticated session
    #[error("Not authenticated (status {0})")]
    NotAuthenticated(reqwest::StatusCode),

    /// The response body was not the expected JSON
    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors that end the authentication handshake
#[derive(Error, Debug)]
pub enum AuthError {
    /// The browser side was not completed in time
    #[error("Timed out after {waited:?} waiting for browser authentication")]
    Timeout { waited: Duration },

    /// Shutdown was requested while waiting
    #[error("Authentication cancelled")]
    Cancelled,

    /// No CLI token could be produced
    #[error("Token cache error: {0}")]
    Store(#[from] CacheError),

    /// The authorization URL could not be built
    #[error("{0}")]
    Proxy(#[from] ProxyError),
}

/// Errors fetching or installing an SSH credential
#[derive(Error, Debug)]
pub enum CredentialError {
    /// The issuance request failed
    #[error("Credential request failed: {0}")]
    Proxy(#[from] ProxyError),

    /// The issuance response lacks a required field
    #[error("Credential response is missing '{0}'")]
    MissingField(&'static str),

    /// Writing the key material failed
    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The certificate validity window could not be understood
    #[error("Unrecognized certificate validity '{0}'")]
    Validity(String),
}
