//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;

/// Default CLI token length in characters
pub const DEFAULT_CLI_TOKEN_LENGTH: usize = 48;

/// Default CLI token lifetime (30 days)
pub const DEFAULT_CLI_TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Configuration for the access-proxy client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the access proxy (e.g. `https://proxy.example.com`)
    pub proxy_url: String,

    /// Path of the SSH private key; the public key and certificate live
    /// next to it as `<key>.pub` and `<key>-cert.pub`
    pub ssh_key_path: PathBuf,

    /// Path of the CLI/session token cache file
    pub token_cache_path: PathBuf,

    /// Name of the access-proxy session cookie
    pub session_cookie: String,

    /// Delay between session status polls
    #[serde(rename = "poll_interval_ms", with = "duration_millis")]
    pub poll_interval: Duration,

    /// Total time allowed for browser authentication
    #[serde(with = "duration_secs")]
    pub auth_timeout: Duration,

    /// Timeout for a single HTTP request
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Timeout for opening the TCP connection to the SSH host
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Length of generated CLI tokens
    pub cli_token_length: usize,

    /// How long a generated CLI token stays valid
    #[serde(with = "duration_secs")]
    pub cli_token_lifetime: Duration,

    /// Program used to open the authorization URL (platform opener if unset)
    pub browser_command: Option<String>,

    /// `ssh-keygen` program
    pub ssh_keygen: String,

    /// `ssh-add` program
    pub ssh_add: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let config_dir = super::default_config_dir();

        Self {
            proxy_url: String::new(),
            ssh_key_path: dirs::home_dir()
                .unwrap_or_default()
                .join(".ssh")
                .join("apssh_key"),
            token_cache_path: config_dir.join("session.json"),
            session_cookie: "session".to_string(),
            poll_interval: Duration::from_secs(1),
            auth_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            cli_token_length: DEFAULT_CLI_TOKEN_LENGTH,
            cli_token_lifetime: DEFAULT_CLI_TOKEN_LIFETIME,
            browser_command: None,
            ssh_keygen: "ssh-keygen".to_string(),
            ssh_add: "ssh-add".to_string(),
        }
    }
}

impl ClientConfig {
    /// Strip trailing slashes from the proxy URL
    pub fn normalize(&mut self) {
        let trimmed = self.proxy_url.trim().trim_end_matches('/').to_string();
        self.proxy_url = trimmed;
    }

    /// Check that the configuration can drive a session
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy_url.is_empty() {
            return Err(ConfigError::MissingField("proxy_url".to_string()));
        }
        if self.cli_token_length == 0 {
            return Err(ConfigError::Invalid(
                "cli_token_length must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.auth_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "auth_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the SSH private key
    pub fn private_key_path(&self) -> &Path {
        &self.ssh_key_path
    }

    /// Path of the SSH public key (`<key>.pub`)
    pub fn public_key_path(&self) -> PathBuf {
        sibling_with_suffix(&self.ssh_key_path, ".pub")
    }

    /// Path of the SSH certificate (`<key>-cert.pub`)
    pub fn certificate_path(&self) -> PathBuf {
        sibling_with_suffix(&self.ssh_key_path, "-cert.pub")
    }
}

/// Append a suffix to the final path component
fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
