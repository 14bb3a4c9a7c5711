//! Configuration management for apssh

mod client;
pub mod serde_utils;

pub use client::ClientConfig;

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Directory name used under the platform config directory
const APP_DIR: &str = "apssh";

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Resolve the client configuration for this invocation
///
/// An explicit path must exist. The default path is optional: when it is
/// missing the built-in defaults are used. The result is normalized and
/// validated either way.
pub fn resolve_client_config(
    explicit: Option<&Path>,
    proxy_url_override: Option<&str>,
) -> Result<ClientConfig, ConfigError> {
    let mut config = match explicit {
        Some(path) => load_config::<ClientConfig>(path)?,
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                load_config::<ClientConfig>(&default_path)?
            } else {
                tracing::debug!("No config at {:?}, using defaults", default_path);
                ClientConfig::default()
            }
        }
    };

    if let Some(url) = proxy_url_override {
        config.proxy_url = url.to_string();
    }

    config.normalize();
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_explicit_missing_config_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let err = resolve_client_config(Some(&path), None).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_explicit_config_with_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "proxy_url = \"https://from-file.example/\"\n").unwrap();

        let config = resolve_client_config(Some(&path), None).unwrap();
        assert_eq!(config.proxy_url, "https://from-file.example");

        let config = resolve_client_config(Some(&path), Some("https://override.example//")).unwrap();
        assert_eq!(config.proxy_url, "https://override.example");
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "proxy_url = [").unwrap();
        let err = resolve_client_config(Some(&path), None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
