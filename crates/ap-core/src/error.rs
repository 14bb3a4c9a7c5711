//! Core error types for apssh

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Errors reading or writing the token cache file
#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache file could not be read or written
    #[error("Token cache I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cache file exists but does not hold a token pair
    #[error("Token cache {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The token pair could not be serialized
    #[error("Failed to serialize token cache: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Failures of the external SSH tools and helpers
#[derive(Error, Debug)]
pub enum ToolError {
    /// The program could not be started at all
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran but reported failure
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    /// The program output could not be understood
    #[error("Unexpected output from {program}: {reason}")]
    Parse { program: String, reason: String },
}
