//! ap-core: Core abstractions and configuration for apssh
//!
//! This crate provides the configuration model, the on-disk token cache,
//! the `host:port:user` target type and the traits behind which the
//! external SSH tools (`ssh-keygen`, `ssh-add`) are driven.

pub mod config;
pub mod error;
pub mod secure_file;
pub mod target;
pub mod token;
pub mod tools;
pub mod traits;

pub use config::ClientConfig;
pub use error::{CacheError, ConfigError, ToolError};
pub use target::{CredentialType, TargetSpec};
pub use token::{CliToken, TokenPair, TokenStore};
