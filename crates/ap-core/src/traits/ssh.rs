//! Seams to the local OpenSSH tooling

use std::path::Path;
use std::time::Duration;

use crate::error::ToolError;

/// Reads the validity window of an on-disk SSH certificate
pub trait CertificateInspector {
    /// Return the certificate's validity window as printed by the tool,
    /// e.g. `from 2024-05-01T10:00:00 to 2024-05-01T10:15:00`
    fn validity_window(&self, certificate: &Path) -> Result<String, ToolError>;
}

/// Loads and unloads identities in the local SSH agent
pub trait SshAgent {
    /// Remove the identity for `key` (the key may not be loaded)
    fn remove_identity(&self, key: &Path) -> Result<(), ToolError>;

    /// Add `key` to the agent, expiring after `lifetime`
    fn add_identity(&self, key: &Path, lifetime: Duration) -> Result<(), ToolError>;
}
