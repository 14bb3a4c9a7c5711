//! Process-backed implementations of the SSH tool traits
//!
//! `ssh-keygen -L` prints the certificate metadata we need and `ssh-add`
//! talks to whatever agent `SSH_AUTH_SOCK` points at, so both are driven
//! as external programs.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use crate::error::ToolError;
use crate::traits::{CertificateInspector, SshAgent};

/// Prefix of the validity line in `ssh-keygen -L` output
const VALID_PREFIX: &str = "Valid:";

/// Run a program to completion, capturing its output
fn run(program: &str, args: &[&OsStr]) -> Result<Output, ToolError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| ToolError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(ToolError::Failed {
            program: program.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

/// Extract the validity window from `ssh-keygen -L` output
pub fn extract_validity_line(listing: &str) -> Option<&str> {
    listing
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(VALID_PREFIX))
        .map(str::trim)
}

/// `ssh-keygen` as a certificate inspector
#[derive(Debug, Clone)]
pub struct SshKeygen {
    program: String,
}

impl SshKeygen {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SshKeygen {
    fn default() -> Self {
        Self::new("ssh-keygen")
    }
}

impl CertificateInspector for SshKeygen {
    fn validity_window(&self, certificate: &Path) -> Result<String, ToolError> {
        let output = run(
            &self.program,
            &[OsStr::new("-L"), OsStr::new("-f"), certificate.as_os_str()],
        )?;
        let listing = String::from_utf8_lossy(&output.stdout);

        extract_validity_line(&listing)
            .map(str::to_string)
            .ok_or_else(|| ToolError::Parse {
                program: self.program.clone(),
                reason: format!("no '{}' line in certificate listing", VALID_PREFIX),
            })
    }
}

/// `ssh-add` as the agent client
#[derive(Debug, Clone)]
pub struct SshAdd {
    program: String,
}

impl SshAdd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SshAdd {
    fn default() -> Self {
        Self::new("ssh-add")
    }
}

impl SshAgent for SshAdd {
    fn remove_identity(&self, key: &Path) -> Result<(), ToolError> {
        run(&self.program, &[OsStr::new("-d"), key.as_os_str()]).map(|_| ())
    }

    fn add_identity(&self, key: &Path, lifetime: Duration) -> Result<(), ToolError> {
        // ssh-add rejects a zero lifetime
        let secs = lifetime.as_secs().max(1).to_string();
        run(
            &self.program,
            &[OsStr::new("-t"), OsStr::new(&secs), key.as_os_str()],
        )
        .map(|_| ())
    }
}
