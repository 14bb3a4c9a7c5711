//! Core trait definitions

mod ssh;

pub use ssh::{CertificateInspector, SshAgent};
