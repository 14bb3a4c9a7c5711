//! apssh: SSH ProxyCommand for access-proxy brokered certificates
//!
//! Library half of the `apssh` binary so the connect pipeline and its
//! exit-code mapping can be tested without spawning processes.

pub mod commands;
pub mod output;
