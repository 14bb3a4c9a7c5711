//! Command implementations

pub mod connect;

pub use connect::{connect, exit_code, ConnectError};

/// Tunnel ran to completion
pub const EXIT_OK: u8 = 0;
/// Usage error, invalid configuration or access denied
pub const EXIT_FAILURE: u8 = 1;
/// Browser authentication did not complete in time
pub const EXIT_AUTH_TIMEOUT: u8 = 127;
/// Interrupted by SIGINT/SIGTERM
pub const EXIT_INTERRUPTED: u8 = 130;
