//! Standard I/O to TCP tunnel
//!
//! apssh runs as the SSH client's `ProxyCommand`: ssh writes its protocol
//! bytes to our stdin and reads the server's bytes from our stdout.

mod connector;
mod relay;

pub use connector::{open_tunnel, run_tunnel};
pub use relay::{relay, RelayEnd, RelayStats, RELAY_CHUNK_SIZE};
