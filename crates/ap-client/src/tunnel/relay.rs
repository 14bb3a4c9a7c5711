//! Bidirectional byte relay
//!
//! One task multiplexes both directions with `select!`, so there is a
//! single suspension point and no shared state between directions.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Maximum bytes moved per read
pub const RELAY_CHUNK_SIZE: usize = 8 * 1024;

/// Why the relay stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The server closed the connection
    RemoteClosed,
    /// Reading from the server failed
    RemoteReadError,
    /// Standard output is gone (the SSH client exited)
    LocalWriteFailed,
    /// Writing to the server failed
    RemoteWriteFailed,
}

impl fmt::Display for RelayEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RelayEnd::RemoteClosed => "remote closed",
            RelayEnd::RemoteReadError => "remote read error",
            RelayEnd::LocalWriteFailed => "local write failed",
            RelayEnd::RemoteWriteFailed => "remote write failed",
        };
        f.write_str(reason)
    }
}

/// Byte counts for a finished relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub to_remote: u64,
    pub to_local: u64,
    pub ended_by: RelayEnd,
}

/// Copy `local_in` to `remote` and `remote` to `local_out` until the
/// remote side ends or a write fails
///
/// End of `local_in` half-closes the remote connection; remote output
/// keeps flowing until the server closes. Every chunk written to
/// `local_out` is flushed immediately.
pub async fn relay<I, O, S>(mut local_in: I, mut local_out: O, remote: S) -> RelayStats
where
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite,
{
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);
    let mut up = vec![0u8; RELAY_CHUNK_SIZE];
    let mut down = vec![0u8; RELAY_CHUNK_SIZE];

    let mut to_remote: u64 = 0;
    let mut to_local: u64 = 0;
    let mut local_open = true;

    let ended_by = loop {
        tokio::select! {
            result = remote_rd.read(&mut down) => match result {
                Ok(0) => break RelayEnd::RemoteClosed,
                Ok(n) => {
                    trace!(bytes = n, "remote -> local");
                    let written = async {
                        local_out.write_all(&down[..n]).await?;
                        local_out.flush().await
                    }
                    .await;
                    if let Err(e) = written {
                        debug!("Local write failed: {}", e);
                        break RelayEnd::LocalWriteFailed;
                    }
                    to_local += n as u64;
                }
                Err(e) => {
                    debug!("Remote read failed: {}", e);
                    break RelayEnd::RemoteReadError;
                }
            },

            result = local_in.read(&mut up), if local_open => match result {
                Ok(0) => {
                    debug!("Local input closed, half-closing remote");
                    local_open = false;
                    if let Err(e) = remote_wr.shutdown().await {
                        debug!("Remote shutdown failed: {}", e);
                    }
                }
                Ok(n) => {
                    trace!(bytes = n, "local -> remote");
                    if let Err(e) = remote_wr.write_all(&up[..n]).await {
                        debug!("Remote write failed: {}", e);
                        break RelayEnd::RemoteWriteFailed;
                    }
                    to_remote += n as u64;
                }
                Err(e) => {
                    debug!("Local read failed: {}, half-closing remote", e);
                    local_open = false;
                    if let Err(e) = remote_wr.shutdown().await {
                        debug!("Remote shutdown failed: {}", e);
                    }
                }
            },
        }
    };

    if let Err(e) = remote_wr.shutdown().await {
        debug!("Remote shutdown failed: {}", e);
    }

    let stats = RelayStats {
        to_remote,
        to_local,
        ended_by,
    };
    debug!(?stats, "Relay finished");
    stats
}
