//! Outbound connection to the SSH server

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info};

use ap_core::TargetSpec;

use super::relay::{relay, RelayStats};

/// Connect to the target's SSH port
pub async fn open_tunnel(target: &TargetSpec, connect_timeout: Duration) -> io::Result<TcpStream> {
    debug!(address = %target.address(), "Connecting");

    let stream = tokio::time::timeout(
        connect_timeout,
        TcpStream::connect((target.host.as_str(), target.port)),
    )
    .await
    .map_err(|_| {
        io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connection to {} timed out", target.address()),
        )
    })??;

    stream.set_nodelay(true)?;
    info!(address = %target.address(), "Tunnel connected");
    Ok(stream)
}

/// Connect and relay this process's stdin/stdout until either side ends
pub async fn run_tunnel(target: &TargetSpec, connect_timeout: Duration) -> io::Result<RelayStats> {
    let stream = open_tunnel(target, connect_timeout).await?;
    let stats = relay(tokio::io::stdin(), tokio::io::stdout(), stream).await;
    info!(
        to_remote = stats.to_remote,
        to_local = stats.to_local,
        ended_by = %stats.ended_by,
        "Tunnel closed"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_tunnel_sets_nodelay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"SSH-2.0-test\r\n").await.unwrap();
        });

        let target: TargetSpec = format!("127.0.0.1:{}:alice", port).parse().unwrap();
        let mut stream = open_tunnel(&target, Duration::from_secs(5)).await.unwrap();
        assert!(stream.nodelay().unwrap());

        let mut banner = String::new();
        stream.read_to_string(&mut banner).await.unwrap();
        assert_eq!(banner, "SSH-2.0-test\r\n");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_open_tunnel_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target: TargetSpec = format!("127.0.0.1:{}:alice", port).parse().unwrap();
        assert!(open_tunnel(&target, Duration::from_secs(5)).await.is_err());
    }
}
