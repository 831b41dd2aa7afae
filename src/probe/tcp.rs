//! TCP service probe: success means the connection was established.

use std::time::Duration;
use tokio::net::TcpStream;

use super::{os_error_text, ProbeError};

/// Open a TCP connection to `host:port` and close it again.
pub async fn run_tcp_probe(host: &str, port: u16, timeout: Duration) -> Result<(), ProbeError> {
    let host = host.trim_matches(|c| c == '[' || c == ']');

    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Network(os_error_text(&e)))?;

    drop(stream);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = run_tcp_probe("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_tcp_probe_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = run_tcp_probe("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Network(_)));
        assert!(err.to_string().contains(':'));
    }

    #[tokio::test]
    async fn test_tcp_probe_bracketed_ipv6_literal() {
        let listener = match TcpListener::bind("[::1]:0").await {
            Ok(l) => l,
            // host without IPv6 loopback
            Err(_) => return,
        };
        let port = listener.local_addr().unwrap().port();

        let result = run_tcp_probe("[::1]", port, Duration::from_secs(2)).await;
        assert!(result.is_ok());
    }
}
