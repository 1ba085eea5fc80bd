use std::time::Duration;

use async_trait::async_trait;

/// Liveness check used by status queries.
#[async_trait]
pub trait PortProber: Send + Sync {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

/// Plain TCP connect. Every address `host` resolves to is tried, so `localhost` matches
/// listeners bound to either `127.0.0.1` or `::1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

#[async_trait]
impl PortProber for TcpProber {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> bool {
        probe(host, port, timeout).await
    }
}

/// TCP reachability check. Connect success is `true`; timeouts and connect errors are `false`.
pub async fn probe(host: &str, port: u16, timeout: Duration) -> bool {
    if port == 0 {
        return false;
    }

    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            true
        }
        Ok(Err(err)) => {
            tracing::trace!(host, port, %err, "probe connect failed");
            false
        }
        Err(_) => {
            tracing::trace!(host, port, timeout_ms = timeout.as_millis() as u64, "probe timed out");
            false
        }
    }
}
