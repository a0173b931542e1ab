//! Port liveness probing

use crate::error::{FleetError, FleetResult};

use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Answers whether something is accepting connections on a local port
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// `Ok(false)` only when the port is known to be free. Errors are
    /// inconclusive and callers must treat the port as occupied.
    async fn is_listening(&self, port: u16) -> FleetResult<bool>;
}

/// Probes by opening a TCP connection to 127.0.0.1
pub struct TcpPortProbe {
    timeout: Duration,
}

impl TcpPortProbe {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

#[async_trait]
impl PortProbe for TcpPortProbe {
    async fn is_listening(&self, port: u16) -> FleetResult<bool> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));

        match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(true),
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => Ok(false),
            Ok(Err(e)) => Err(FleetError::io(format!("Failed to probe port {}", port), e)),
            Err(_) => Err(FleetError::Timeout {
                operation: format!("probe of port {}", port),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detects_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = TcpPortProbe::new(500);
        assert!(probe.is_listening(port).await.unwrap());

        drop(listener);
        assert!(!probe.is_listening(port).await.unwrap());
    }
}
