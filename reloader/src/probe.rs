use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::controller::ReadinessProbe;

/// Per-attempt connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(100);

/// Checks whether something accepts TCP connections on `localhost:port`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortProbe;

impl PortProbe {
    /// Any failure (refused, timeout, resolution error) is "not reachable".
    pub async fn is_reachable(&self, port: u16) -> bool {
        matches!(
            timeout(CONNECT_TIMEOUT, TcpStream::connect(("localhost", port))).await,
            Ok(Ok(_))
        )
    }
}

impl ReadinessProbe for PortProbe {
    async fn is_reachable(&self, port: u16) -> bool {
        PortProbe::is_reachable(self, port).await
    }
}
