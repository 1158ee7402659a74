use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Detects the offline -> online transition for the contact endpoint by
/// opening a TCP connection to its host.
#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    endpoint: Url,
    interval: Duration,
    last: Option<bool>,
}

impl ReachabilityProbe {
    pub fn new(endpoint: Url, interval: Duration) -> Self {
        Self {
            endpoint,
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Probes once and reports whether the endpoint just came back. The
    /// first observation only seeds the state.
    pub fn came_online(&mut self) -> bool {
        let reachable = self.is_reachable();
        let previous = self.last.replace(reachable);
        matches!(previous, Some(false)) && reachable
    }

    pub fn is_reachable(&self) -> bool {
        match self.addrs() {
            Ok(addrs) => addrs
                .iter()
                .any(|addr| TcpStream::connect_timeout(addr, CONNECT_TIMEOUT).is_ok()),
            Err(err) => {
                tracing::debug!(?err, "endpoint address did not resolve");
                false
            }
        }
    }

    fn addrs(&self) -> Result<Vec<SocketAddr>> {
        self.endpoint
            .socket_addrs(|| None)
            .with_context(|| format!("resolving {}", self.endpoint))
    }
}
