//! Port allocation for new instances.
//!
//! A port is usable only when no router entry claims it *and* a live bind
//! on the loopback interface succeeds. The table catches instances that
//! registered but are not listening yet; the bind catches processes that
//! hold a port without a table entry.

use std::collections::HashSet;

use tracing::debug;

use crate::error::NoAvailablePortError;
use crate::store::RegistryStore;

/// Well-known port tried first.
pub const DEFAULT_PORT: u16 = 60100;
/// Upper bound of the scan range reserved for additional instances.
pub const MAX_PORT: u16 = 63999;

/// Port relays call when a project has no registered instance.
pub const fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Outcome of a live bind probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortProbe {
    Available,
    Unavailable,
}

/// Bind `host:port`, then release it immediately.
pub async fn probe_port(host: &str, port: u16) -> PortProbe {
    match tokio::net::TcpListener::bind((host, port)).await {
        Ok(listener) => {
            drop(listener);
            PortProbe::Available
        }
        Err(e) => {
            debug!("Port {port} not bindable: {e}");
            PortProbe::Unavailable
        }
    }
}

#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Tried before scanning
    pub default_port: u16,
    /// Inclusive end of the scan range
    pub max_port: u16,
    /// Interface used for bind probes
    pub hostname: String,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            max_port: MAX_PORT,
            hostname: "127.0.0.1".into(),
        }
    }
}

pub struct PortAllocator {
    store: RegistryStore,
    config: AllocatorConfig,
}

impl PortAllocator {
    pub fn new(store: RegistryStore) -> Self {
        Self::with_config(store, AllocatorConfig::default())
    }

    pub fn with_config(store: RegistryStore, config: AllocatorConfig) -> Self {
        Self { store, config }
    }

    /// First port that is neither claimed in the table nor held by anyone,
    /// preferring the default.
    pub async fn find_available_port(&self) -> Result<u16, NoAvailablePortError> {
        let claimed = self.store.load().await.claimed_ports();
        let start = self.config.default_port;
        let end = self.config.max_port;

        if self.is_usable(start, &claimed).await {
            return Ok(start);
        }

        if let Some(first) = start.checked_add(1) {
            for port in first..=end {
                if self.is_usable(port, &claimed).await {
                    debug!("Default port {start} taken, allocated {port}");
                    return Ok(port);
                }
            }
        }

        Err(NoAvailablePortError { start, end })
    }

    async fn is_usable(&self, port: u16, claimed: &HashSet<u16>) -> bool {
        !claimed.contains(&port)
            && probe_port(&self.config.hostname, port).await == PortProbe::Available
    }
}
