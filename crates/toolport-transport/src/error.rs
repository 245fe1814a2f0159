//! Transport startup errors.

/// Failures that abort instance startup.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind to port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid listen address {0}")]
    InvalidAddress(String),
}
