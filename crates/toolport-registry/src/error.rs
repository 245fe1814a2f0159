//! Registry and allocation errors.

use std::path::PathBuf;

/// Failure to persist the router table.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to write router table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize router table: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Every port in the scan range is claimed or bound.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no available port in range {start}-{end}")]
pub struct NoAvailablePortError {
    pub start: u16,
    pub end: u16,
}
