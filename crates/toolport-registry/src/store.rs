//! File-backed router table.
//!
//! Every mutation is load → mutate → save of the whole file. Saves go
//! through a per-process temp file and a rename so readers never see a
//! half-written table. There is no cross-process lock: two instances
//! registering the same project at the same moment can lose one write.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::allocator::default_port;
use crate::error::RegistryError;
use crate::table::{RouterEntry, RouterTable};

/// Environment override for the router file location.
pub const ROUTER_FILE_ENV: &str = "TOOLPORT_ROUTER_FILE";

static SAVE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Handle on the shared router file. Cheap to clone; holds only the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub const FILE_NAME: &str = ".toolport-router.json";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$TOOLPORT_ROUTER_FILE`, else `~/.toolport-router.json`.
    pub fn default_location() -> PathBuf {
        if let Some(path) = std::env::var_os(ROUTER_FILE_ENV) {
            return PathBuf::from(path);
        }
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(Self::FILE_NAME)
    }

    pub fn at_default_location() -> Self {
        Self::new(Self::default_location())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the table. Missing or corrupt files yield an empty table.
    pub async fn load(&self) -> RouterTable {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) => {
                debug!("Router table unreadable at {}: {e}", self.path.display());
                return RouterTable::default();
            }
        };

        match serde_json::from_str(&data) {
            Ok(table) => table,
            Err(e) => {
                warn!("Router table at {} is corrupt, treating as empty: {e}", self.path.display());
                RouterTable::default()
            }
        }
    }

    /// Overwrite the file with `table`. Last writer wins.
    pub async fn save(&self, table: &RouterTable) -> Result<(), RegistryError> {
        let json = serde_json::to_string_pretty(table)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|source| RegistryError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await.map_err(|source| RegistryError::Io {
            path: tmp.clone(),
            source,
        })?;

        if let Err(source) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(RegistryError::Io {
                path: self.path.clone(),
                source,
            });
        }
        Ok(())
    }

    pub async fn find(&self, workspace: &str) -> Option<RouterEntry> {
        self.load().await.find(workspace).cloned()
    }

    /// Port of the instance serving `workspace`, if one is registered.
    pub async fn port_for_workspace(&self, workspace: &str) -> Option<u16> {
        self.find(workspace).await.map(|e| e.port)
    }

    /// Port a relay should call: the instance registered for `workspace`,
    /// else the well-known default.
    pub async fn resolve_port(&self, workspace: Option<&str>) -> u16 {
        match workspace {
            Some(ws) => self.port_for_workspace(ws).await.unwrap_or_else(default_port),
            None => default_port(),
        }
    }

    /// Record `workspace → port`, replacing any entry for the same project.
    pub async fn register(
        &self,
        workspace: &str,
        port: u16,
        pid: Option<u32>,
    ) -> Result<RouterEntry, RegistryError> {
        let mut table = self.load().await;
        let entry = RouterEntry::new(workspace, port, pid);
        table.upsert(entry.clone());
        self.save(&table).await?;
        debug!("Registered {workspace} on port {port}");
        Ok(entry)
    }

    /// Remove the entry for `workspace`. Returns how many entries went away.
    pub async fn unregister(&self, workspace: &str) -> Result<usize, RegistryError> {
        let mut table = self.load().await;
        let removed = table.remove_workspace(workspace);
        self.save(&table).await?;
        Ok(removed)
    }

    /// Remove the entry for `workspace` if it is still owned by `port`. An
    /// entry re-registered by another instance is left alone.
    pub async fn unregister_owned(&self, workspace: &str, port: u16) -> Result<usize, RegistryError> {
        let mut table = self.load().await;
        let removed = table.remove_owned(workspace, port);
        if removed > 0 {
            self.save(&table).await?;
        }
        Ok(removed)
    }

    /// Remove every entry claiming `port`.
    pub async fn unregister_by_port(&self, port: u16) -> Result<usize, RegistryError> {
        let mut table = self.load().await;
        let removed = table.remove_port(port);
        self.save(&table).await?;
        Ok(removed)
    }

    pub async fn list(&self) -> Vec<RouterEntry> {
        self.load().await.entries
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| Self::FILE_NAME.to_string());
        let seq = SAVE_SEQ.fetch_add(1, Ordering::Relaxed);
        self.path
            .with_file_name(format!("{name}.{}.{seq}.tmp", std::process::id()))
    }
}
