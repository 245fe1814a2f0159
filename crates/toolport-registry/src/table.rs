//! Router table data model.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::path::normalize_workspace_path;

/// One instance's claim on a project path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterEntry {
    /// Project path as the instance reported it (platform-native form).
    pub workspace: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Milliseconds since the Unix epoch.
    pub last_updated: i64,
}

impl RouterEntry {
    pub fn new(workspace: impl Into<String>, port: u16, pid: Option<u32>) -> Self {
        Self {
            workspace: workspace.into(),
            port,
            pid,
            last_updated: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Whether this entry is for the given project, compared normalized.
    pub fn matches(&self, workspace: &str) -> bool {
        normalize_workspace_path(&self.workspace) == normalize_workspace_path(workspace)
    }
}

/// The whole router file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterTable {
    #[serde(default)]
    pub entries: Vec<RouterEntry>,
}

impl RouterTable {
    pub fn find(&self, workspace: &str) -> Option<&RouterEntry> {
        let normalized = normalize_workspace_path(workspace);
        self.entries
            .iter()
            .find(|e| normalize_workspace_path(&e.workspace) == normalized)
    }

    /// Replace any entry for the same normalized project, then append.
    pub fn upsert(&mut self, entry: RouterEntry) {
        self.remove_workspace(&entry.workspace);
        self.entries.push(entry);
    }

    /// Returns the number of entries removed.
    pub fn remove_workspace(&mut self, workspace: &str) -> usize {
        let normalized = normalize_workspace_path(workspace);
        let before = self.entries.len();
        self.entries
            .retain(|e| normalize_workspace_path(&e.workspace) != normalized);
        before - self.entries.len()
    }

    /// Remove the entry for `workspace` only while it still points at `port`.
    /// Returns the number of entries removed.
    pub fn remove_owned(&mut self, workspace: &str, port: u16) -> usize {
        let normalized = normalize_workspace_path(workspace);
        let before = self.entries.len();
        self.entries
            .retain(|e| e.port != port || normalize_workspace_path(&e.workspace) != normalized);
        before - self.entries.len()
    }

    /// Returns the number of entries removed.
    pub fn remove_port(&mut self, port: u16) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.port != port);
        before - self.entries.len()
    }

    pub fn claimed_ports(&self) -> HashSet<u16> {
        self.entries.iter().map(|e| e.port).collect()
    }
}
