//! Project path canonicalization.
//!
//! Relays and editors hand us the same directory in several spellings:
//! `C:\Proj\`, `c:/proj`, or URI-derived `/c%3A/proj`. Comparisons go
//! through [`normalize_workspace_path`]; filesystem checks go through
//! [`to_filesystem_path`], which decodes but keeps the original case.

use std::path::PathBuf;

/// Canonical comparison key for a project path.
///
/// Separators become `/`, the whole string is lower-cased, `%3A` decodes
/// to `:`, leading slashes in front of a drive letter are dropped and
/// trailing separators are stripped. The result is idempotent.
pub fn normalize_workspace_path(raw: &str) -> String {
    let unified = raw.replace('\\', "/").to_lowercase();
    let decoded = unified.replace("%3a", ":");
    let drive_fixed = strip_slash_before_drive(&decoded);
    trim_trailing_separators(drive_fixed).to_string()
}

/// Decode a project path for use against the local filesystem.
pub fn to_filesystem_path(raw: &str) -> PathBuf {
    let decoded = raw.replace("%3A", ":").replace("%3a", ":");
    let decoded = if cfg!(windows) {
        let unified = decoded.replace('\\', "/");
        strip_slash_before_drive(&unified).to_string()
    } else {
        decoded
    };
    PathBuf::from(trim_trailing_separators(&decoded))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes.len() == 2 || bytes[2] == b'/')
}

fn strip_slash_before_drive(path: &str) -> &str {
    let trimmed = path.trim_start_matches('/');
    if trimmed.len() < path.len() && has_drive_prefix(trimmed) {
        trimmed
    } else {
        path
    }
}

fn trim_trailing_separators(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() && !path.is_empty() {
        &path[..1]
    } else {
        trimmed
    }
}
