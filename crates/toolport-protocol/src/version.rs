//! Caller version comparison.
//!
//! Versions are dot-separated numeric components. Missing trailing
//! components count as 0 and non-numeric components parse as 0, so
//! `"1"` equals `"1.0.0"` and sorts above `"0.0.2"`.

use std::cmp::Ordering;

/// Where a caller version sits relative to a required minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    BelowMinimum,
    MeetsMinimum,
    AboveMinimum,
}

impl VersionCheck {
    pub fn is_below(&self) -> bool {
        matches!(self, Self::BelowMinimum)
    }
}

fn components(version: &str) -> Vec<u64> {
    version
        .trim()
        .split('.')
        .map(|part| part.trim().parse::<u64>().unwrap_or(0))
        .collect()
}

/// Compare two versions component by component.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let left = components(left);
    let right = components(right);
    let len = left.len().max(right.len());

    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Classify `caller` against `minimum`.
pub fn check_version(caller: &str, minimum: &str) -> VersionCheck {
    match compare_versions(caller, minimum) {
        Ordering::Less => VersionCheck::BelowMinimum,
        Ordering::Equal => VersionCheck::MeetsMinimum,
        Ordering::Greater => VersionCheck::AboveMinimum,
    }
}
