//! Advisory caller-version gate.
//!
//! Tool calls from relays older than the minimum are still processed. The
//! gate logs every outdated call but raises an operator notice at most once
//! per cooldown window.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use toolport_protocol::{VersionCheck, check_version};
use tracing::warn;

use crate::notice::{OperatorNotice, OperatorNotifier};

/// Minimum relay version this instance is tested against.
pub const MIN_CALLER_VERSION: &str = "0.0.2";

#[derive(Debug, Clone)]
pub struct VersionGateConfig {
    pub minimum: String,
    /// Quiet period between operator notices
    pub cooldown: Duration,
}

impl Default for VersionGateConfig {
    fn default() -> Self {
        Self {
            minimum: MIN_CALLER_VERSION.into(),
            cooldown: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOutcome {
    pub check: VersionCheck,
    /// An operator notice was raised for this call
    pub notified: bool,
}

pub struct VersionGate {
    config: VersionGateConfig,
    last_notice: Mutex<Option<Instant>>,
}

impl VersionGate {
    pub fn new(config: VersionGateConfig) -> Self {
        Self {
            config,
            last_notice: Mutex::new(None),
        }
    }

    /// Classify a caller version. A missing version counts as outdated.
    pub fn inspect(&self, caller: Option<&str>, notifier: &dyn OperatorNotifier) -> GateOutcome {
        let check = match caller {
            Some(version) => check_version(version, &self.config.minimum),
            None => VersionCheck::BelowMinimum,
        };

        if !check.is_below() {
            return GateOutcome { check, notified: false };
        }

        let shown = caller.unwrap_or("unknown");
        warn!(
            "Relay version {shown} is outdated (minimum required: {})",
            self.config.minimum
        );

        let notified = {
            let mut last = self.last_notice.lock();
            let now = Instant::now();
            let due = match *last {
                Some(at) => now.duration_since(at) >= self.config.cooldown,
                None => true,
            };
            if due {
                *last = Some(now);
            }
            due
        };

        if notified {
            notifier.notify(OperatorNotice::OutdatedCaller {
                caller_version: shown.to_string(),
                minimum: self.config.minimum.clone(),
            });
        }

        GateOutcome { check, notified }
    }
}

impl Default for VersionGate {
    fn default() -> Self {
        Self::new(VersionGateConfig::default())
    }
}
