//! Workspace coordinator.
//!
//! Decides whether the focused instance already serves the project a caller
//! asked for and, if not, walks an ordered list of switch strategies until
//! one of them is verified. Every outcome is a [`WorkspaceSwitchResult`]
//! value; nothing here returns `Err`.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use toolport_registry::{PortProbe, RegistryStore, normalize_workspace_path, probe_port, to_filesystem_path};
use tracing::{debug, info, warn};

use crate::host::WorkspaceHost;

/// Host relays use to reach registered instances.
const LOOPBACK: &str = "127.0.0.1";

/// Files or directories that mark a directory as a project root.
pub const PROJECT_MARKERS: &[&str] = &[
    ".vscode",
    "package.json",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "settings.gradle",
    ".project",
    ".classpath",
    "Cargo.toml",
];

/// Relationship between the focused project and the requested one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    /// Both normalize to the same path.
    Match,
    /// Nothing was requested.
    NoRequest,
    /// No project is focused.
    NoCurrent,
    /// A switch is needed.
    Mismatch,
}

pub fn classify(current: Option<&str>, requested: Option<&str>) -> WorkspaceState {
    let Some(requested) = requested.filter(|r| !r.is_empty()) else {
        return WorkspaceState::NoRequest;
    };
    let Some(current) = current.filter(|c| !c.is_empty()) else {
        return WorkspaceState::NoCurrent;
    };
    if normalize_workspace_path(current) == normalize_workspace_path(requested) {
        WorkspaceState::Match
    } else {
        WorkspaceState::Mismatch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SwitchStrategy {
    /// Open the project in place and wait for focus to follow.
    CurrentWindow,
    /// Open a new window, then hand over to it.
    NewWindow,
    /// Hand over to an instance that is already running.
    HandoverOnly,
}

impl SwitchStrategy {
    pub const ALL: [SwitchStrategy; 3] = [Self::CurrentWindow, Self::NewWindow, Self::HandoverOnly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CurrentWindow => "current-window",
            Self::NewWindow => "new-window",
            Self::HandoverOnly => "handover",
        }
    }
}

/// Retry and delay settings for switch attempts.
#[derive(Debug, Clone)]
pub struct HandoverPolicy {
    /// Tried in order until one succeeds
    pub strategies: Vec<SwitchStrategy>,
    pub verification_retries: u32,
    pub verification_delay: Duration,
    /// Cap on `verification_retries` for the in-place strategy
    pub current_window_max_retries: u32,
    /// Floor on `verification_delay` for the in-place strategy
    pub current_window_min_delay: Duration,
    /// Wait for a new window to start before handing over
    pub new_window_settle: Duration,
    /// Floor on `new_window_settle`
    pub new_window_min_settle: Duration,
    /// Wait after the handover signal
    pub handover_delay: Duration,
}

impl Default for HandoverPolicy {
    fn default() -> Self {
        Self {
            strategies: SwitchStrategy::ALL.to_vec(),
            verification_retries: 5,
            verification_delay: Duration::from_secs(3),
            current_window_max_retries: 3,
            current_window_min_delay: Duration::from_secs(5),
            new_window_settle: Duration::from_secs(15),
            new_window_min_settle: Duration::from_secs(8),
            handover_delay: Duration::from_secs(3),
        }
    }
}

impl HandoverPolicy {
    /// Policy that only runs `strategies`.
    pub fn with_strategies(strategies: impl Into<Vec<SwitchStrategy>>) -> Self {
        Self {
            strategies: strategies.into(),
            ..Self::default()
        }
    }

    fn current_window_retries(&self) -> u32 {
        self.verification_retries.min(self.current_window_max_retries)
    }

    fn current_window_delay(&self) -> Duration {
        self.verification_delay.max(self.current_window_min_delay)
    }

    fn settle(&self) -> Duration {
        self.new_window_settle.max(self.new_window_min_settle)
    }
}

/// Why a switch did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SwitchFailure {
    NoActiveProject,
    InvalidTargetProject,
    HandoverExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSwitchResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<SwitchFailure>,
}

impl WorkspaceSwitchResult {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
            current_project: None,
            requested_project: None,
            failure: None,
        }
    }

    fn failed(
        failure: SwitchFailure,
        message: String,
        current: Option<&str>,
        requested: &str,
    ) -> Self {
        Self {
            success: false,
            message: Some(message),
            current_project: current.map(str::to_string),
            requested_project: Some(requested.to_string()),
            failure: Some(failure),
        }
    }
}

/// Render a failed result as the text relayed to the caller. Empty for
/// successful results.
pub fn format_workspace_error(result: &WorkspaceSwitchResult) -> String {
    if result.success {
        return String::new();
    }

    let mut text = format!(
        "WorkspaceError: {}",
        result.message.as_deref().unwrap_or("workspace switch failed")
    );

    if let Some(requested) = &result.requested_project {
        text.push_str("\n\nTo resolve this:");
        text.push_str(&format!("\n1. Open the target project ({requested}) in your editor"));
        text.push_str("\n2. Activate the tool server for that project from the editor's status bar");
        text.push_str("\n3. Then retry this operation");

        if let Some(current) = &result.current_project {
            text.push_str(&format!("\n\nCurrent project: {current}"));
            text.push_str(&format!("\nRequested project: {requested}"));
        }
    }

    text
}

fn remediation_message(current: &str, requested: &str) -> String {
    format!(
        "Project mismatch detected and automatic switching failed.

Current project: {current}
Requested project: {requested}

Choose one of the following:

Option 1: Switch the project manually
1. Open the command palette (Ctrl+Shift+P or Cmd+Shift+P)
2. Run \"File: Open Folder\"
3. Select {requested}
4. Wait for the project to finish loading, then retry

Option 2: Activate an already open window
1. Find the tool server status item in the window that has {requested} open
2. Click it to make that window serve tool calls
3. Retry the operation

Option 3: Restart on the target project
1. Close the current editor window
2. Reopen the editor on {requested}
3. Wait for the project to finish loading, then retry

If the problem persists, check that the target path exists, is readable, \
and contains a recognizable project."
    )
}

/// Whether `path` is an existing directory holding at least one
/// [`PROJECT_MARKERS`] entry.
pub async fn is_valid_project(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            warn!("Not a directory: {}", path.display());
            return false;
        }
        Err(e) => {
            warn!("Project directory {} is not accessible: {e}", path.display());
            return false;
        }
    }

    for marker in PROJECT_MARKERS {
        if tokio::fs::try_exists(path.join(marker)).await.unwrap_or(false) {
            debug!("{} is a project ({marker} found)", path.display());
            return true;
        }
    }
    warn!("No project marker found in {}", path.display());
    false
}

/// Resolves workspace requirements for one instance.
pub struct WorkspaceCoordinator<H: WorkspaceHost> {
    host: H,
    registry: RegistryStore,
    policy: HandoverPolicy,
}

impl<H: WorkspaceHost> WorkspaceCoordinator<H> {
    pub fn new(host: H, registry: RegistryStore) -> Self {
        Self::with_policy(host, registry, HandoverPolicy::default())
    }

    pub fn with_policy(host: H, registry: RegistryStore, policy: HandoverPolicy) -> Self {
        Self { host, registry, policy }
    }

    pub fn policy(&self) -> &HandoverPolicy {
        &self.policy
    }

    pub fn current_project(&self) -> Option<String> {
        self.host.focused_project()
    }

    /// Make sure `requested` is the project being served, switching if
    /// needed.
    pub async fn handle_workspace_requirement(&self, requested: Option<&str>) -> WorkspaceSwitchResult {
        let current = self.host.focused_project();
        debug!(
            "Workspace requirement: requested={}, current={}",
            requested.unwrap_or("none"),
            current.as_deref().unwrap_or("none")
        );

        match classify(current.as_deref(), requested) {
            WorkspaceState::NoRequest => WorkspaceSwitchResult::ok(),
            WorkspaceState::NoCurrent => {
                let message = "No project is currently open. Open a project in the editor first.";
                warn!("{message}");
                WorkspaceSwitchResult::failed(
                    SwitchFailure::NoActiveProject,
                    message.to_string(),
                    None,
                    requested.unwrap_or_default(),
                )
            }
            WorkspaceState::Match => WorkspaceSwitchResult {
                current_project: current,
                requested_project: requested.map(str::to_string),
                ..WorkspaceSwitchResult::ok()
            },
            WorkspaceState::Mismatch => {
                let current = current.unwrap_or_default();
                let requested = requested.unwrap_or_default();
                self.attempt_switch(&current, requested).await
            }
        }
    }

    async fn attempt_switch(&self, current: &str, requested: &str) -> WorkspaceSwitchResult {
        info!("Switching project from {current} to {requested}");

        let target = to_filesystem_path(requested);
        if !is_valid_project(&target).await {
            let message = format!("Target project is invalid or does not exist: {requested}");
            warn!("{message}");
            return WorkspaceSwitchResult::failed(
                SwitchFailure::InvalidTargetProject,
                message,
                Some(current),
                requested,
            );
        }

        for strategy in &self.policy.strategies {
            debug!("Trying switch strategy {}", strategy.as_str());
            if self.run_strategy(*strategy, &target, requested).await {
                let message = format!(
                    "Switched from {current} to {requested} ({})",
                    strategy.as_str()
                );
                info!("{message}");
                return WorkspaceSwitchResult {
                    message: Some(message),
                    current_project: Some(current.to_string()),
                    requested_project: Some(requested.to_string()),
                    ..WorkspaceSwitchResult::ok()
                };
            }
            debug!("Switch strategy {} failed", strategy.as_str());
        }

        warn!("All switch strategies failed for {requested}");
        WorkspaceSwitchResult::failed(
            SwitchFailure::HandoverExhausted,
            remediation_message(current, requested),
            Some(current),
            requested,
        )
    }

    async fn run_strategy(&self, strategy: SwitchStrategy, target: &Path, requested: &str) -> bool {
        match strategy {
            SwitchStrategy::CurrentWindow => self.try_current_window(target, requested).await,
            SwitchStrategy::NewWindow => self.try_new_window(target, requested).await,
            SwitchStrategy::HandoverOnly => self.try_handover(requested).await,
        }
    }

    async fn try_current_window(&self, target: &Path, requested: &str) -> bool {
        if let Err(e) = self.host.open_project(target, false).await {
            warn!("Opening {} in place failed: {e}", target.display());
            return false;
        }

        let wanted = normalize_workspace_path(requested);
        let retries = self.policy.current_window_retries();
        for attempt in 1..=retries {
            tokio::time::sleep(self.policy.current_window_delay()).await;
            let focused = self.host.focused_project().map(|p| normalize_workspace_path(&p));
            debug!("In-place verification {attempt}/{retries}: focused={focused:?}");
            if focused.as_deref() == Some(wanted.as_str()) {
                return true;
            }
        }
        false
    }

    async fn try_new_window(&self, target: &Path, requested: &str) -> bool {
        let started = chrono::Utc::now().timestamp_millis();

        if let Err(e) = self.host.open_project(target, true).await {
            warn!("Opening {} in a new window failed: {e}", target.display());
            return false;
        }

        debug!("Waiting {:?} for the new window to start", self.policy.settle());
        tokio::time::sleep(self.policy.settle()).await;

        if let Err(e) = self.host.signal_handover().await {
            warn!("Handover signal failed: {e}");
            return false;
        }
        tokio::time::sleep(self.policy.handover_delay).await;

        self.wait_for_fresh_entry(requested, started).await
    }

    async fn try_handover(&self, requested: &str) -> bool {
        if let Err(e) = self.host.signal_handover().await {
            warn!("Handover signal failed: {e}");
            return false;
        }
        tokio::time::sleep(self.policy.handover_delay).await;

        let Some(entry) = self.registry.find(requested).await else {
            debug!("No running instance is registered for {requested}");
            return false;
        };
        // A bindable port means the registered instance is gone.
        if probe_port(LOOPBACK, entry.port).await == PortProbe::Available {
            debug!("Entry for {requested} on port {} has no listener", entry.port);
            return false;
        }
        true
    }

    /// Poll the registry for an entry for `requested` written at or after
    /// `since` (epoch millis).
    async fn wait_for_fresh_entry(&self, requested: &str, since: i64) -> bool {
        let retries = self.policy.verification_retries.max(1);
        for attempt in 1..=retries {
            if let Some(entry) = self.registry.find(requested).await {
                if entry.last_updated >= since {
                    debug!("Instance on port {} now serves {requested}", entry.port);
                    return true;
                }
            }
            if attempt < retries {
                tokio::time::sleep(self.policy.verification_delay).await;
            }
        }
        false
    }
}

/// Object-safe view of a coordinator, used by the dispatcher.
pub trait WorkspaceGate: Send + Sync {
    fn require<'a>(
        &'a self,
        requested: &'a str,
    ) -> Pin<Box<dyn Future<Output = WorkspaceSwitchResult> + Send + 'a>>;

    fn current_project(&self) -> Option<String>;
}

impl<H: WorkspaceHost> WorkspaceGate for WorkspaceCoordinator<H> {
    fn require<'a>(
        &'a self,
        requested: &'a str,
    ) -> Pin<Box<dyn Future<Output = WorkspaceSwitchResult> + Send + 'a>> {
        Box::pin(self.handle_workspace_requirement(Some(requested)))
    }

    fn current_project(&self) -> Option<String> {
        self.host.focused_project()
    }
}
