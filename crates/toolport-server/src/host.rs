//! The editor host a coordinator drives during a workspace switch.

use std::future::Future;
use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info};

/// Host-side failures. A failed host call fails only the strategy that
/// made it.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
    },

    #[error("{0} is not supported by this host")]
    Unsupported(&'static str),
}

/// Operations the coordinator needs from the editor.
pub trait WorkspaceHost: Send + Sync + 'static {
    /// Project currently focused in this instance, if any.
    fn focused_project(&self) -> Option<String>;

    /// Open `path`, replacing the current project or in a fresh window.
    fn open_project(
        &self,
        path: &Path,
        new_window: bool,
    ) -> impl Future<Output = Result<(), HostError>> + Send;

    /// Fire the generic activate/handover command.
    fn signal_handover(&self) -> impl Future<Output = Result<(), HostError>> + Send;
}

/// Host backed by the editor's command-line launcher.
///
/// `<editor> --reuse-window <path>` opens in place and
/// `<editor> --new-window <path>` opens a fresh window. The handover
/// signal runs a user-configured command line, split on whitespace.
#[derive(Debug, Clone)]
pub struct EditorCliHost {
    project: String,
    editor: String,
    handover_command: Option<String>,
}

impl EditorCliHost {
    pub fn new(project: impl Into<String>, editor: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            editor: editor.into(),
            handover_command: None,
        }
    }

    pub fn with_handover_command(mut self, command: impl Into<String>) -> Self {
        self.handover_command = Some(command.into());
        self
    }

    async fn run(program: &str, args: &[&str]) -> Result<(), HostError> {
        let command = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        debug!("Running host command: {command}");

        let status = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .status()
            .await
            .map_err(|source| HostError::Spawn {
                command: command.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(HostError::Failed { command, status })
        }
    }
}

impl WorkspaceHost for EditorCliHost {
    /// One process serves exactly one project for its lifetime.
    fn focused_project(&self) -> Option<String> {
        Some(self.project.clone())
    }

    async fn open_project(&self, path: &Path, new_window: bool) -> Result<(), HostError> {
        let flag = if new_window { "--new-window" } else { "--reuse-window" };
        let path = path.to_string_lossy().into_owned();
        info!("Opening {path} via {} {flag}", self.editor);
        Self::run(&self.editor, &[flag, path.as_str()]).await
    }

    async fn signal_handover(&self) -> Result<(), HostError> {
        let Some(command) = self.handover_command.as_deref() else {
            return Err(HostError::Unsupported("handover"));
        };
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            return Err(HostError::Unsupported("handover"));
        };
        let args: Vec<&str> = parts.collect();
        Self::run(program, &args).await
    }
}
