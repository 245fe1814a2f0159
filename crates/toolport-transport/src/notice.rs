//! Operator-facing notices.
//!
//! Rendering (status bars, popups) belongs to the host; the transport only
//! decides *when* a notice is due and hands it to an [`OperatorNotifier`].

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorNotice {
    /// A relay older than the supported minimum called a tool.
    OutdatedCaller { caller_version: String, minimum: String },
    /// The relay's tool list changed; clients must reconnect to see it.
    ToolsUpdated,
}

impl OperatorNotice {
    pub fn message(&self) -> String {
        match self {
            Self::OutdatedCaller { caller_version, minimum } => format!(
                "The relay package is outdated (current: {caller_version}, required: >= {minimum}). \
                 Update the relay and restart your agent client."
            ),
            Self::ToolsUpdated => "The tool list has been updated. Restart the agent client \
                 so it reconnects and picks up the new tools."
                .to_string(),
        }
    }
}

pub trait OperatorNotifier: Send + Sync + 'static {
    fn notify(&self, notice: OperatorNotice);
}

/// Default notifier: writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl OperatorNotifier for LogNotifier {
    fn notify(&self, notice: OperatorNotice) {
        warn!("{}", notice.message());
    }
}
