//! Toolport Server
//!
//! The business side of an instance: a [`ToolServer`] that answers
//! JSON-RPC tool requests handed over by the transport, and a
//! [`WorkspaceCoordinator`] that makes sure the requested project is the
//! one being served before a tool runs.

pub mod coordinator;
pub mod dispatcher;
pub mod host;
pub mod tools;

pub use coordinator::{
    HandoverPolicy, PROJECT_MARKERS, SwitchFailure, SwitchStrategy, WorkspaceCoordinator, WorkspaceGate,
    WorkspaceState, WorkspaceSwitchResult, classify, format_workspace_error, is_valid_project,
};
pub use dispatcher::{PROTOCOL_VERSION, ToolServer, ToolServerBuilder};
pub use host::{EditorCliHost, HostError, WorkspaceHost};
pub use tools::{ListWorkspacesTool, Tool, ToolError, ToolOutput};
