//! Toolport protocol types.
//!
//! JSON-RPC 2.0 envelopes exchanged between a relay and a per-project
//! instance, the method names both sides agree on, and the caller-version
//! comparison used by the transport's compatibility gate.

pub mod error;
pub mod jsonrpc;
pub mod methods;
pub mod version;

pub use error::{RpcError, RpcErrorCode};
pub use jsonrpc::{
    HandlerResult, RequestId, RpcErrorResponse, RpcMessage, RpcNotification, RpcRequest,
    RpcResponse, RpcSuccessResponse,
};
pub use methods::Methods;
pub use version::{VersionCheck, check_version, compare_versions};
