//! Toolport Transport Layer
//!
//! Exposes one HTTP endpoint per instance. A relay POSTs a JSON-RPC
//! envelope; the transport hands it to a [`MessageHandler`] that works
//! asynchronously and replies later through [`Outbound::send`]. Requests
//! (envelopes with an `id`) hold the HTTP response open until the matching
//! reply arrives; notifications are acknowledged at once.
//!
//! The transport also runs an advisory caller-version gate on tool calls
//! and removes the instance's router entry when it closes.

pub mod error;
pub mod gate;
pub mod notice;
pub mod pending;
pub mod server;

pub use error::TransportError;
pub use gate::{GateOutcome, VersionGate, VersionGateConfig};
pub use notice::{LogNotifier, OperatorNotice, OperatorNotifier};
pub use pending::{Delivery, Outbound};
pub use server::{DuplexTransport, MessageHandler, RELAY_VERSION_HEADER, TransportConfig};
