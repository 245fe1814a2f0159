//! Pending-call table.
//!
//! Each held HTTP request parks a oneshot sender here under its JSON-RPC
//! id. Replies from the handler are matched by id and complete the HTTP
//! response; replies nobody waits for are dropped with a diagnostic.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use toolport_protocol::{RequestId, RpcMessage};
use tracing::{debug, warn};

/// What happened to an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Completed a held HTTP call.
    Delivered,
    /// No caller was waiting for it.
    Dropped,
}

/// Handle the message handler uses to reply. Cheap to clone.
#[derive(Clone, Default)]
pub struct Outbound {
    pending: Arc<DashMap<RequestId, oneshot::Sender<RpcMessage>>>,
}

impl Outbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a caller under `id`. A second registration for the same id
    /// supersedes the first, whose receiver then sees a closed channel.
    pub(crate) fn register(&self, id: RequestId) -> oneshot::Receiver<RpcMessage> {
        let (tx, rx) = oneshot::channel();
        if self.pending.insert(id.clone(), tx).is_some() {
            warn!("Pending call {id} superseded by a new request with the same id");
        }
        rx
    }

    /// Deliver a reply produced by the handler.
    pub fn send(&self, message: RpcMessage) -> Delivery {
        let Some(id) = message.as_correlated_response().cloned() else {
            debug!("Outbound message has no correlation id; nothing to deliver");
            return Delivery::Dropped;
        };

        match self.pending.remove(&id) {
            Some((_, tx)) => {
                if tx.send(message).is_err() {
                    debug!("Caller for {id} disconnected before the reply arrived");
                }
                Delivery::Delivered
            }
            None => {
                warn!("No pending response for ID: {id}");
                Delivery::Dropped
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Release every held caller. Their HTTP requests fail instead of
    /// waiting forever.
    pub(crate) fn cancel_all(&self) {
        let cancelled = self.pending.len();
        self.pending.clear();
        if cancelled > 0 {
            debug!("Cancelled {cancelled} pending call(s)");
        }
    }
}
