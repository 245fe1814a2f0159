//! Transport tests over real HTTP on OS-assigned ports.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::mpsc;
use toolport_protocol::{RequestId, RpcMessage, RpcResponse, VersionCheck};
use toolport_registry::RegistryStore;
use toolport_transport::*;

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<OperatorNotice>>,
}

impl RecordingNotifier {
    fn notices(&self) -> Vec<OperatorNotice> {
        self.notices.lock().clone()
    }
}

impl OperatorNotifier for RecordingNotifier {
    fn notify(&self, notice: OperatorNotice) {
        self.notices.lock().push(notice);
    }
}

/// Answers every request with `{"echo": <method>}` from a spawned task.
struct EchoHandler {
    outbound: Outbound,
}

impl MessageHandler for EchoHandler {
    fn on_message(&self, message: RpcMessage) {
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            if let RpcMessage::Request(req) = message {
                let reply = RpcResponse::success(req.id, json!({ "echo": req.method }));
                outbound.send(reply.into());
            }
        });
    }
}

/// Forwards every message to the test body, which replies by hand.
struct ForwardingHandler {
    tx: mpsc::UnboundedSender<RpcMessage>,
}

impl MessageHandler for ForwardingHandler {
    fn on_message(&self, message: RpcMessage) {
        let _ = self.tx.send(message);
    }
}

fn local_config() -> TransportConfig {
    TransportConfig {
        port: 0,
        hostname: "127.0.0.1".into(),
        ..Default::default()
    }
}

async fn start_echo() -> (DuplexTransport, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let transport = DuplexTransport::start_with_notifier(local_config(), notifier.clone())
        .await
        .unwrap();
    transport.set_handler(Arc::new(EchoHandler {
        outbound: transport.outbound(),
    }));
    (transport, notifier)
}

fn url(transport: &DuplexTransport, path: &str) -> String {
    format!("http://127.0.0.1:{}{}", transport.port(), path)
}

async fn post_json(transport: &DuplexTransport, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(url(transport, "/"))
        .json(&body)
        .send()
        .await
        .unwrap()
}

/// Poll until the transport holds `n` pending calls.
async fn wait_pending(outbound: &Outbound, n: usize) {
    for _ in 0..200 {
        if outbound.pending_count() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {n} pending calls, have {}", outbound.pending_count());
}

// ─────────────────────────────────────────────────────────────────────────────
// Routes
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_reports_ok_with_timestamp() {
    let (mut transport, _) = start_echo().await;

    let body: Value = reqwest::get(url(&transport, "/ping"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    let stamp = body["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    assert!(stamp.ends_with('Z'));

    transport.close().await;
}

#[tokio::test]
async fn tools_updated_raises_notice() {
    let (mut transport, notifier) = start_echo().await;

    let resp = reqwest::Client::new()
        .post(url(&transport, "/notify-tools-updated"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "success": true }));
    assert_eq!(notifier.notices(), vec![OperatorNotice::ToolsUpdated]);

    transport.close().await;
}

#[tokio::test]
async fn request_waits_for_matching_reply() {
    let (mut transport, _) = start_echo().await;

    let resp = post_json(
        &transport,
        json!({ "jsonrpc": "2.0", "id": "7", "method": "tools/list" }),
    )
    .await;

    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body,
        json!({ "jsonrpc": "2.0", "id": "7", "result": { "echo": "tools/list" } })
    );
    assert_eq!(transport.outbound().pending_count(), 0);

    transport.close().await;
}

#[tokio::test]
async fn notification_is_acknowledged_immediately() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut transport = DuplexTransport::start(local_config()).await.unwrap();
    transport.set_handler(Arc::new(ForwardingHandler { tx }));

    let resp = post_json(
        &transport,
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
    )
    .await;

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "success": true }));
    let seen = rx.recv().await.unwrap();
    assert!(matches!(seen, RpcMessage::Notification(_)));

    transport.close().await;
}

#[tokio::test]
async fn missing_handler_is_server_error() {
    let mut transport = DuplexTransport::start(local_config()).await.unwrap();

    let resp = post_json(&transport, json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" })).await;

    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.text().await.unwrap(), "No message handler");

    transport.close().await;
}

#[tokio::test]
async fn malformed_body_is_server_error() {
    let (mut transport, _) = start_echo().await;

    let resp = reqwest::Client::new()
        .post(url(&transport, "/"))
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(transport.outbound().pending_count(), 0);

    transport.close().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Correlation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn replies_resolve_out_of_order() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut transport = DuplexTransport::start(local_config()).await.unwrap();
    transport.set_handler(Arc::new(ForwardingHandler { tx }));
    let outbound = transport.outbound();

    let first = {
        let u = url(&transport, "/");
        tokio::spawn(async move {
            reqwest::Client::new()
                .post(u)
                .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "first" }))
                .send()
                .await
                .unwrap()
                .json::<Value>()
                .await
                .unwrap()
        })
    };
    let second = {
        let u = url(&transport, "/");
        tokio::spawn(async move {
            reqwest::Client::new()
                .post(u)
                .json(&json!({ "jsonrpc": "2.0", "id": 2, "method": "second" }))
                .send()
                .await
                .unwrap()
                .json::<Value>()
                .await
                .unwrap()
        })
    };

    rx.recv().await.unwrap();
    rx.recv().await.unwrap();
    wait_pending(&outbound, 2).await;

    let d2 = outbound.send(RpcResponse::success(RequestId::Number(2), json!("two")).into());
    let body2 = second.await.unwrap();
    assert_eq!(d2, Delivery::Delivered);
    assert_eq!(body2["result"], "two");
    assert_eq!(outbound.pending_count(), 1);

    let d1 = outbound.send(RpcResponse::success(RequestId::Number(1), json!("one")).into());
    let body1 = first.await.unwrap();
    assert_eq!(d1, Delivery::Delivered);
    assert_eq!(body1["result"], "one");

    transport.close().await;
}

#[tokio::test]
async fn unknown_reply_is_dropped_without_touching_others() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut transport = DuplexTransport::start(local_config()).await.unwrap();
    transport.set_handler(Arc::new(ForwardingHandler { tx }));
    let outbound = transport.outbound();

    let held = {
        let u = url(&transport, "/");
        tokio::spawn(async move {
            reqwest::Client::new()
                .post(u)
                .json(&json!({ "jsonrpc": "2.0", "id": "keep", "method": "slow" }))
                .send()
                .await
                .unwrap()
                .json::<Value>()
                .await
                .unwrap()
        })
    };
    rx.recv().await.unwrap();
    wait_pending(&outbound, 1).await;

    let stray = transport.send(RpcResponse::success(RequestId::from("nobody"), json!(null)).into());
    assert_eq!(stray, Delivery::Dropped);
    assert_eq!(outbound.pending_count(), 1);

    transport.send(RpcResponse::success(RequestId::from("keep"), json!({ "ok": true })).into());
    let body = held.await.unwrap();
    assert_eq!(body["result"]["ok"], true);

    transport.close().await;
}

#[tokio::test]
async fn error_reply_also_completes_the_call() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut transport = DuplexTransport::start(local_config()).await.unwrap();
    transport.set_handler(Arc::new(ForwardingHandler { tx }));
    let outbound = transport.outbound();

    let held = {
        let u = url(&transport, "/");
        tokio::spawn(async move {
            reqwest::Client::new()
                .post(u)
                .json(&json!({ "jsonrpc": "2.0", "id": 9, "method": "nope" }))
                .send()
                .await
                .unwrap()
                .json::<Value>()
                .await
                .unwrap()
        })
    };
    rx.recv().await.unwrap();
    wait_pending(&outbound, 1).await;

    let err = toolport_protocol::RpcError::method_not_found("nope");
    outbound.send(RpcResponse::error(Some(RequestId::Number(9)), err).into());

    let body = held.await.unwrap();
    assert_eq!(body["error"]["code"], -32601);
    assert_eq!(outbound.pending_count(), 0);

    transport.close().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Version gate
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn outdated_caller_is_served_and_notified_once() {
    let (mut transport, notifier) = start_echo().await;
    let client = reqwest::Client::new();

    for id in 0..3 {
        let resp = client
            .post(url(&transport, "/"))
            .header(RELAY_VERSION_HEADER, "0.0.1")
            .json(&json!({ "jsonrpc": "2.0", "id": id, "method": "tools/call", "params": {} }))
            .send()
            .await
            .unwrap();
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["result"]["echo"], "tools/call");
    }

    assert_eq!(
        notifier.notices(),
        vec![OperatorNotice::OutdatedCaller {
            caller_version: "0.0.1".into(),
            minimum: "0.0.2".into(),
        }]
    );

    transport.close().await;
}

#[tokio::test]
async fn gate_ignores_methods_other_than_tool_calls() {
    let (mut transport, notifier) = start_echo().await;

    post_json(&transport, json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" })).await;

    assert!(notifier.notices().is_empty());
    transport.close().await;
}

mod gate {
    use super::*;

    fn gate(cooldown: Duration) -> VersionGate {
        VersionGate::new(VersionGateConfig {
            minimum: "0.0.2".into(),
            cooldown,
        })
    }

    #[test]
    fn current_caller_passes_quietly() {
        let notifier = RecordingNotifier::default();
        let outcome = gate(Duration::from_secs(60)).inspect(Some("0.0.2"), &notifier);
        assert_eq!(outcome.check, VersionCheck::MeetsMinimum);
        assert!(!outcome.notified);

        let newer = gate(Duration::from_secs(60)).inspect(Some("0.1.0"), &notifier);
        assert_eq!(newer.check, VersionCheck::AboveMinimum);
        assert!(notifier.notices().is_empty());
    }

    #[test]
    fn missing_header_counts_as_outdated() {
        let notifier = RecordingNotifier::default();
        let outcome = gate(Duration::from_secs(60)).inspect(None, &notifier);
        assert_eq!(outcome.check, VersionCheck::BelowMinimum);
        assert!(outcome.notified);
        assert_eq!(
            notifier.notices(),
            vec![OperatorNotice::OutdatedCaller {
                caller_version: "unknown".into(),
                minimum: "0.0.2".into(),
            }]
        );
    }

    #[test]
    fn notices_respect_cooldown() {
        let notifier = RecordingNotifier::default();
        let gate = gate(Duration::from_secs(3600));
        assert!(gate.inspect(Some("0.0.1"), &notifier).notified);
        assert!(!gate.inspect(Some("0.0.1"), &notifier).notified);
        assert_eq!(notifier.notices().len(), 1);
    }

    #[test]
    fn zero_cooldown_notifies_every_time() {
        let notifier = RecordingNotifier::default();
        let gate = gate(Duration::ZERO);
        gate.inspect(Some("0.0.1"), &notifier);
        gate.inspect(Some("0.0.1"), &notifier);
        assert_eq!(notifier.notices().len(), 2);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn bind_conflict_is_reported() {
    let holder = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = holder.local_addr().unwrap().port();

    let err = DuplexTransport::start(TransportConfig {
        port,
        ..local_config()
    })
    .await
    .err()
    .unwrap();

    assert!(matches!(err, TransportError::Bind { port: p, .. } if p == port));
}

#[tokio::test]
async fn invalid_hostname_is_reported() {
    let err = DuplexTransport::start(TransportConfig {
        hostname: "not an address".into(),
        ..local_config()
    })
    .await
    .err()
    .unwrap();

    assert!(matches!(err, TransportError::InvalidAddress(_)));
}

#[tokio::test]
async fn close_unregisters_and_releases_port() {
    let dir = TempDir::new().unwrap();
    let store = RegistryStore::new(dir.path().join("router.json"));

    let mut transport = DuplexTransport::start(TransportConfig {
        workspace: Some("/work/alpha".into()),
        registry: Some(store.clone()),
        ..local_config()
    })
    .await
    .unwrap();
    let port = transport.port();
    store.register("/work/alpha", port, None).await.unwrap();
    store.register("/work/beta", 1, None).await.unwrap();

    transport.close().await;

    assert!(store.find("/work/alpha").await.is_none());
    assert!(store.find("/work/beta").await.is_some());
    assert!(tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_ok());
}

#[tokio::test]
async fn close_keeps_entry_taken_over_by_another_instance() {
    let dir = TempDir::new().unwrap();
    let store = RegistryStore::new(dir.path().join("router.json"));
    let shared = || TransportConfig {
        workspace: Some("/work/alpha".into()),
        registry: Some(store.clone()),
        ..local_config()
    };

    let mut first = DuplexTransport::start(shared()).await.unwrap();
    let mut second = DuplexTransport::start(shared()).await.unwrap();
    store.register("/work/alpha", first.port(), None).await.unwrap();
    store.register("/work/alpha", second.port(), None).await.unwrap();

    first.close().await;
    assert_eq!(store.port_for_workspace("/work/alpha").await, Some(second.port()));

    second.close().await;
    assert!(store.find("/work/alpha").await.is_none());
}

#[tokio::test]
async fn close_releases_held_calls() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut transport = DuplexTransport::start(local_config()).await.unwrap();
    transport.set_handler(Arc::new(ForwardingHandler { tx }));
    let outbound = transport.outbound();

    let held = {
        let u = url(&transport, "/");
        tokio::spawn(async move {
            reqwest::Client::new()
                .post(u)
                .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "never" }))
                .send()
                .await
                .map(|r| r.status())
        })
    };
    rx.recv().await.unwrap();
    wait_pending(&outbound, 1).await;

    tokio::time::timeout(Duration::from_secs(5), transport.close())
        .await
        .unwrap();

    let status = held.await.unwrap();
    if let Ok(status) = status {
        assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    }
    assert_eq!(outbound.pending_count(), 0);
}
