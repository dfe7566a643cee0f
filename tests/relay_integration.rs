//! End-to-end: synchronizers talking to the relay over real HTTP and WebSocket.

use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use chat_sync::endpoint::parse_base;
use chat_sync::history::{HistoryLoader, HttpHistoryLoader};
use chat_sync::message::{Frame, Message};
use chat_sync::server::{self, RelayState};
use chat_sync::sync::{Snapshot, SyncOptions, SyncPhase, Synchronizer};
use chat_sync::transport::websocket::WebSocketOptions;
use chat_sync::transport::{Backoff, ConnectionState, TransportChannel, WebSocketChannel};
use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Notify, mpsc};
use url::Url;

const WAIT: Duration = Duration::from_secs(10);

async fn spawn_relay(state: RelayState) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, state));
    parse_base(&format!("http://{address}")).unwrap()
}

fn channel(base: &Url) -> Arc<WebSocketChannel> {
    let options = WebSocketOptions {
        backoff: Backoff::fixed(Duration::from_millis(50), Duration::from_millis(200)),
        ..WebSocketOptions::default()
    };
    Arc::new(WebSocketChannel::new(base, options).unwrap())
}

fn start(base: &Url, channel: &Arc<WebSocketChannel>) -> Synchronizer {
    let history = Arc::new(HttpHistoryLoader::new(base, Duration::from_secs(2)).unwrap());
    Synchronizer::start(
        history,
        Arc::clone(channel) as Arc<dyn TransportChannel>,
        SyncOptions::default(),
    )
}

async fn wait_for(sync: &Synchronizer, predicate: impl FnMut(&Snapshot) -> bool) -> Snapshot {
    tokio::time::timeout(WAIT, sync.wait_for(predicate))
        .await
        .expect("timed out waiting for snapshot")
        .expect("synchronizer stopped")
}

async fn wait_connected(sync: &Synchronizer) {
    let mut connection = sync.connection();
    tokio::time::timeout(WAIT, connection.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .expect("timed out waiting for connection")
        .expect("channel dropped");
}

fn texts(snapshot: &Snapshot) -> Vec<&str> {
    snapshot.messages.iter().map(|m| m.text.as_str()).collect()
}

#[tokio::test]
async fn test_history_endpoint_is_served_over_http() {
    let seed = Message::new("seed", "welcome", Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    let base = spawn_relay(RelayState::with_history(vec![seed.clone()])).await;

    let loader = HttpHistoryLoader::new(&base, Duration::from_secs(2)).unwrap();
    assert_eq!(loader.load_history().await.unwrap(), vec![seed]);
}

#[tokio::test]
async fn test_history_then_echoed_submission() {
    let seed = Message::new("seed", "welcome", Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    let base = spawn_relay(RelayState::with_history(vec![seed])).await;

    let ws = channel(&base);
    let sync = start(&base, &ws);

    let snapshot = wait_for(&sync, |s| s.phase == SyncPhase::Live).await;
    assert_eq!(texts(&snapshot), vec!["welcome"]);
    assert!(snapshot.history_warning.is_none());

    wait_connected(&sync).await;
    sync.submit("hello").unwrap();

    let snapshot = wait_for(&sync, |s| s.messages.len() == 2).await;
    assert_eq!(texts(&snapshot), vec!["welcome", "hello"]);
    assert_ne!(snapshot.messages[1].id, "seed");

    sync.shutdown().await;
    ws.close().await;
}

#[tokio::test]
async fn test_two_clients_converge() {
    let base = spawn_relay(RelayState::new()).await;

    let ws_a = channel(&base);
    let ws_b = channel(&base);
    let a = start(&base, &ws_a);
    let b = start(&base, &ws_b);

    wait_connected(&a).await;
    wait_connected(&b).await;

    a.submit("from a").unwrap();
    wait_for(&b, |s| s.messages.len() == 1).await;
    b.submit("from b").unwrap();

    let seen_by_a = wait_for(&a, |s| s.messages.len() == 2).await;
    let seen_by_b = wait_for(&b, |s| s.messages.len() == 2).await;
    assert_eq!(texts(&seen_by_a), vec!["from a", "from b"]);
    assert_eq!(seen_by_a.messages, seen_by_b.messages);

    // A late joiner gets the same sequence from history alone.
    let ws_c = channel(&base);
    let c = start(&base, &ws_c);
    let seen_by_c = wait_for(&c, |s| s.phase == SyncPhase::Live).await;
    assert_eq!(seen_by_c.messages, seen_by_a.messages);

    for (sync, ws) in [(a, ws_a), (b, ws_b), (c, ws_c)] {
        sync.shutdown().await;
        ws.close().await;
    }
}

#[tokio::test]
async fn test_submission_queued_before_connect_is_delivered() {
    let base = spawn_relay(RelayState::new()).await;

    let ws = channel(&base);
    ws.send("early bird").unwrap();

    let sync = start(&base, &ws);
    let snapshot = wait_for(&sync, |s| !s.messages.is_empty()).await;
    assert_eq!(texts(&snapshot), vec!["early bird"]);

    sync.shutdown().await;
    ws.close().await;
}

#[tokio::test]
async fn test_unreachable_backend_degrades_and_keeps_retrying() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);
    let base = parse_base(&format!("http://{address}")).unwrap();

    let ws = channel(&base);
    let sync = start(&base, &ws);

    let snapshot = wait_for(&sync, |s| s.phase == SyncPhase::Live).await;
    assert!(snapshot.messages.is_empty());
    assert!(snapshot.history_warning.is_some());

    // Submissions queue while the channel retries.
    assert!(sync.submit("pending").is_ok());

    sync.shutdown().await;
    ws.close().await;
    assert_eq!(*ws.state().borrow(), ConnectionState::Disconnected);
}

/// Backend whose first socket drops right after one push and whose second
/// upgrade is held until `reopen` is notified.
#[derive(Clone)]
struct FlakyRelay {
    connections: Arc<AtomicUsize>,
    reopen: Arc<Notify>,
    received: mpsc::UnboundedSender<String>,
    first: Message,
    second: Message,
}

async fn flaky_ws(ws: WebSocketUpgrade, State(relay): State<FlakyRelay>) -> Response {
    let connection = relay.connections.fetch_add(1, Ordering::SeqCst);
    if connection > 0 {
        relay.reopen.notified().await;
    }
    ws.on_upgrade(move |socket| flaky_session(socket, relay, connection))
}

async fn flaky_session(mut socket: WebSocket, relay: FlakyRelay, connection: usize) {
    let push = |m: &Message| WsMessage::Text(Frame::NewMessage(m.clone()).to_json().into());

    if connection == 0 {
        // Dropped without a close frame.
        let _ = socket.send(push(&relay.first)).await;
        return;
    }

    // Redeliver the first message alongside the new one.
    let _ = socket.send(push(&relay.first)).await;
    let _ = socket.send(push(&relay.second)).await;

    while let Some(Ok(frame)) = socket.next().await {
        if let WsMessage::Text(text) = frame {
            if let Ok(Frame::SendMessage { text }) = Frame::from_json(text.as_str()) {
                let _ = relay.received.send(text);
            }
        }
    }
}

#[tokio::test]
async fn test_reconnect_flushes_queue_and_dedups_redelivery() {
    let first = Message::new("m1", "first", Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    let second = Message::new("m2", "second", Utc.timestamp_opt(1_700_000_001, 0).unwrap());
    let reopen = Arc::new(Notify::new());
    let (received_tx, mut received) = mpsc::unbounded_channel();

    let relay = FlakyRelay {
        connections: Arc::new(AtomicUsize::new(0)),
        reopen: Arc::clone(&reopen),
        received: received_tx,
        first,
        second,
    };
    let connections = Arc::clone(&relay.connections);
    let app = Router::new()
        .route("/api/messages", get(|| async { Json(Vec::<Message>::new()) }))
        .route("/ws", get(flaky_ws))
        .with_state(relay);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    let base = parse_base(&format!("http://{address}")).unwrap();

    let options = WebSocketOptions {
        backoff: Backoff::fixed(Duration::from_millis(300), Duration::from_millis(300)),
        ..WebSocketOptions::default()
    };
    let ws = Arc::new(WebSocketChannel::new(&base, options).unwrap());
    let sync = start(&base, &ws);
    let mut connection = sync.connection();

    let snapshot = wait_for(&sync, |s| s.messages.len() == 1).await;
    assert_eq!(texts(&snapshot), vec!["first"]);

    // First socket is gone: back off, then redial into the held upgrade.
    tokio::time::timeout(WAIT, connection.wait_for(|s| *s == ConnectionState::Disconnected))
        .await
        .expect("connection loss not observed")
        .unwrap();
    tokio::time::timeout(WAIT, connection.wait_for(|s| *s == ConnectionState::Connecting))
        .await
        .expect("reconnect attempt not observed")
        .unwrap();
    assert_eq!(texts(&sync.snapshot()), vec!["first"]);

    sync.submit("while down").unwrap();
    reopen.notify_one();

    wait_connected(&sync).await;
    assert_eq!(connections.load(Ordering::SeqCst), 2);

    let sent = tokio::time::timeout(WAIT, received.recv())
        .await
        .expect("queued text not flushed")
        .unwrap();
    assert_eq!(sent, "while down");

    // m2 follows the redelivered m1 on the same stream, so both were processed.
    let snapshot = wait_for(&sync, |s| s.messages.iter().any(|m| m.id == "m2")).await;
    let ids: Vec<&str> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);

    sync.shutdown().await;
    ws.close().await;
}
