//! In-memory relay server.
//!
//! A reference backend for the synchronizer: `GET /api/messages` returns every
//! message recorded so far and `GET /ws` upgrades to the real-time channel.
//! Each `send_message` frame is stamped with a fresh id and timestamp,
//! recorded, and broadcast as `new_message` to every connected socket,
//! including the sender.

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, broadcast};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::message::{Frame, Message};

/// Broadcast buffer per connected socket.
const BROADCAST_CAPACITY: usize = 1024;

/// Shared relay state.
#[derive(Clone, Debug)]
pub struct RelayState {
    inner: Arc<RelayInner>,
}

#[derive(Debug)]
struct RelayInner {
    messages: RwLock<Vec<Message>>,
    events: broadcast::Sender<Message>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Empty room.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history(Vec::new())
    }

    /// Room pre-populated with messages (oldest first).
    #[must_use]
    pub fn with_history(messages: Vec<Message>) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(RelayInner {
                messages: RwLock::new(messages),
                events,
            }),
        }
    }

    /// Record a message and broadcast it.
    ///
    /// Timestamps never go backwards relative to the last recorded message,
    /// so history and broadcast order agree.
    pub async fn post(&self, text: impl Into<String>) -> Message {
        let mut guard = self.inner.messages.write().await;
        let now = Utc::now();
        let created_at = guard.last().map_or(now, |last| last.created_at.max(now));
        let message = Message::new(Uuid::new_v4().to_string(), text, created_at);

        guard.push(message.clone());
        // No receivers just means nobody is connected.
        let _ = self.inner.events.send(message.clone());
        drop(guard);

        tracing::debug!(id = %message.id, "Message recorded");
        message
    }

    /// All recorded messages, oldest first.
    pub async fn history(&self) -> Vec<Message> {
        self.inner.messages.read().await.clone()
    }

    /// Subscribe to newly recorded messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.inner.events.subscribe()
    }
}

/// Build the relay router.
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/api/messages", get(api_list_messages))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the relay server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let address = config.server.bind_address();
    let listener = TcpListener::bind(&address).await?;

    info!(
        name: "server.started",
        address = %address,
        "Relay server started"
    );

    serve(listener, RelayState::new()).await
}

/// Serve the relay on an already-bound listener.
pub async fn serve(listener: TcpListener, state: RelayState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn api_list_messages(State(state): State<RelayState>) -> Json<Vec<Message>> {
    Json(state.history().await)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: RelayState) {
    let peer = Uuid::new_v4();
    let mut events = state.subscribe();
    let (mut sink, mut stream) = socket.split();

    info!(name: "relay.peer.joined", %peer, "Peer connected");

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => match Frame::from_json(text.as_str()) {
                    Ok(Frame::SendMessage { text }) if !text.trim().is_empty() => {
                        state.post(text).await;
                    }
                    Ok(frame) => {
                        tracing::debug!(%peer, frame = frame.name(), "Ignoring frame");
                    }
                    Err(e) => {
                        tracing::warn!(%peer, error = %e, "Malformed frame from peer");
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(%peer, error = %e, "Peer socket error");
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(message) => {
                    let frame = Frame::NewMessage(message).to_json();
                    if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(%peer, skipped, "Peer lagged behind broadcast");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    info!(name: "relay.peer.left", %peer, "Peer disconnected");
}
