//! Real-time transport channel.
//!
//! The [`TransportChannel`] trait is the contract the synchronizer relies on:
//! a long-lived connection with an observable [`ConnectionState`], a
//! non-blocking outbound `send`, and independent inbound subscriptions that
//! yield messages in server order.
//!
//! # Send discipline
//!
//! Outbound text is queued. Submissions made while the connection is down sit
//! in a bounded outbox and are flushed, in order, once the connection is
//! (re)established. A full outbox rejects with [`SyncError::OutboxFull`];
//! [`SyncError::NotConnected`] is reserved for channels that were closed.
//!
//! # Implementations
//!
//! - [`WebSocketChannel`]: JSON frames over a WebSocket with reconnect/backoff
//! - [`MemoryChannel`]: in-process loopback that stamps and echoes submissions
//!
//! [`SyncError::OutboxFull`]: crate::error::SyncError::OutboxFull
//! [`SyncError::NotConnected`]: crate::error::SyncError::NotConnected

pub mod backoff;
pub mod memory;
pub mod websocket;

pub use backoff::Backoff;
pub use memory::MemoryChannel;
pub use websocket::WebSocketChannel;

use std::fmt;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::Result;
use crate::message::Message;

/// Default outbox capacity.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Inbound message stream handed to subscribers.
pub type MessageStream = BoxStream<'static, Message>;

/// Connection lifecycle as observed by subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and no attempt in flight.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Frames can flow in both directions.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// Contract for a long-lived, bidirectional messaging connection.
#[async_trait]
pub trait TransportChannel: Send + Sync {
    /// Start the connection.
    ///
    /// Idempotent: once the channel is managing a connection, further calls
    /// return `Ok(())`. A failed first attempt returns
    /// [`SyncError::Connection`](crate::error::SyncError::Connection) while
    /// reconnection continues in the background.
    async fn connect(&self) -> Result<()>;

    /// Submit outbound text without blocking.
    fn send(&self, text: &str) -> Result<()>;

    /// Open an independent inbound subscription.
    ///
    /// The stream ends only when the channel is closed. Dropping it
    /// unsubscribes.
    fn subscribe(&self) -> MessageStream;

    /// Watch connection-state transitions.
    fn state(&self) -> watch::Receiver<ConnectionState>;

    /// Tear the channel down. Subscriptions end and `send` starts failing
    /// with `NotConnected`.
    async fn close(&self);
}

impl fmt::Debug for dyn TransportChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransportChannel")
    }
}

/// Fan-out of inbound messages to every live subscription.
///
/// Each subscriber gets its own unbounded queue so a slow reader never causes
/// another to miss messages.
#[derive(Debug, Default)]
pub(crate) struct Fanout {
    inner: Mutex<FanoutState>,
}

#[derive(Debug, Default)]
struct FanoutState {
    senders: Vec<mpsc::UnboundedSender<Message>>,
    closed: bool,
}

impl Fanout {
    pub(crate) fn subscribe(&self) -> MessageStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.closed {
            guard.senders.push(tx);
        }
        UnboundedReceiverStream::new(rx).boxed()
    }

    /// Deliver to all subscribers, pruning those that went away.
    pub(crate) fn publish(&self, message: &Message) -> usize {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .senders
            .retain(|tx| tx.send(message.clone()).is_ok());
        guard.senders.len()
    }

    pub(crate) fn close(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.closed = true;
        guard.senders.clear();
    }
}

/// Publish a state only when it differs from the current one.
pub(crate) fn transition(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    state.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            tracing::debug!(from = %current, to = %next, "Connection state transition");
            *current = next;
            true
        }
    });
}
