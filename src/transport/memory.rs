//! In-process loopback transport.
//!
//! [`MemoryChannel`] behaves like a tiny single-room server living in the same
//! process: submissions are stamped with a fresh id and timestamp and pushed
//! back to every subscriber. It also lets callers inject arbitrary server
//! pushes and simulate connection loss, which is what the synchronizer tests
//! use it for.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use super::{
    ConnectionState, DEFAULT_OUTBOX_CAPACITY, Fanout, MessageStream, TransportChannel, transition,
};
use crate::error::{Result, SyncError};
use crate::message::Message;

/// Loopback [`TransportChannel`].
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: watch::Sender<ConnectionState>,
    subscribers: Fanout,
    link: Mutex<Link>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct Link {
    outbox: VecDeque<String>,
    /// Every text that reached the "server", in order.
    delivered: Vec<String>,
    /// Echo submissions back as messages.
    echo: bool,
    closed: bool,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    /// Create a disconnected loopback channel that echoes submissions.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_OUTBOX_CAPACITY)
    }

    /// Create a loopback channel with a custom outbox capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                state,
                subscribers: Fanout::default(),
                link: Mutex::new(Link {
                    echo: true,
                    ..Link::default()
                }),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Stop echoing submissions; they are still recorded in [`sent`](Self::sent).
    #[must_use]
    pub fn without_echo(self) -> Self {
        self.link().echo = false;
        self
    }

    /// Push a message to subscribers as if the server had sent it.
    ///
    /// Returns the number of subscribers that received it.
    pub fn deliver(&self, message: Message) -> usize {
        if self.link().closed {
            return 0;
        }
        self.inner.subscribers.publish(&message)
    }

    /// Simulate connection loss. Later submissions queue until `connect`.
    pub fn disconnect(&self) {
        if !self.link().closed {
            transition(&self.inner.state, ConnectionState::Disconnected);
        }
    }

    /// Texts that reached the server side, in submission order.
    pub fn sent(&self) -> Vec<String> {
        self.link().delivered.clone()
    }

    /// Number of submissions waiting for a connection.
    pub fn queued(&self) -> usize {
        self.link().outbox.len()
    }

    fn link(&self) -> std::sync::MutexGuard<'_, Link> {
        self.inner.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_connected(&self) -> bool {
        *self.inner.state.borrow() == ConnectionState::Connected
    }

    /// Record a submission on the server side and echo it if enabled.
    fn accept(&self, link: &mut Link, text: String) {
        let echo = link
            .echo
            .then(|| Message::new(Uuid::new_v4().to_string(), text.as_str(), Utc::now()));
        link.delivered.push(text);
        if let Some(message) = echo {
            self.inner.subscribers.publish(&message);
        }
    }
}

#[async_trait]
impl TransportChannel for MemoryChannel {
    async fn connect(&self) -> Result<()> {
        let mut link = self.link();
        if link.closed {
            return Err(SyncError::NotConnected);
        }
        if self.is_connected() {
            return Ok(());
        }

        transition(&self.inner.state, ConnectionState::Connecting);
        transition(&self.inner.state, ConnectionState::Connected);

        while let Some(text) = link.outbox.pop_front() {
            self.accept(&mut link, text);
        }
        Ok(())
    }

    fn send(&self, text: &str) -> Result<()> {
        let mut link = self.link();
        if link.closed {
            return Err(SyncError::NotConnected);
        }

        if self.is_connected() {
            self.accept(&mut link, text.to_owned());
            Ok(())
        } else if link.outbox.len() < self.inner.capacity {
            link.outbox.push_back(text.to_owned());
            Ok(())
        } else {
            Err(SyncError::OutboxFull)
        }
    }

    fn subscribe(&self) -> MessageStream {
        self.inner.subscribers.subscribe()
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    async fn close(&self) {
        let mut link = self.link();
        link.closed = true;
        link.outbox.clear();
        self.inner.subscribers.close();
        transition(&self.inner.state, ConnectionState::Disconnected);
    }
}
