//! WebSocket transport with automatic reconnection.
//!
//! One supervisor task owns the socket. It dials, pumps frames in both
//! directions while connected, and on loss waits out a [`Backoff`] delay
//! before dialing again. The outbox survives reconnects, so text submitted
//! while disconnected is delivered once the socket is back.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{
    Backoff, ConnectionState, DEFAULT_OUTBOX_CAPACITY, Fanout, MessageStream, TransportChannel,
    transition,
};
use crate::endpoint::channel_url;
use crate::error::{Result, SyncError};
use crate::message::{Frame, decode_inbound};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default bound on a single dial.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for [`WebSocketChannel`].
#[derive(Debug, Clone)]
pub struct WebSocketOptions {
    /// Maximum number of queued outbound submissions.
    pub outbox_capacity: usize,
    /// Delay policy between reconnect attempts.
    pub backoff: Backoff,
    /// Bound on a single connection attempt.
    pub connect_timeout: Duration,
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        Self {
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            backoff: Backoff::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Transport channel speaking JSON frames over a WebSocket.
///
/// Cheap to clone; clones share the same connection.
#[derive(Debug, Clone)]
pub struct WebSocketChannel {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    url: Url,
    options: WebSocketOptions,
    state: watch::Sender<ConnectionState>,
    outbox_tx: mpsc::Sender<String>,
    /// Taken by the supervisor on first connect.
    outbox_rx: Mutex<Option<mpsc::Receiver<String>>>,
    subscribers: Fanout,
    cancel: CancellationToken,
    supervisor: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Why a connected session ended.
enum Disconnect {
    Lost,
    Cancelled,
}

impl WebSocketChannel {
    /// Create a channel for the given backend base URL (`http(s)://…`).
    ///
    /// Nothing is dialed until [`TransportChannel::connect`] is called.
    pub fn new(base_url: &Url, options: WebSocketOptions) -> Result<Self> {
        let url = channel_url(base_url)?;
        let (outbox_tx, outbox_rx) = mpsc::channel(options.outbox_capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            inner: Arc::new(Inner {
                url,
                options,
                state,
                outbox_tx,
                outbox_rx: Mutex::new(Some(outbox_rx)),
                subscribers: Fanout::default(),
                cancel: CancellationToken::new(),
                supervisor: tokio::sync::Mutex::new(None),
            }),
        })
    }

    /// The resolved `ws://` or `wss://` endpoint.
    pub fn url(&self) -> &Url {
        &self.inner.url
    }
}

#[async_trait]
impl TransportChannel for WebSocketChannel {
    async fn connect(&self) -> Result<()> {
        let first_dial = {
            let mut supervisor = self.inner.supervisor.lock().await;
            if self.inner.cancel.is_cancelled() {
                return Err(SyncError::NotConnected);
            }
            if supervisor.is_some() {
                return Ok(());
            }

            let Some(outbox) = self
                .inner
                .outbox_rx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            else {
                return Err(SyncError::NotConnected);
            };

            let (report, first_dial) = oneshot::channel();
            let inner = Arc::clone(&self.inner);
            *supervisor = Some(tokio::spawn(async move {
                inner.supervise(outbox, report).await;
            }));
            first_dial
        };

        // The supervisor owns the connection from here on; dropping this
        // future only stops waiting for the first result.
        first_dial.await.unwrap_or(Err(SyncError::NotConnected))
    }

    fn send(&self, text: &str) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(SyncError::NotConnected);
        }
        self.inner
            .outbox_tx
            .try_send(text.to_owned())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SyncError::OutboxFull,
                mpsc::error::TrySendError::Closed(_) => SyncError::NotConnected,
            })
    }

    fn subscribe(&self) -> MessageStream {
        self.inner.subscribers.subscribe()
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    async fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.subscribers.close();
        drop(
            self.inner
                .outbox_rx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let handle = self.inner.supervisor.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "WebSocket supervisor ended abnormally");
            }
        }

        transition(&self.inner.state, ConnectionState::Disconnected);
        tracing::info!(url = %self.inner.url, "WebSocket channel closed");
    }
}

impl Inner {
    async fn dial(&self) -> Result<Socket> {
        let attempt = tokio::time::timeout(
            self.options.connect_timeout,
            connect_async(self.url.as_str()),
        );
        match attempt.await {
            Ok(Ok((socket, _response))) => Ok(socket),
            Ok(Err(e)) => Err(SyncError::Connection(e.to_string())),
            Err(_) => Err(SyncError::Connection(format!(
                "connect timed out after {:?}",
                self.options.connect_timeout
            ))),
        }
    }

    async fn supervise(
        &self,
        mut outbox: mpsc::Receiver<String>,
        report: oneshot::Sender<Result<()>>,
    ) {
        let mut report = Some(report);
        // Text that was taken from the outbox but failed to reach the socket.
        let mut unsent: Option<String> = None;
        let mut attempt: u32 = 0;

        loop {
            transition(&self.state, ConnectionState::Connecting);
            let dialed = tokio::select! {
                () = self.cancel.cancelled() => break,
                result = self.dial() => result,
            };

            if dialed.is_ok() {
                transition(&self.state, ConnectionState::Connected);
            }
            if let Some(report) = report.take() {
                let _ = report.send(dialed.as_ref().map(|_| ()).map_err(Clone::clone));
            }

            match dialed {
                Ok(socket) => {
                    attempt = 0;
                    tracing::info!(name: "channel.connected", url = %self.url, "WebSocket connected");

                    match self.pump(socket, &mut outbox, &mut unsent).await {
                        Disconnect::Cancelled => break,
                        Disconnect::Lost => {
                            tracing::warn!(url = %self.url, "WebSocket connection lost");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, attempt, error = %e, "WebSocket connect failed");
                }
            }

            transition(&self.state, ConnectionState::Disconnected);

            let delay = self.options.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            tracing::debug!(delay_ms = delay.as_millis(), attempt, "Scheduling reconnect");

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        transition(&self.state, ConnectionState::Disconnected);
    }

    /// Move frames until the socket drops or the channel is cancelled.
    async fn pump(
        &self,
        socket: Socket,
        outbox: &mut mpsc::Receiver<String>,
        unsent: &mut Option<String>,
    ) -> Disconnect {
        let (mut sink, mut stream) = socket.split();

        if let Some(text) = unsent.take() {
            if let Err(e) = sink.send(WsMessage::text(Frame::send(&text).to_json())).await {
                tracing::warn!(error = %e, "Failed to resend queued message");
                *unsent = Some(text);
                return Disconnect::Lost;
            }
        }

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Disconnect::Cancelled;
                }
                queued = outbox.recv() => {
                    let Some(text) = queued else {
                        return Disconnect::Cancelled;
                    };
                    let frame = Frame::send(&text).to_json();
                    if let Err(e) = sink.send(WsMessage::text(frame)).await {
                        tracing::warn!(error = %e, "Outbound send failed; keeping message queued");
                        *unsent = Some(text);
                        return Disconnect::Lost;
                    }
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(message) = decode_inbound(text.as_str()) {
                            let receivers = self.subscribers.publish(&message);
                            tracing::trace!(id = %message.id, receivers, "Inbound message");
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        tracing::debug!(?frame, "Server closed the WebSocket");
                        return Disconnect::Lost;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket read error");
                        return Disconnect::Lost;
                    }
                    None => return Disconnect::Lost,
                },
            }
        }
    }
}
