//! The synchronizer event loop.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::state::{LiveOutcome, SessionState};
use crate::error::{Result, SyncError};
use crate::history::{DEFAULT_HISTORY_TIMEOUT, HistoryLoader};
use crate::message::Message;
use crate::transport::{ConnectionState, MessageStream, TransportChannel};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Created, event loop not yet running.
    #[default]
    Idle,
    /// Waiting for the one-time history read.
    Loading,
    /// History settled (loaded or degraded to empty); live merging only.
    Live,
}

/// Synchronizer tunables.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Upper bound on the history read, whatever the loader does itself.
    pub history_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            history_timeout: DEFAULT_HISTORY_TIMEOUT,
        }
    }
}

/// What the presentation layer sees.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// The visible sequence.
    pub messages: Arc<[Message]>,
    /// Current phase.
    pub phase: SyncPhase,
    /// Set when history could not be loaded and the session started empty.
    pub history_warning: Option<String>,
    /// Incremented on every published change.
    pub revision: u64,
}

/// Merges one-shot history with a live channel into a single visible sequence.
///
/// Owns its [`SessionState`] inside a dedicated task. History completion and
/// channel deliveries are processed one at a time by that task, so duplicate
/// checks and merges never race. Readers get immutable [`Snapshot`]s.
///
/// Dropping the synchronizer, or calling [`shutdown`](Self::shutdown), cancels
/// a pending history read and drops the channel subscription. The channel
/// itself is shared and stays open.
#[derive(Debug)]
pub struct Synchronizer {
    channel: Arc<dyn TransportChannel>,
    snapshot: watch::Receiver<Snapshot>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Synchronizer {
    /// Start a session on the current tokio runtime.
    ///
    /// Must be called from within a runtime; the event loop is spawned onto it.
    /// The channel is asked to connect, which is a no-op if it already is.
    ///
    /// The channel subscription is opened before history is requested, so
    /// nothing delivered during loading is missed.
    pub fn start(
        history: Arc<dyn HistoryLoader>,
        channel: Arc<dyn TransportChannel>,
        options: SyncOptions,
    ) -> Self {
        let (publisher, snapshot) = watch::channel(Snapshot::default());
        let cancel = CancellationToken::new();
        let subscription = channel.subscribe();

        let event_loop = EventLoop {
            state: SessionState::new(),
            publisher,
            phase: SyncPhase::Idle,
            history_warning: None,
            revision: 0,
        };
        let task = tokio::spawn(event_loop.run(
            history,
            Arc::clone(&channel),
            subscription,
            options,
            cancel.clone(),
        ));

        Self {
            channel,
            snapshot,
            cancel,
            task: Some(task),
        }
    }

    /// Validate and forward outbound text.
    ///
    /// Empty or whitespace-only text is rejected before the channel is
    /// touched. Nothing is appended locally; the message becomes visible when
    /// the server echoes it back.
    pub fn submit(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        self.channel.send(text)
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Copy of the visible sequence.
    pub fn visible(&self) -> Vec<Message> {
        self.snapshot.borrow().messages.to_vec()
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        self.snapshot.borrow().phase
    }

    /// Subscribe to snapshot updates.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    /// Observe the underlying channel's connection state.
    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.channel.state()
    }

    /// Wait until a snapshot satisfies `predicate`, or the loop exits.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Option<Snapshot>
    where
        F: FnMut(&Snapshot) -> bool,
    {
        let mut rx = self.snapshot.clone();
        rx.wait_for(|s| predicate(s))
            .await
            .ok()
            .map(|s| (*s).clone())
    }

    /// Tear the session down and wait for the event loop to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Synchronizer task ended abnormally");
            }
        }
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by the spawned task.
struct EventLoop {
    state: SessionState,
    publisher: watch::Sender<Snapshot>,
    phase: SyncPhase,
    history_warning: Option<String>,
    revision: u64,
}

impl EventLoop {
    async fn run(
        mut self,
        history: Arc<dyn HistoryLoader>,
        channel: Arc<dyn TransportChannel>,
        mut subscription: MessageStream,
        options: SyncOptions,
        cancel: CancellationToken,
    ) {
        self.phase = SyncPhase::Loading;
        self.publish();
        tracing::info!(name: "sync.started", "Synchronizer started; loading history");

        let load = tokio::time::timeout(options.history_timeout, history.load_history());
        tokio::pin!(load);
        let connect = channel.connect();
        tokio::pin!(connect);

        let mut loading = true;
        let mut connecting = true;
        let mut subscribed = true;

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                outcome = &mut load, if loading => {
                    loading = false;
                    let result = outcome.unwrap_or_else(|_| {
                        Err(SyncError::HistoryUnavailable(format!(
                            "timed out after {:?}",
                            options.history_timeout
                        )))
                    });
                    self.finish_loading(result);
                }

                outcome = &mut connect, if connecting => {
                    connecting = false;
                    if let Err(e) = outcome {
                        tracing::warn!(error = %e, "Initial connect failed; channel keeps retrying");
                    }
                }

                next = subscription.next(), if subscribed => match next {
                    Some(message) => self.apply_live(message),
                    None => {
                        subscribed = false;
                        tracing::info!("Channel subscription ended");
                    }
                },
            }
        }

        tracing::info!(
            name: "sync.stopped",
            visible = self.state.len(),
            "Synchronizer stopped"
        );
    }

    fn finish_loading(&mut self, result: Result<Vec<Message>>) {
        match result {
            Ok(messages) => {
                let received = messages.len();
                let added = self.state.apply_history(messages);
                tracing::info!(
                    name: "sync.history.loaded",
                    received,
                    added,
                    "History merged"
                );
            }
            Err(e) => {
                tracing::warn!(
                    name: "sync.history.unavailable",
                    error = %e,
                    "History unavailable; continuing with live messages only"
                );
                self.state.apply_history(Vec::new());
                self.history_warning = Some(e.to_string());
            }
        }
        self.phase = SyncPhase::Live;
        self.publish();
    }

    fn apply_live(&mut self, message: Message) {
        let id = message.id.clone();
        match self.state.push_live(message) {
            LiveOutcome::Duplicate => {
                tracing::debug!(id = %id, "Discarding duplicate delivery");
            }
            LiveOutcome::Appended | LiveOutcome::Inserted(_) => self.publish(),
        }
    }

    fn publish(&mut self) {
        self.revision += 1;
        self.publisher.send_replace(Snapshot {
            messages: Arc::from(self.state.visible()),
            phase: self.phase,
            history_warning: self.history_warning.clone(),
            revision: self.revision,
        });
    }
}
