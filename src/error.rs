//! Error types for the synchronization pipeline.

use thiserror::Error;

/// Errors surfaced by the history loader, the transport channel and the
/// synchronizer.
///
/// None of these are fatal to a session: history failures degrade to an empty
/// history, connection failures become [`ConnectionState`] transitions, and
/// submit failures are reported to the caller only.
///
/// [`ConnectionState`]: crate::transport::ConnectionState
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The history read failed, timed out or returned something unusable.
    #[error("history unavailable: {0}")]
    HistoryUnavailable(String),

    /// The real-time connection could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// Outbound text was empty or whitespace-only.
    #[error("message is empty")]
    EmptyMessage,

    /// The channel has been closed and no longer accepts submissions.
    #[error("channel is not connected")]
    NotConnected,

    /// The outbound queue is at capacity.
    #[error("outbound queue is full")]
    OutboxFull,

    /// The configured backend URL cannot be used.
    #[error("invalid backend URL: {0}")]
    InvalidUrl(String),
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

/// Result type alias for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
