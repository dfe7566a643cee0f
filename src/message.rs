//! Chat message model and the real-time wire frames that carry it.
//!
//! Every inbound event is normalised to a [`Message`] at the channel boundary,
//! so nothing downstream has to deal with alternative representations.
//!
//! # Wire format
//!
//! Frames are JSON text tagged with `type` and `data`:
//!
//! ```rust
//! use chat_sync::message::Frame;
//!
//! let frame = Frame::send("hello");
//! let json = frame.to_json();
//! assert_eq!(json, r#"{"type":"send_message","data":{"text":"hello"}}"#);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single chat message as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned identifier, stable across history and live delivery.
    pub id: String,
    /// Display content.
    pub text: String,
    /// Server timestamp used for ordering.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message.
    #[must_use]
    pub fn new(id: impl Into<String>, text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            created_at,
        }
    }

    /// Whether the message satisfies the model invariants (non-empty id and text).
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.id.is_empty() && !self.text.trim().is_empty()
    }
}

/// Frames exchanged over the real-time channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum Frame {
    /// Client to server: submit raw text.
    #[serde(rename = "send_message")]
    SendMessage {
        /// Text to post.
        text: String,
    },

    /// Server to client: a message was recorded.
    #[serde(rename = "new_message")]
    NewMessage(Message),
}

impl Frame {
    /// Build an outbound submission frame.
    #[must_use]
    pub fn send(text: impl Into<String>) -> Self {
        Self::SendMessage { text: text.into() }
    }

    /// Serialize to a JSON text frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        // Only strings and a DateTime are serialized here, which cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a JSON text frame.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Frame name as it appears in the `type` tag.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::NewMessage(_) => "new_message",
        }
    }
}

/// Decode an inbound text frame into a [`Message`].
///
/// Returns `None` for anything that is not a well-formed `new_message` frame.
/// The caller decides how loudly to report the rejection.
pub fn decode_inbound(text: &str) -> Option<Message> {
    match Frame::from_json(text) {
        Ok(Frame::NewMessage(message)) if message.is_well_formed() => Some(message),
        Ok(other) => {
            tracing::debug!(frame = other.name(), "Ignoring non-message frame");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Dropping malformed inbound frame");
            None
        }
    }
}
