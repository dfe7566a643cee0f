//! Message synchronization.
//!
//! Reconciles the one-shot history read with the live channel stream into a
//! single ordered, duplicate-free visible sequence.
//!
//! # Architecture
//!
//! - [`SessionState`]: history, live and visible sequences plus the seen-id set
//! - [`Synchronizer`]: single-writer event loop publishing [`Snapshot`]s
//!
//! # Example
//!
//! ```rust
//! use chat_sync::message::Message;
//! use chat_sync::sync::SessionState;
//! use chrono::Utc;
//!
//! let mut state = SessionState::new();
//! state.apply_history(vec![Message::new("1", "hi", Utc::now())]);
//! state.push_live(Message::new("2", "yo", Utc::now()));
//! state.push_live(Message::new("2", "yo", Utc::now()));
//!
//! assert_eq!(state.visible().len(), 2);
//! ```

mod state;
mod synchronizer;

pub use state::{LiveOutcome, SessionState};
pub use synchronizer::{Snapshot, SyncOptions, SyncPhase, Synchronizer};
