//! Chat Sync
//!
//! Client core for a single chat room: loads prior messages once over REST,
//! follows new messages over a persistent WebSocket, and exposes the union as
//! one ordered, duplicate-free sequence for a presentation layer to render.
//!
//! # Architecture
//!
//! - **History Loader**: one-shot `GET {backend}/api/messages`
//! - **Transport Channel**: long-lived WebSocket with reconnect and a queued outbox
//! - **Synchronizer**: single-writer merge of history and live stream
//! - **Relay Server**: in-memory reference backend (Axum)
//!
//! # Modules
//!
//! - [`message`]: Message model and wire frames
//! - [`history`]: History loader contract and HTTP implementation
//! - [`transport`]: Transport channel contract, WebSocket and loopback channels
//! - [`sync`]: Session state and the synchronizer
//! - [`server`]: Relay server
//! - [`config`]: Layered configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chat_sync::history::{DEFAULT_HISTORY_TIMEOUT, HttpHistoryLoader};
//! use chat_sync::sync::{SyncOptions, Synchronizer};
//! use chat_sync::transport::{WebSocketChannel, websocket::WebSocketOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let base = chat_sync::endpoint::parse_base("http://localhost:3000")?;
//! let history = Arc::new(HttpHistoryLoader::new(&base, DEFAULT_HISTORY_TIMEOUT)?);
//! let channel = Arc::new(WebSocketChannel::new(&base, WebSocketOptions::default())?);
//!
//! let sync = Synchronizer::start(history, channel, SyncOptions::default());
//! sync.submit("hello")?;
//!
//! for message in sync.visible() {
//!     println!("{}: {}", message.created_at, message.text);
//! }
//! # Ok(())
//! # }
//! ```

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod history;
pub mod message;
pub mod server;
pub mod sync;
pub mod telemetry;
pub mod transport;

pub use error::{Result, SyncError};
pub use message::Message;
pub use sync::{Snapshot, SyncOptions, SyncPhase, Synchronizer};
