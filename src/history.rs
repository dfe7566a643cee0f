//! One-shot history loading.
//!
//! The [`HistoryLoader`] trait is the read contract against the historical
//! store. [`HttpHistoryLoader`] implements it as a single
//! `GET {backend}/api/messages` request.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::endpoint::{HISTORY_PATH, rest_url};
use crate::error::{Result, SyncError};
use crate::message::Message;

/// Default bound on the history read.
pub const DEFAULT_HISTORY_TIMEOUT: Duration = Duration::from_secs(5);

/// Read contract for messages recorded before the session started.
#[async_trait]
pub trait HistoryLoader: Send + Sync {
    /// Fetch the history, oldest first.
    ///
    /// Any failure is reported as [`SyncError::HistoryUnavailable`].
    async fn load_history(&self) -> Result<Vec<Message>>;
}

/// History loader backed by the REST endpoint.
#[derive(Debug, Clone)]
pub struct HttpHistoryLoader {
    url: Url,
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpHistoryLoader {
    /// Create a loader for the given backend base URL.
    pub fn new(base_url: &Url, timeout: Duration) -> Result<Self> {
        Self::with_client(base_url, timeout, reqwest::Client::new())
    }

    /// Create a loader with a custom reqwest client.
    pub fn with_client(base_url: &Url, timeout: Duration, http: reqwest::Client) -> Result<Self> {
        Ok(Self {
            url: rest_url(base_url, HISTORY_PATH)?,
            http,
            timeout,
        })
    }

    /// The resolved history endpoint.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl HistoryLoader for HttpHistoryLoader {
    async fn load_history(&self) -> Result<Vec<Message>> {
        tracing::debug!(url = %self.url, "Fetching message history");

        let response = self
            .http
            .get(self.url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SyncError::HistoryUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HistoryUnavailable(format!(
                "history endpoint returned {status}"
            )));
        }

        let messages: Vec<Message> = response
            .json()
            .await
            .map_err(|e| SyncError::HistoryUnavailable(format!("malformed history: {e}")))?;

        Ok(normalize_history(messages))
    }
}

/// Drop malformed entries and restore oldest-first order.
///
/// The sort is stable, so entries sharing a timestamp keep the store's order.
pub fn normalize_history(messages: Vec<Message>) -> Vec<Message> {
    let total = messages.len();
    let mut messages: Vec<Message> = messages
        .into_iter()
        .filter(Message::is_well_formed)
        .collect();

    if messages.len() != total {
        tracing::warn!(
            dropped = total - messages.len(),
            "Dropped malformed history entries"
        );
    }

    if !messages.is_sorted_by_key(|m| m.created_at) {
        tracing::warn!("History arrived out of order; sorting by createdAt");
        messages.sort_by_key(|m| m.created_at);
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_normalize_sorts_stably_and_filters() {
        let input = vec![
            Message::new("b", "second", at(2)),
            Message::new("a", "first", at(1)),
            Message::new("blank", "   ", at(1)),
            Message::new("c", "tie", at(2)),
        ];

        let out = normalize_history(input);
        let ids: Vec<&str> = out.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_loader_url() {
        let base = Url::parse("http://localhost:4000").unwrap();
        let loader = HttpHistoryLoader::new(&base, DEFAULT_HISTORY_TIMEOUT).unwrap();
        assert_eq!(loader.url().as_str(), "http://localhost:4000/api/messages");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_history_unavailable() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let base = Url::parse("http://127.0.0.1:9").unwrap();
        let loader = HttpHistoryLoader::new(&base, Duration::from_millis(500)).unwrap();

        let err = loader.load_history().await.unwrap_err();
        assert!(matches!(err, SyncError::HistoryUnavailable(_)));
    }
}
