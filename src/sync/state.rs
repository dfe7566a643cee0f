//! Session state: history, live stream and the merged visible sequence.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::message::Message;

/// Where a visible entry came from. History sorts before live on equal
/// timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Origin {
    History,
    Live,
}

/// Total order of the visible sequence: timestamp, then origin, then arrival.
type SortKey = (DateTime<Utc>, Origin, u64);

/// Result of applying one live message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    /// Appended at the end (the in-order fast path).
    Appended,
    /// Arrived out of timestamp order and was inserted at this index.
    Inserted(usize),
    /// The id was already visible; nothing changed.
    Duplicate,
}

/// Per-session message state.
///
/// `visible` is kept sorted by [`SortKey`] at all times. Ids are unique
/// across the whole state; the first copy of an id wins.
#[derive(Debug, Default)]
pub struct SessionState {
    history: Vec<Message>,
    live: Vec<Message>,
    visible: Vec<Message>,
    keys: Vec<SortKey>,
    seen: HashSet<String>,
    history_loaded: bool,
    next_seq: u64,
}

impl SessionState {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the one-time history load into the visible sequence.
    ///
    /// Entries whose id is already known (duplicates inside the history, or
    /// messages the live stream delivered first) are skipped. Returns the
    /// number of entries added. A second call is ignored.
    pub fn apply_history(&mut self, messages: Vec<Message>) -> usize {
        if self.history_loaded {
            tracing::warn!("History already applied; ignoring second load");
            return 0;
        }
        self.history_loaded = true;

        let mut incoming: Vec<(SortKey, Message)> = Vec::with_capacity(messages.len());
        for message in messages {
            if !self.seen.insert(message.id.clone()) {
                tracing::debug!(id = %message.id, "Skipping duplicate history entry");
                continue;
            }
            let key = (message.created_at, Origin::History, self.bump_seq());
            self.history.push(message.clone());
            incoming.push((key, message));
        }
        incoming.sort_by(|a, b| a.0.cmp(&b.0));

        let added = incoming.len();
        if added == 0 {
            return 0;
        }

        // Linear merge of two sorted runs.
        let existing_keys = std::mem::take(&mut self.keys);
        let existing = std::mem::take(&mut self.visible);
        let mut keys = Vec::with_capacity(existing_keys.len() + added);
        let mut visible = Vec::with_capacity(existing.len() + added);

        let mut old = existing_keys.into_iter().zip(existing).peekable();
        let mut new = incoming.into_iter().peekable();
        loop {
            let take_new = match (old.peek(), new.peek()) {
                (Some((old_key, _)), Some((new_key, _))) => new_key <= old_key,
                (None, Some(_)) => true,
                (Some(_), None) => false,
                (None, None) => break,
            };
            let next = if take_new { new.next() } else { old.next() };
            if let Some((key, message)) = next {
                keys.push(key);
                visible.push(message);
            }
        }

        self.keys = keys;
        self.visible = visible;
        added
    }

    /// Apply one message from the live stream.
    pub fn push_live(&mut self, message: Message) -> LiveOutcome {
        if !self.seen.insert(message.id.clone()) {
            return LiveOutcome::Duplicate;
        }

        let key = (message.created_at, Origin::Live, self.bump_seq());
        self.live.push(message.clone());

        if self.keys.last().is_none_or(|last| *last <= key) {
            self.keys.push(key);
            self.visible.push(message);
            return LiveOutcome::Appended;
        }

        let index = self.keys.partition_point(|k| *k <= key);
        tracing::debug!(id = %message.id, index, "Inserting out-of-order live message");
        self.keys.insert(index, key);
        self.visible.insert(index, message);
        LiveOutcome::Inserted(index)
    }

    /// The merged, ordered, duplicate-free sequence.
    #[must_use]
    pub fn visible(&self) -> &[Message] {
        &self.visible
    }

    /// History entries that made it into the state, in load order.
    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Live entries accepted so far, in arrival order.
    #[must_use]
    pub fn live(&self) -> &[Message] {
        &self.live
    }

    /// Whether the one-time history merge has happened.
    #[must_use]
    pub fn history_loaded(&self) -> bool {
        self.history_loaded
    }

    /// Whether a message with this id is visible.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Number of visible messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.visible.len()
    }

    /// Whether nothing is visible yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
