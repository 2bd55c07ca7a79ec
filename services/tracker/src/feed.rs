//! Bounded, newest-first notification feed.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use st_protocol::GameId;

/// Maximum number of entries kept; older entries are evicted.
pub const FEED_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// The score changed.
    Score,
    /// The lifecycle state changed.
    State,
    /// First update seen for a game, or nothing observable changed.
    Update,
}

/// One immutable feed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedEntry {
    /// Feed-local sequence number; unique within one feed.
    pub id: u64,
    pub game_id: GameId,
    pub kind: FeedKind,
    pub message: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Feed {
    entries: VecDeque<FeedEntry>,
    capacity: usize,
    next_id: u64,
}

impl Default for Feed {
    fn default() -> Self {
        Self::with_capacity(FEED_CAPACITY)
    }
}

impl Feed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    /// Insert at the head, evicting the oldest entries past capacity.
    pub fn push(&mut self, game_id: GameId, kind: FeedKind, message: String) -> FeedEntry {
        let entry = FeedEntry {
            id: self.next_id,
            game_id,
            kind,
            message,
            received_at: Utc::now(),
        };
        self.next_id += 1;
        self.entries.push_front(entry.clone());
        self.entries.truncate(self.capacity);
        entry
    }

    /// Entries, newest first.
    pub fn entries(&self) -> Vec<FeedEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove one entry by id.  Returns whether it was present.
    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }
}
