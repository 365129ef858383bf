//! In-memory chat log.
//!
//! Provides a fixed-capacity, insertion-ordered message store:
//! - Appends go to the end
//! - The oldest entry is evicted once capacity is reached
//! - No ids, timestamps, or lookup; entries are only ever read in order
//!
//! The store is owned by the server loop and handed to request handlers
//! by `&mut`, so it carries no locking.

use std::collections::VecDeque;
use tracing::{debug, info};

/// Default number of messages kept.
pub const DEFAULT_CAPACITY: usize = 10;

/// Result of a store operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreResult {
    /// Message appended, nothing evicted
    Stored,
    /// Message appended after dropping the oldest entry
    Evicted(String),
    /// Message text was empty and was not stored
    Rejected,
}

/// Fixed-capacity FIFO of chat lines
#[derive(Debug)]
pub struct MessageStore {
    entries: VecDeque<String>,
    capacity: usize,
}

impl MessageStore {
    /// Create an empty store holding at most `capacity` messages.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        info!(capacity, "Initializing message store");
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a finished chat line, evicting the oldest one when full.
    pub fn append(&mut self, message: String) -> StoreResult {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(message);

        match evicted {
            Some(oldest) => StoreResult::Evicted(oldest),
            None => StoreResult::Stored,
        }
    }

    /// Store a submission from `username` as `"<username>: <text>"`.
    ///
    /// Empty text is rejected. An empty username is allowed. Line breaks
    /// in either part become spaces, so every entry stays one line.
    pub fn post(&mut self, username: &str, text: &str) -> StoreResult {
        if text.is_empty() {
            debug!(username, "Rejected empty message");
            return StoreResult::Rejected;
        }

        let line = format!("{}: {}", single_line(username), single_line(text));
        debug!(message = %line, "Stored message");
        self.append(line)
    }

    /// Messages from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
