//! Per-Queue Read Cache
//!
//! A small bounded buffer of ready-to-deliver messages, owned exclusively by
//! one queue worker. Get drains it; Refresh refills it from the store when
//! it runs low.
//!
//! The cache is process-local and disposable: losing it costs nothing but a
//! refill, because the DEFAULT rows in the store remain the source of truth.
//! The `newest` cursor remembers the newest queue message id ever pushed so
//! a refill only reads rows the cache has not seen.

use std::collections::VecDeque;

use queuehouse_core::{now_ms, QueueMessage};
use uuid::Uuid;

/// Bounded FIFO of ready messages plus the refill cursor.
pub struct MessageCache {
    capacity: usize,
    entries: VecDeque<QueueMessage>,
    newest: Option<Uuid>,
    last_refreshed: Option<i64>,
}

impl MessageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            newest: None,
            last_refreshed: None,
        }
    }

    /// Append a message and advance the refill cursor.
    pub fn push(&mut self, message: QueueMessage) {
        self.newest = Some(message.queue_message_id);
        self.entries.push_back(message);
    }

    /// Take the oldest cached message, if any.
    pub fn poll(&mut self) -> Option<QueueMessage> {
        self.entries.pop_front()
    }

    /// Put a polled message back at the front, keeping delivery order. The
    /// refill cursor is untouched; the message was already seen.
    pub fn push_front(&mut self, message: QueueMessage) {
        self.entries.push_front(message);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How many more messages a refill may add.
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.entries.len())
    }

    /// Newest queue message id ever pushed; refills read strictly after it.
    pub fn newest(&self) -> Option<Uuid> {
        self.newest
    }

    /// Drop all entries and reset the cursor so the next refill rescans.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.newest = None;
    }

    pub fn mark_refreshed(&mut self) {
        self.last_refreshed = Some(now_ms());
    }

    /// A cache untouched for longer than `max_age_ms` is stale and should be
    /// cleared before the next refill.
    pub fn stale(&self, max_age_ms: i64) -> bool {
        match self.last_refreshed {
            Some(at) => now_ms() - at > max_age_ms,
            None => false,
        }
    }
}
