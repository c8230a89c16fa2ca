//! Multi-Shard Message Iteration
//!
//! Store scans are bounded per shard, so reading a queue means walking its
//! shards oldest-to-newest and paging through each shard's rows in time
//! order. `MultiShardMessageIterator` hides that double loop behind a single
//! resumable `next()`.
//!
//! Because queue message ids are globally time-ordered, one `since` cursor
//! works across shard boundaries: a row in a newer shard always has a newer
//! id than the rows already emitted from older shards.

use std::collections::VecDeque;
use std::sync::Arc;

use queuehouse_core::{MessageType, QueueMessage, Shard};
use queuehouse_store::QueueStore;
use uuid::Uuid;

use crate::error::Result;

/// Forward, time-ordered scan over every shard of one (queue, region, type)
/// family.
pub struct MultiShardMessageIterator {
    store: Arc<dyn QueueStore>,
    queue_name: String,
    region: String,
    message_type: MessageType,
    shards: VecDeque<Shard>,
    current: Option<Shard>,
    cursor: Option<Uuid>,
    buffer: VecDeque<QueueMessage>,
    page_size: usize,
}

impl MultiShardMessageIterator {
    /// Open an iterator.
    ///
    /// `from_shard` skips shards older than the given id (inclusive start);
    /// `since` skips rows at or before the given queue message id.
    pub async fn new(
        store: Arc<dyn QueueStore>,
        queue_name: &str,
        region: &str,
        message_type: MessageType,
        from_shard: Option<u64>,
        since: Option<Uuid>,
        page_size: usize,
    ) -> Result<Self> {
        let mut shards: VecDeque<Shard> = store
            .list_shards(queue_name, region, message_type.into(), None)
            .await?
            .into();

        if let Some(from) = from_shard {
            while matches!(shards.front(), Some(s) if s.shard_id < from) {
                shards.pop_front();
            }
        }

        Ok(Self {
            store,
            queue_name: queue_name.to_string(),
            region: region.to_string(),
            message_type,
            shards,
            current: None,
            cursor: since,
            buffer: VecDeque::new(),
            page_size,
        })
    }

    /// Next message in time order, or `None` when every shard is exhausted.
    pub async fn next(&mut self) -> Result<Option<QueueMessage>> {
        loop {
            if let Some(message) = self.buffer.pop_front() {
                self.cursor = Some(message.queue_message_id);
                return Ok(Some(message));
            }

            if self.current.is_none() {
                match self.shards.pop_front() {
                    Some(shard) => self.current = Some(shard),
                    None => return Ok(None),
                }
            }

            let shard = self.current.as_ref().expect("current shard set above");
            let page = self
                .store
                .read_messages(
                    &self.queue_name,
                    &self.region,
                    self.message_type,
                    shard.shard_id,
                    self.cursor,
                    self.page_size,
                )
                .await?;

            if page.is_empty() {
                // Shard drained; move on.
                self.current = None;
                continue;
            }
            self.buffer.extend(page);
        }
    }

    /// Shard the most recent message came from. Callers persist this as the
    /// starting shard for their next scan so drained shards are skipped.
    pub fn current_shard_id(&self) -> Option<u64> {
        self.current.as_ref().map(|s| s.shard_id)
    }
}
