//! Buffered Message Counters
//!
//! Queue-depth counters are updated on every write, promotion, ack and
//! requeue. Hitting the store's counter rows for each of those would turn a
//! cheap heuristic into a hot spot, so deltas are buffered in memory and
//! flushed when a cell goes stale.
//!
//! The resulting value is approximate by design: concurrent brokers each
//! hold their own deltas, and a crash loses unflushed deltas. Every consumer
//! of these counters (shard allocation, queue-depth reporting) already
//! tolerates slack.

use std::collections::HashMap;
use std::sync::Arc;

use queuehouse_core::{now_ms, MessageType};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::QueueStore;

struct CounterCell {
    /// Last value read from the store.
    base: i64,
    /// Unflushed local increments.
    increment: i64,
    /// Unflushed local decrements.
    decrement: i64,
    last_written: i64,
}

impl CounterCell {
    fn new(base: i64) -> Self {
        Self {
            base,
            increment: 0,
            decrement: 0,
            last_written: now_ms(),
        }
    }

    fn value(&self) -> i64 {
        self.base + self.increment - self.decrement
    }

    fn stale(&self, flush_interval_ms: i64) -> bool {
        now_ms() - self.last_written >= flush_interval_ms
    }
}

/// Write-buffering wrapper around the store's per-queue message counters.
pub struct BufferedMessageCounters {
    store: Arc<dyn QueueStore>,
    flush_interval_ms: i64,
    cells: Mutex<HashMap<(String, MessageType), CounterCell>>,
}

impl BufferedMessageCounters {
    pub fn new(store: Arc<dyn QueueStore>, flush_interval_ms: i64) -> Self {
        Self {
            store,
            flush_interval_ms,
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub async fn increment(
        &self,
        queue_name: &str,
        message_type: MessageType,
        delta: i64,
    ) -> Result<()> {
        let mut cells = self.cells.lock().await;
        let cell = self.cell(&mut cells, queue_name, message_type).await?;
        cell.increment += delta;
        self.maybe_flush(queue_name, message_type, cell).await
    }

    pub async fn decrement(
        &self,
        queue_name: &str,
        message_type: MessageType,
        delta: i64,
    ) -> Result<()> {
        let mut cells = self.cells.lock().await;
        let cell = self.cell(&mut cells, queue_name, message_type).await?;
        cell.decrement += delta;
        self.maybe_flush(queue_name, message_type, cell).await
    }

    /// Current approximate value: store base plus unflushed local deltas.
    pub async fn value(&self, queue_name: &str, message_type: MessageType) -> Result<i64> {
        let mut cells = self.cells.lock().await;
        let cell = self.cell(&mut cells, queue_name, message_type).await?;
        Ok(cell.value())
    }

    /// Push all unflushed deltas to the store immediately.
    pub async fn flush(&self) -> Result<()> {
        let mut cells = self.cells.lock().await;
        for ((queue_name, message_type), cell) in cells.iter_mut() {
            self.flush_cell(queue_name, *message_type, cell).await?;
        }
        Ok(())
    }

    async fn cell<'a>(
        &self,
        cells: &'a mut HashMap<(String, MessageType), CounterCell>,
        queue_name: &str,
        message_type: MessageType,
    ) -> Result<&'a mut CounterCell> {
        let key = (queue_name.to_string(), message_type);
        if !cells.contains_key(&key) {
            let base = self
                .store
                .message_counter_value(queue_name, message_type)
                .await?
                .unwrap_or(0);
            cells.insert(key.clone(), CounterCell::new(base));
        }
        Ok(cells.get_mut(&key).expect("cell inserted above"))
    }

    async fn maybe_flush(
        &self,
        queue_name: &str,
        message_type: MessageType,
        cell: &mut CounterCell,
    ) -> Result<()> {
        if cell.stale(self.flush_interval_ms) {
            self.flush_cell(queue_name, message_type, cell).await?;
        }
        Ok(())
    }

    async fn flush_cell(
        &self,
        queue_name: &str,
        message_type: MessageType,
        cell: &mut CounterCell,
    ) -> Result<()> {
        if cell.increment > 0 {
            self.store
                .increment_message_counter(queue_name, message_type, cell.increment)
                .await?;
        }
        if cell.decrement > 0 {
            self.store
                .decrement_message_counter(queue_name, message_type, cell.decrement)
                .await?;
        }

        debug!(
            queue = queue_name,
            %message_type,
            increment = cell.increment,
            decrement = cell.decrement,
            "flushed counter deltas"
        );

        cell.base = self
            .store
            .message_counter_value(queue_name, message_type)
            .await?
            .unwrap_or(0);
        cell.increment = 0;
        cell.decrement = 0;
        cell.last_written = now_ms();
        Ok(())
    }
}
