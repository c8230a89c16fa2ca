//! Queuehouse Store Boundary
//!
//! This crate defines the narrow interface through which the broker talks to
//! its persistent column store, plus an in-memory reference backend.
//!
//! ## What the Store Holds
//!
//! - **Message rows**: queue message occurrences, keyed by
//!   (queue, region, type, shard) and clustered by time-ordered
//!   queue message id. Two row families exist per queue: DEFAULT
//!   (available) and INFLIGHT (delivered, unacked).
//! - **Message bodies**: opaque payload blobs keyed by the stable message id,
//!   written once per message and shared by every occurrence.
//! - **Shard rows**: shard metadata per (queue, region, type).
//! - **Counters**: approximate per-shard fill counters (allocation signal)
//!   and per-queue message counters (queue depth). Advisory only.
//! - **Audit log**: append-only record of Send/Get/Ack/Requeue outcomes.
//! - **Transfer log**: rows marking messages in transit between regions,
//!   removed once the destination region confirms durable receipt.
//!
//! ## Consistency Model
//!
//! The store offers no multi-row transactions. Callers order dependent
//! writes themselves and treat partial failure as a loggable anomaly. All
//! read methods are safe to retry; all writes are upserts or deletes.
//!
//! ## Backends
//!
//! `MemoryQueueStore` keeps everything in ordered maps behind an async lock.
//! It backs the test suite and single-node deployments; a production
//! backend implements the same trait over a distributed column store.

pub mod counters;
pub mod error;
pub mod memory;
pub mod types;

pub use counters::BufferedMessageCounters;
pub use error::{Result, StoreError};
pub use memory::MemoryQueueStore;
pub use types::{AuditAction, AuditLogEntry, AuditStatus, TransferLogEntry};

use async_trait::async_trait;
use queuehouse_core::{MessageBody, MessageType, QueueMessage, Shard, ShardType};
use uuid::Uuid;

/// Durable read/write/delete operations for queue state.
///
/// Every method is fallible and carries no retry logic of its own; the
/// caller decides what a failure means (retry, audit entry, dropped batch).
#[async_trait]
pub trait QueueStore: Send + Sync {
    // ============================================================
    // MESSAGE ROWS
    // ============================================================

    /// Upsert one queue message row into its (queue, region, type, shard)
    /// partition.
    async fn write_message(&self, message: &QueueMessage) -> Result<()>;

    /// Load one row by queue message id. When `shard_id` is `None` the
    /// backend resolves the shard itself (time-ordered ids embed enough
    /// information to locate the shard).
    async fn load_message(
        &self,
        queue_name: &str,
        region: &str,
        message_type: MessageType,
        shard_id: Option<u64>,
        queue_message_id: Uuid,
    ) -> Result<Option<QueueMessage>>;

    /// Delete one row by queue message id. Deleting an absent row is not an
    /// error.
    async fn delete_message(
        &self,
        queue_name: &str,
        region: &str,
        message_type: MessageType,
        shard_id: Option<u64>,
        queue_message_id: Uuid,
    ) -> Result<()>;

    /// Read rows from one shard in time order, strictly newer than `since`,
    /// up to `limit`. Resumable: pass the last returned id as the next
    /// `since`.
    async fn read_messages(
        &self,
        queue_name: &str,
        region: &str,
        message_type: MessageType,
        shard_id: u64,
        since: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<QueueMessage>>;

    // ============================================================
    // MESSAGE BODIES
    // ============================================================

    async fn write_message_data(&self, message_id: Uuid, body: &MessageBody) -> Result<()>;

    async fn load_message_data(&self, message_id: Uuid) -> Result<Option<MessageBody>>;

    async fn delete_message_data(&self, message_id: Uuid) -> Result<()>;

    // ============================================================
    // SHARDS
    // ============================================================

    /// Create a shard row. Creating an already-existing shard id is an
    /// upsert (the allocator is the only writer and is idempotent per tick).
    async fn create_shard(&self, shard: &Shard) -> Result<()>;

    /// List shards for (queue, region, type) in ascending shard id order,
    /// strictly after `after_shard_id` when given.
    async fn list_shards(
        &self,
        queue_name: &str,
        region: &str,
        shard_type: ShardType,
        after_shard_id: Option<u64>,
    ) -> Result<Vec<Shard>>;

    // ============================================================
    // COUNTERS (advisory, eventually consistent)
    // ============================================================

    async fn shard_counter_value(
        &self,
        queue_name: &str,
        shard_type: ShardType,
        shard_id: u64,
    ) -> Result<Option<i64>>;

    async fn increment_shard_counter(
        &self,
        queue_name: &str,
        shard_type: ShardType,
        shard_id: u64,
        delta: i64,
    ) -> Result<()>;

    async fn decrement_shard_counter(
        &self,
        queue_name: &str,
        shard_type: ShardType,
        shard_id: u64,
        delta: i64,
    ) -> Result<()>;

    async fn message_counter_value(
        &self,
        queue_name: &str,
        message_type: MessageType,
    ) -> Result<Option<i64>>;

    async fn increment_message_counter(
        &self,
        queue_name: &str,
        message_type: MessageType,
        delta: i64,
    ) -> Result<()>;

    async fn decrement_message_counter(
        &self,
        queue_name: &str,
        message_type: MessageType,
        delta: i64,
    ) -> Result<()>;

    // ============================================================
    // AUDIT AND TRANSFER LOGS
    // ============================================================

    async fn record_audit_log(&self, entry: &AuditLogEntry) -> Result<()>;

    /// All audit entries for a payload message id, oldest first.
    async fn audit_logs(&self, message_id: Uuid) -> Result<Vec<AuditLogEntry>>;

    async fn record_transfer_log(&self, entry: &TransferLogEntry) -> Result<()>;

    /// Remove the transfer-log row for (queue, dest region, message id).
    /// Returns `StoreError::TransferLogNotFound` when no such row exists.
    async fn remove_transfer_log(
        &self,
        queue_name: &str,
        dest_region: &str,
        message_id: Uuid,
    ) -> Result<()>;

    /// All live transfer-log rows (operational tooling and tests).
    async fn all_transfer_logs(&self) -> Result<Vec<TransferLogEntry>>;
}
