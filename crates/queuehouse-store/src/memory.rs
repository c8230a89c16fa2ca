//! In-Memory Store Backend
//!
//! `MemoryQueueStore` implements [`QueueStore`](crate::QueueStore) with
//! ordered maps behind a single async lock. Message rows live in a
//! `BTreeMap` keyed by queue message id, and since time-ordered ids sort by
//! creation time, range scans come out oldest-first for free, the same way a
//! clustering-ordered column store returns them.
//!
//! This backend exists for tests and single-node deployments. It makes no
//! attempt at durability: state is lost on process exit, which is exactly
//! the failure the broker's refill path is designed to absorb.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use queuehouse_core::{MessageBody, MessageType, QueueMessage, Shard, ShardType};
use tokio::sync::RwLock;
use tracing::trace;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::types::{AuditLogEntry, TransferLogEntry};
use crate::QueueStore;

/// Partition key for message rows: (queue, region, type, shard).
type RowKey = (String, String, MessageType, u64);

/// Family key for shards: (queue, region, type).
type ShardKey = (String, String, ShardType);

#[derive(Default)]
struct Inner {
    /// Message rows, clustered by time-ordered queue message id.
    messages: HashMap<RowKey, BTreeMap<Uuid, QueueMessage>>,

    /// Payload bodies keyed by stable message id.
    bodies: HashMap<Uuid, MessageBody>,

    /// Shard metadata, ordered by shard id.
    shards: HashMap<ShardKey, BTreeMap<u64, Shard>>,

    /// Approximate per-shard fill counters.
    shard_counters: HashMap<(String, ShardType, u64), i64>,

    /// Approximate per-queue message counters.
    message_counters: HashMap<(String, MessageType), i64>,

    audit_logs: Vec<AuditLogEntry>,

    transfer_logs: Vec<TransferLogEntry>,
}

/// In-memory [`QueueStore`] backend.
#[derive(Default)]
pub struct MemoryQueueStore {
    inner: RwLock<Inner>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn row_key(queue: &str, region: &str, message_type: MessageType, shard_id: u64) -> RowKey {
        (queue.to_string(), region.to_string(), message_type, shard_id)
    }

    fn shard_key(queue: &str, region: &str, shard_type: ShardType) -> ShardKey {
        (queue.to_string(), region.to_string(), shard_type)
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn write_message(&self, message: &QueueMessage) -> Result<()> {
        trace!(
            queue = %message.queue_name,
            qmid = %message.queue_message_id,
            shard = message.shard_id,
            "write message"
        );

        let mut inner = self.inner.write().await;
        let key = Self::row_key(
            &message.queue_name,
            &message.region,
            message.message_type,
            message.shard_id,
        );
        inner
            .messages
            .entry(key)
            .or_default()
            .insert(message.queue_message_id, message.clone());
        Ok(())
    }

    async fn load_message(
        &self,
        queue_name: &str,
        region: &str,
        message_type: MessageType,
        shard_id: Option<u64>,
        queue_message_id: Uuid,
    ) -> Result<Option<QueueMessage>> {
        let inner = self.inner.read().await;

        if let Some(shard_id) = shard_id {
            let key = Self::row_key(queue_name, region, message_type, shard_id);
            return Ok(inner
                .messages
                .get(&key)
                .and_then(|rows| rows.get(&queue_message_id))
                .cloned());
        }

        // No shard hint: search every shard of this family.
        for ((q, r, t, _), rows) in inner.messages.iter() {
            if q == queue_name && r == region && *t == message_type {
                if let Some(row) = rows.get(&queue_message_id) {
                    return Ok(Some(row.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn delete_message(
        &self,
        queue_name: &str,
        region: &str,
        message_type: MessageType,
        shard_id: Option<u64>,
        queue_message_id: Uuid,
    ) -> Result<()> {
        trace!(queue = queue_name, qmid = %queue_message_id, ?message_type, "delete message");

        let mut inner = self.inner.write().await;

        if let Some(shard_id) = shard_id {
            let key = Self::row_key(queue_name, region, message_type, shard_id);
            if let Some(rows) = inner.messages.get_mut(&key) {
                rows.remove(&queue_message_id);
            }
            return Ok(());
        }

        for ((q, r, t, _), rows) in inner.messages.iter_mut() {
            if q == queue_name && r == region && *t == message_type {
                if rows.remove(&queue_message_id).is_some() {
                    break;
                }
            }
        }
        Ok(())
    }

    async fn read_messages(
        &self,
        queue_name: &str,
        region: &str,
        message_type: MessageType,
        shard_id: u64,
        since: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<QueueMessage>> {
        let inner = self.inner.read().await;
        let key = Self::row_key(queue_name, region, message_type, shard_id);

        let Some(rows) = inner.messages.get(&key) else {
            return Ok(Vec::new());
        };

        let page: Vec<QueueMessage> = match since {
            Some(cursor) => rows
                .range((std::ops::Bound::Excluded(cursor), std::ops::Bound::Unbounded))
                .take(limit)
                .map(|(_, m)| m.clone())
                .collect(),
            None => rows.values().take(limit).cloned().collect(),
        };
        Ok(page)
    }

    async fn write_message_data(&self, message_id: Uuid, body: &MessageBody) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.bodies.insert(message_id, body.clone());
        Ok(())
    }

    async fn load_message_data(&self, message_id: Uuid) -> Result<Option<MessageBody>> {
        let inner = self.inner.read().await;
        Ok(inner.bodies.get(&message_id).cloned())
    }

    async fn delete_message_data(&self, message_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.bodies.remove(&message_id);
        Ok(())
    }

    async fn create_shard(&self, shard: &Shard) -> Result<()> {
        trace!(
            queue = %shard.queue_name,
            shard_type = %shard.shard_type,
            shard_id = shard.shard_id,
            "create shard"
        );

        let mut inner = self.inner.write().await;
        let key = Self::shard_key(&shard.queue_name, &shard.region, shard.shard_type);
        inner
            .shards
            .entry(key)
            .or_default()
            .insert(shard.shard_id, shard.clone());
        Ok(())
    }

    async fn list_shards(
        &self,
        queue_name: &str,
        region: &str,
        shard_type: ShardType,
        after_shard_id: Option<u64>,
    ) -> Result<Vec<Shard>> {
        let inner = self.inner.read().await;
        let key = Self::shard_key(queue_name, region, shard_type);

        let Some(shards) = inner.shards.get(&key) else {
            return Ok(Vec::new());
        };

        let list = match after_shard_id {
            Some(after) => shards
                .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                .map(|(_, s)| s.clone())
                .collect(),
            None => shards.values().cloned().collect(),
        };
        Ok(list)
    }

    async fn shard_counter_value(
        &self,
        queue_name: &str,
        shard_type: ShardType,
        shard_id: u64,
    ) -> Result<Option<i64>> {
        let inner = self.inner.read().await;
        Ok(inner
            .shard_counters
            .get(&(queue_name.to_string(), shard_type, shard_id))
            .copied())
    }

    async fn increment_shard_counter(
        &self,
        queue_name: &str,
        shard_type: ShardType,
        shard_id: u64,
        delta: i64,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        *inner
            .shard_counters
            .entry((queue_name.to_string(), shard_type, shard_id))
            .or_insert(0) += delta;
        Ok(())
    }

    async fn decrement_shard_counter(
        &self,
        queue_name: &str,
        shard_type: ShardType,
        shard_id: u64,
        delta: i64,
    ) -> Result<()> {
        self.increment_shard_counter(queue_name, shard_type, shard_id, -delta)
            .await
    }

    async fn message_counter_value(
        &self,
        queue_name: &str,
        message_type: MessageType,
    ) -> Result<Option<i64>> {
        let inner = self.inner.read().await;
        Ok(inner
            .message_counters
            .get(&(queue_name.to_string(), message_type))
            .copied())
    }

    async fn increment_message_counter(
        &self,
        queue_name: &str,
        message_type: MessageType,
        delta: i64,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        *inner
            .message_counters
            .entry((queue_name.to_string(), message_type))
            .or_insert(0) += delta;
        Ok(())
    }

    async fn decrement_message_counter(
        &self,
        queue_name: &str,
        message_type: MessageType,
        delta: i64,
    ) -> Result<()> {
        self.increment_message_counter(queue_name, message_type, -delta)
            .await
    }

    async fn record_audit_log(&self, entry: &AuditLogEntry) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.audit_logs.push(entry.clone());
        Ok(())
    }

    async fn audit_logs(&self, message_id: Uuid) -> Result<Vec<AuditLogEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .audit_logs
            .iter()
            .filter(|e| e.message_id == message_id)
            .cloned()
            .collect())
    }

    async fn record_transfer_log(&self, entry: &TransferLogEntry) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.transfer_logs.push(entry.clone());
        Ok(())
    }

    async fn remove_transfer_log(
        &self,
        queue_name: &str,
        dest_region: &str,
        message_id: Uuid,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let before = inner.transfer_logs.len();
        inner.transfer_logs.retain(|e| {
            !(e.queue_name == queue_name
                && e.dest_region == dest_region
                && e.message_id == message_id)
        });

        if inner.transfer_logs.len() == before {
            return Err(StoreError::TransferLogNotFound {
                queue_name: queue_name.to_string(),
                dest_region: dest_region.to_string(),
                message_id,
            });
        }
        Ok(())
    }

    async fn all_transfer_logs(&self) -> Result<Vec<TransferLogEntry>> {
        let inner = self.inner.read().await;
        Ok(inner.transfer_logs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuehouse_core::new_queue_message_id;

    fn message(queue: &str, shard_id: u64) -> QueueMessage {
        QueueMessage::new_default(queue, "us-east", Uuid::new_v4(), shard_id)
    }

    #[tokio::test]
    async fn test_write_load_delete_roundtrip() {
        let store = MemoryQueueStore::new();
        let msg = message("orders", 1);

        store.write_message(&msg).await.unwrap();

        let loaded = store
            .load_message(
                "orders",
                "us-east",
                MessageType::Default,
                Some(1),
                msg.queue_message_id,
            )
            .await
            .unwrap();
        assert_eq!(loaded, Some(msg.clone()));

        // Load without a shard hint searches across shards
        let loaded = store
            .load_message(
                "orders",
                "us-east",
                MessageType::Default,
                None,
                msg.queue_message_id,
            )
            .await
            .unwrap();
        assert_eq!(loaded, Some(msg.clone()));

        store
            .delete_message(
                "orders",
                "us-east",
                MessageType::Default,
                None,
                msg.queue_message_id,
            )
            .await
            .unwrap();

        let loaded = store
            .load_message(
                "orders",
                "us-east",
                MessageType::Default,
                None,
                msg.queue_message_id,
            )
            .await
            .unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_read_messages_is_time_ordered_and_resumable() {
        let store = MemoryQueueStore::new();

        let mut ids = Vec::new();
        for _ in 0..5 {
            let msg = message("orders", 1);
            ids.push(msg.queue_message_id);
            store.write_message(&msg).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let first = store
            .read_messages("orders", "us-east", MessageType::Default, 1, None, 3)
            .await
            .unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(
            first.iter().map(|m| m.queue_message_id).collect::<Vec<_>>(),
            ids[0..3]
        );

        // Resume from the last id of the first page
        let rest = store
            .read_messages(
                "orders",
                "us-east",
                MessageType::Default,
                1,
                Some(ids[2]),
                10,
            )
            .await
            .unwrap();
        assert_eq!(
            rest.iter().map(|m| m.queue_message_id).collect::<Vec<_>>(),
            ids[3..5]
        );
    }

    #[tokio::test]
    async fn test_list_shards_after_cursor() {
        let store = MemoryQueueStore::new();
        for shard_id in 1..=4 {
            let shard = Shard::new(
                "orders",
                "us-east",
                ShardType::Default,
                shard_id,
                new_queue_message_id(),
            );
            store.create_shard(&shard).await.unwrap();
        }

        let all = store
            .list_shards("orders", "us-east", ShardType::Default, None)
            .await
            .unwrap();
        assert_eq!(all.iter().map(|s| s.shard_id).collect::<Vec<_>>(), [1, 2, 3, 4]);

        let after = store
            .list_shards("orders", "us-east", ShardType::Default, Some(2))
            .await
            .unwrap();
        assert_eq!(after.iter().map(|s| s.shard_id).collect::<Vec<_>>(), [3, 4]);
    }

    #[tokio::test]
    async fn test_counters_increment_and_decrement() {
        let store = MemoryQueueStore::new();

        assert_eq!(
            store
                .shard_counter_value("orders", ShardType::Default, 1)
                .await
                .unwrap(),
            None
        );

        store
            .increment_shard_counter("orders", ShardType::Default, 1, 10)
            .await
            .unwrap();
        store
            .decrement_shard_counter("orders", ShardType::Default, 1, 3)
            .await
            .unwrap();

        assert_eq!(
            store
                .shard_counter_value("orders", ShardType::Default, 1)
                .await
                .unwrap(),
            Some(7)
        );

        store
            .increment_message_counter("orders", MessageType::Default, 2)
            .await
            .unwrap();
        assert_eq!(
            store
                .message_counter_value("orders", MessageType::Default)
                .await
                .unwrap(),
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_remove_missing_transfer_log_errors() {
        let store = MemoryQueueStore::new();
        let message_id = Uuid::new_v4();

        let err = store
            .remove_transfer_log("orders", "eu-west", message_id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TransferLogNotFound { .. }));

        store
            .record_transfer_log(&TransferLogEntry::new(
                "orders", "us-east", "eu-west", message_id,
            ))
            .await
            .unwrap();
        store
            .remove_transfer_log("orders", "eu-west", message_id)
            .await
            .unwrap();
        assert!(store.all_transfer_logs().await.unwrap().is_empty());
    }
}
