//! End-to-end broker tests over the in-memory store: the full send → get →
//! ack path, timeout redelivery, shard rollover under sustained writes, and
//! cross-region delivery through a shared store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use queuehouse_broker::{
    AckStatus, BrokerConfig, LocalTransport, MultiShardMessageIterator, QueueService,
    QueueWriter, Router, ShardAllocator, WriteRequest,
};
use queuehouse_core::{
    new_queue_message_id, now_ms, MessageBody, MessageType, QueueMessage, Shard, ShardType,
};
use queuehouse_store::{
    AuditAction, AuditLogEntry, AuditStatus, BufferedMessageCounters, MemoryQueueStore,
    QueueStore, Result as StoreResult, TransferLogEntry,
};
use uuid::Uuid;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn fast_config() -> BrokerConfig {
    BrokerConfig {
        region: "us-east".to_string(),
        long_poll_ms: 50,
        queue_refresh_ms: 20,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_full_send_get_ack_path() {
    init_tracing();
    let store = Arc::new(MemoryQueueStore::new());
    let svc = QueueService::new(store.clone(), fast_config());

    let message_id = svc
        .send(
            "orders",
            &[],
            "application/json",
            Bytes::from_static(b"{\"sku\": \"a-1\"}"),
            None,
            None,
        )
        .await
        .unwrap();

    let got = svc.get("orders", 1).await.unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].message_id, message_id);
    assert_eq!(got[0].data, Bytes::from_static(b"{\"sku\": \"a-1\"}"));

    assert_eq!(
        svc.ack("orders", got[0].queue_message_id).await.unwrap(),
        AckStatus::Success
    );

    // Nothing left in either row family
    assert!(svc.get("orders", 1).await.unwrap().is_empty());
    assert_eq!(
        svc.queue_depth("orders", MessageType::Inflight).await.unwrap(),
        0
    );

    // The full audit trail for the message: send, then get, then ack
    let actions: Vec<AuditAction> = store
        .audit_logs(message_id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        [AuditAction::Send, AuditAction::Get, AuditAction::Ack]
    );

    svc.shutdown().await;
}

#[tokio::test]
async fn test_unacked_message_is_redelivered_after_timeout() {
    init_tracing();
    let store = Arc::new(MemoryQueueStore::new());
    let config = Arc::new(BrokerConfig {
        region: "us-east".to_string(),
        visibility_timeout_secs: 1,
        long_poll_ms: 50,
        ..Default::default()
    });
    let counters = Arc::new(BufferedMessageCounters::new(store.clone(), 0));
    let router = Router::new(store.clone(), counters, config);
    let writer = QueueWriter::new(store.clone());

    let message_id = Uuid::new_v4();
    writer
        .write_message(&WriteRequest {
            queue_name: "orders".to_string(),
            source_region: "us-east".to_string(),
            dest_region: "us-east".to_string(),
            message_id,
            delivery_time: None,
            expiration_time: None,
        })
        .await;

    let worker = router.worker("orders").await;

    // Consumer takes the message and crashes before acking
    let first = worker.get(1).await.unwrap();
    assert_eq!(first.len(), 1);
    let first_qmid = first[0].queue_message_id;

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(worker.sweep().await.unwrap(), 1);

    // Same payload comes back under a fresh delivery id
    let second = worker.get(1).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].message_id, message_id);
    assert_ne!(second[0].queue_message_id, first_qmid);

    // The late ack for the first delivery is a harmless no-op
    assert_eq!(worker.ack(first_qmid).await.unwrap(), AckStatus::NotInflight);
    assert_eq!(
        worker.ack(second[0].queue_message_id).await.unwrap(),
        AckStatus::Success
    );
}

#[tokio::test]
async fn test_inflight_message_is_invisible_to_other_consumers() {
    init_tracing();
    let store = Arc::new(MemoryQueueStore::new());
    let svc = QueueService::new(store, fast_config());

    svc.send("orders", &[], "text/plain", Bytes::from_static(b"one"), None, None)
        .await
        .unwrap();

    let first = svc.get("orders", 1).await.unwrap();
    assert_eq!(first.len(), 1);

    // A second consumer polling the same queue sees nothing
    let second = svc.get("orders", 1).await.unwrap();
    assert!(second.is_empty());

    svc.shutdown().await;
}

#[tokio::test]
async fn test_sustained_writes_roll_over_to_new_shards() {
    init_tracing();
    let store = Arc::new(MemoryQueueStore::new());
    let config = Arc::new(BrokerConfig {
        region: "us-east".to_string(),
        max_shard_size: 10,
        shard_allocation_advance_ms: 50,
        ..Default::default()
    });
    let writer = QueueWriter::new(store.clone());
    let allocator = ShardAllocator::new(store.clone(), config);

    let mut sent = Vec::new();
    for i in 0..20 {
        let message_id = Uuid::new_v4();
        writer
            .write_message(&WriteRequest {
                queue_name: "orders".to_string(),
                source_region: "us-east".to_string(),
                dest_region: "us-east".to_string(),
                message_id,
                delivery_time: None,
                expiration_time: None,
            })
            .await;
        sent.push(message_id);

        allocator.check("orders").await.unwrap();
        if i == 9 {
            // Let the future-anchored shard's start instant pass
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
    }

    let shards = store
        .list_shards("orders", "us-east", ShardType::Default, None)
        .await
        .unwrap();
    assert!(shards.len() >= 2, "expected rollover, got {} shards", shards.len());

    // Later writes landed in the newest shard whose anchor has passed. The
    // very last shard may be a just-allocated future one, still empty.
    let open = shards
        .iter()
        .filter(|s| s.start_time_ms() <= now_ms())
        .next_back()
        .unwrap();
    assert!(open.shard_id > 1);
    let open_fill = store
        .shard_counter_value("orders", ShardType::Default, open.shard_id)
        .await
        .unwrap()
        .unwrap_or(0);
    assert!(open_fill > 0);

    // A scan across all shards still yields every message in send order
    let mut iter = MultiShardMessageIterator::new(
        store,
        "orders",
        "us-east",
        MessageType::Default,
        None,
        None,
        5,
    )
    .await
    .unwrap();
    let mut seen = Vec::new();
    while let Some(msg) = iter.next().await.unwrap() {
        seen.push(msg.message_id);
    }
    assert_eq!(seen, sent);
}

#[tokio::test]
async fn test_cross_region_send_delivers_and_clears_transfer_log() {
    init_tracing();
    // Both regions back onto one replicated store, as a multi-region
    // column store would present it.
    let store = Arc::new(MemoryQueueStore::new());

    let east = QueueService::new(store.clone(), fast_config());
    let west = QueueService::new(
        store.clone(),
        BrokerConfig {
            region: "eu-west".to_string(),
            long_poll_ms: 50,
            queue_refresh_ms: 20,
            ..Default::default()
        },
    );

    let west_writer = Arc::new(QueueWriter::new(store.clone()));
    east.register_transport("eu-west", Arc::new(LocalTransport::new(west_writer)))
        .await;

    let message_id = east
        .send(
            "orders",
            &["eu-west".to_string()],
            "text/plain",
            Bytes::from_static(b"abroad"),
            None,
            None,
        )
        .await
        .unwrap();

    // Remote delivery is asynchronous; poll until it lands
    let mut got = Vec::new();
    for _ in 0..20 {
        got = west.get("orders", 1).await.unwrap();
        if !got.is_empty() {
            break;
        }
    }
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].message_id, message_id);
    assert_eq!(got[0].region, "eu-west");

    // Durable receipt in the destination cleared the in-transit marker
    assert!(store.all_transfer_logs().await.unwrap().is_empty());

    // Nothing was queued in the source region
    assert!(east.get("orders", 1).await.unwrap().is_empty());

    east.shutdown().await;
    west.shutdown().await;
}

/// Store decorator that injects faults into selected operations, standing in
/// for a partial backend outage mid-request.
struct FaultyStore {
    inner: Arc<MemoryQueueStore>,
    inflight_write_failures: AtomicU32,
    fail_message_counter_updates: bool,
}

impl FaultyStore {
    fn counter_outage<T>(&self) -> Option<StoreResult<T>> {
        if self.fail_message_counter_updates {
            Some(Err(queuehouse_store::StoreError::Unavailable(
                "simulated counter outage".to_string(),
            )))
        } else {
            None
        }
    }
}

#[async_trait]
impl QueueStore for FaultyStore {
    async fn write_message(&self, message: &QueueMessage) -> StoreResult<()> {
        if message.message_type == MessageType::Inflight {
            let left = self.inflight_write_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.inflight_write_failures.store(left - 1, Ordering::SeqCst);
                return Err(queuehouse_store::StoreError::Unavailable(
                    "simulated outage".to_string(),
                ));
            }
        }
        self.inner.write_message(message).await
    }

    async fn load_message(
        &self,
        queue_name: &str,
        region: &str,
        message_type: MessageType,
        shard_id: Option<u64>,
        queue_message_id: Uuid,
    ) -> StoreResult<Option<QueueMessage>> {
        self.inner
            .load_message(queue_name, region, message_type, shard_id, queue_message_id)
            .await
    }

    async fn delete_message(
        &self,
        queue_name: &str,
        region: &str,
        message_type: MessageType,
        shard_id: Option<u64>,
        queue_message_id: Uuid,
    ) -> StoreResult<()> {
        self.inner
            .delete_message(queue_name, region, message_type, shard_id, queue_message_id)
            .await
    }

    async fn read_messages(
        &self,
        queue_name: &str,
        region: &str,
        message_type: MessageType,
        shard_id: u64,
        since: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Vec<QueueMessage>> {
        self.inner
            .read_messages(queue_name, region, message_type, shard_id, since, limit)
            .await
    }

    async fn write_message_data(&self, message_id: Uuid, body: &MessageBody) -> StoreResult<()> {
        self.inner.write_message_data(message_id, body).await
    }

    async fn load_message_data(&self, message_id: Uuid) -> StoreResult<Option<MessageBody>> {
        self.inner.load_message_data(message_id).await
    }

    async fn delete_message_data(&self, message_id: Uuid) -> StoreResult<()> {
        self.inner.delete_message_data(message_id).await
    }

    async fn create_shard(&self, shard: &Shard) -> StoreResult<()> {
        self.inner.create_shard(shard).await
    }

    async fn list_shards(
        &self,
        queue_name: &str,
        region: &str,
        shard_type: ShardType,
        after_shard_id: Option<u64>,
    ) -> StoreResult<Vec<Shard>> {
        self.inner
            .list_shards(queue_name, region, shard_type, after_shard_id)
            .await
    }

    async fn shard_counter_value(
        &self,
        queue_name: &str,
        shard_type: ShardType,
        shard_id: u64,
    ) -> StoreResult<Option<i64>> {
        self.inner
            .shard_counter_value(queue_name, shard_type, shard_id)
            .await
    }

    async fn increment_shard_counter(
        &self,
        queue_name: &str,
        shard_type: ShardType,
        shard_id: u64,
        delta: i64,
    ) -> StoreResult<()> {
        self.inner
            .increment_shard_counter(queue_name, shard_type, shard_id, delta)
            .await
    }

    async fn decrement_shard_counter(
        &self,
        queue_name: &str,
        shard_type: ShardType,
        shard_id: u64,
        delta: i64,
    ) -> StoreResult<()> {
        self.inner
            .decrement_shard_counter(queue_name, shard_type, shard_id, delta)
            .await
    }

    async fn message_counter_value(
        &self,
        queue_name: &str,
        message_type: MessageType,
    ) -> StoreResult<Option<i64>> {
        self.inner
            .message_counter_value(queue_name, message_type)
            .await
    }

    async fn increment_message_counter(
        &self,
        queue_name: &str,
        message_type: MessageType,
        delta: i64,
    ) -> StoreResult<()> {
        if let Some(outage) = self.counter_outage() {
            return outage;
        }
        self.inner
            .increment_message_counter(queue_name, message_type, delta)
            .await
    }

    async fn decrement_message_counter(
        &self,
        queue_name: &str,
        message_type: MessageType,
        delta: i64,
    ) -> StoreResult<()> {
        if let Some(outage) = self.counter_outage() {
            return outage;
        }
        self.inner
            .decrement_message_counter(queue_name, message_type, delta)
            .await
    }

    async fn record_audit_log(&self, entry: &AuditLogEntry) -> StoreResult<()> {
        self.inner.record_audit_log(entry).await
    }

    async fn audit_logs(&self, message_id: Uuid) -> StoreResult<Vec<AuditLogEntry>> {
        self.inner.audit_logs(message_id).await
    }

    async fn record_transfer_log(&self, entry: &TransferLogEntry) -> StoreResult<()> {
        self.inner.record_transfer_log(entry).await
    }

    async fn remove_transfer_log(
        &self,
        queue_name: &str,
        dest_region: &str,
        message_id: Uuid,
    ) -> StoreResult<()> {
        self.inner
            .remove_transfer_log(queue_name, dest_region, message_id)
            .await
    }

    async fn all_transfer_logs(&self) -> StoreResult<Vec<TransferLogEntry>> {
        self.inner.all_transfer_logs().await
    }
}

#[tokio::test]
async fn test_failed_promotion_keeps_message_available() {
    init_tracing();
    let inner = Arc::new(MemoryQueueStore::new());
    let store = Arc::new(FaultyStore {
        inner: inner.clone(),
        inflight_write_failures: AtomicU32::new(1),
        fail_message_counter_updates: false,
    });
    let config = Arc::new(BrokerConfig {
        region: "us-east".to_string(),
        ..Default::default()
    });
    let counters = Arc::new(BufferedMessageCounters::new(store.clone(), 0));
    let router = Router::new(store.clone(), counters, config);

    let writer = QueueWriter::new(store.clone());
    let message_id = Uuid::new_v4();
    writer
        .write_message(&WriteRequest {
            queue_name: "orders".to_string(),
            source_region: "us-east".to_string(),
            dest_region: "us-east".to_string(),
            message_id,
            delivery_time: None,
            expiration_time: None,
        })
        .await;

    let worker = router.worker("orders").await;

    // First get hits the outage: promotion fails, nothing is delivered,
    // and the DEFAULT row survives.
    assert!(worker.get(1).await.unwrap().is_empty());

    let failures: Vec<AuditStatus> = inner
        .audit_logs(message_id)
        .await
        .unwrap()
        .iter()
        .filter(|e| e.action == AuditAction::Get)
        .map(|e| e.status)
        .collect();
    assert!(failures.contains(&AuditStatus::Error));

    // Outage over: the same get succeeds without waiting for a refresh
    let second = worker.get(1).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].message_id, message_id);
}

#[tokio::test]
async fn test_counter_outage_does_not_block_get() {
    init_tracing();
    let inner = Arc::new(MemoryQueueStore::new());
    let store = Arc::new(FaultyStore {
        inner: inner.clone(),
        inflight_write_failures: AtomicU32::new(0),
        fail_message_counter_updates: true,
    });
    let config = Arc::new(BrokerConfig {
        region: "us-east".to_string(),
        ..Default::default()
    });
    // Zero flush interval: every counter update hits the failing store
    let counters = Arc::new(BufferedMessageCounters::new(store.clone(), 0));
    let router = Router::new(store.clone(), counters, config);

    let writer = QueueWriter::new(store.clone());
    let message_id = Uuid::new_v4();
    writer
        .write_message(&WriteRequest {
            queue_name: "orders".to_string(),
            source_region: "us-east".to_string(),
            dest_region: "us-east".to_string(),
            message_id,
            delivery_time: None,
            expiration_time: None,
        })
        .await;

    // Promotion succeeds and the batch reaches the consumer even though the
    // advisory counters cannot be updated.
    let worker = router.worker("orders").await;
    let got = worker.get(1).await.unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].message_id, message_id);

    // The row really moved: DEFAULT gone, INFLIGHT live
    assert!(inner
        .load_message(
            "orders",
            "us-east",
            MessageType::Inflight,
            None,
            got[0].queue_message_id,
        )
        .await
        .unwrap()
        .is_some());
    assert!(inner
        .read_messages("orders", "us-east", MessageType::Default, 1, None, 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_counter_outage_does_not_block_sweep() {
    init_tracing();
    let inner = Arc::new(MemoryQueueStore::new());
    let store = Arc::new(FaultyStore {
        inner: inner.clone(),
        inflight_write_failures: AtomicU32::new(0),
        fail_message_counter_updates: true,
    });
    let config = Arc::new(BrokerConfig {
        region: "us-east".to_string(),
        visibility_timeout_secs: 1,
        ..Default::default()
    });
    let counters = Arc::new(BufferedMessageCounters::new(store.clone(), 0));
    let router = Router::new(store.clone(), counters, config);

    // An inflight row whose visibility window elapsed long ago
    let shard = Shard::new(
        "orders",
        "us-east",
        ShardType::Inflight,
        1,
        new_queue_message_id(),
    );
    inner.create_shard(&shard).await.unwrap();
    let stuck = QueueMessage {
        message_id: Uuid::new_v4(),
        queue_message_id: new_queue_message_id(),
        queue_name: "orders".to_string(),
        region: "us-east".to_string(),
        message_type: MessageType::Inflight,
        shard_id: 1,
        queued_at: now_ms() - 3_600_000,
        inflight_at: now_ms() - 3_600_000,
        expires_at: None,
    };
    inner.write_message(&stuck).await.unwrap();

    let worker = router.worker("orders").await;
    assert_eq!(worker.sweep().await.unwrap(), 1);

    // The replacement DEFAULT row is durable despite the counter outage
    let defaults = inner
        .read_messages("orders", "us-east", MessageType::Default, 1, None, 10)
        .await
        .unwrap();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].message_id, stuck.message_id);
}
