//! Queue Service
//!
//! The broker's front door. Producers call [`QueueService::send`], consumers
//! call [`QueueService::get`] and [`QueueService::ack`]; everything else in
//! this crate hangs off those three.
//!
//! ## Send Path
//!
//! A send stores the payload body once, records a transfer-log row per
//! destination region, and acks the producer. Delivery into each region's
//! DEFAULT shards then proceeds independently: the local region is written
//! inline, remote regions are handed to background tasks that retry through
//! the [`QueueSender`]. A crash between the ack and a regional write is
//! recovered from the transfer log.
//!
//! ## Get Path
//!
//! Get long-polls the queue's worker: it keeps asking until it has the
//! requested count or the poll window elapses, then joins each delivered row
//! with its stored body.
//!
//! ## Scheduling
//!
//! The first touch of a queue starts its maintenance loops: cache refresh,
//! timeout sweep, and shard allocation check, each on its own interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use queuehouse_core::{now_ms, MessageBody, MessageType, QueueMessage};
use queuehouse_store::{BufferedMessageCounters, QueueStore, TransferLogEntry};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::error::Result;
use crate::router::Router;
use crate::sender::{QueueSender, RegionTransport};
use crate::worker::AckStatus;
use crate::writer::{QueueWriter, WriteRequest};

/// A message handed to a consumer: queue row bookkeeping joined with the
/// stored payload.
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    /// Id to ack with. Unique to this delivery.
    pub queue_message_id: Uuid,
    /// Stable payload id, shared across redeliveries.
    pub message_id: Uuid,
    pub queue_name: String,
    pub region: String,
    pub queued_at: i64,
    pub content_type: String,
    pub data: Bytes,
}

/// The broker facade: send, get, ack, and the per-queue schedulers.
pub struct QueueService {
    config: Arc<BrokerConfig>,
    store: Arc<dyn QueueStore>,
    router: Arc<Router>,
    sender: Arc<QueueSender>,
    counters: Arc<BufferedMessageCounters>,
    schedulers: Mutex<HashMap<String, Vec<JoinHandle<()>>>>,
}

impl QueueService {
    pub fn new(store: Arc<dyn QueueStore>, config: BrokerConfig) -> Self {
        let config = Arc::new(config);
        let counters = Arc::new(BufferedMessageCounters::new(
            store.clone(),
            config.counter_flush_ms,
        ));
        let router = Arc::new(Router::new(
            store.clone(),
            counters.clone(),
            config.clone(),
        ));
        let writer = Arc::new(QueueWriter::new(store.clone()));
        let sender = Arc::new(QueueSender::new(writer, config.clone()));

        Self {
            config,
            store,
            router,
            sender,
            counters,
            schedulers: Mutex::new(HashMap::new()),
        }
    }

    /// Register the transport for a remote region.
    pub async fn register_transport(&self, region: &str, transport: Arc<dyn RegionTransport>) {
        self.sender.register_transport(region, transport).await;
    }

    /// Produce one message to a queue in one or more regions.
    ///
    /// The payload is stored once and a transfer-log row is recorded per
    /// destination before this returns, which is the producer's durability
    /// ack. The local region's queue row is written inline; remote regions
    /// are delivered by background tasks with retries.
    ///
    /// `delay_ms` and `expiration_ms` are offsets from now.
    pub async fn send(
        &self,
        queue_name: &str,
        dest_regions: &[String],
        content_type: &str,
        body: Bytes,
        delay_ms: Option<i64>,
        expiration_ms: Option<i64>,
    ) -> Result<Uuid> {
        queuehouse_core::validate_queue_name(queue_name)?;
        self.ensure_scheduled(queue_name).await;

        let message_id = Uuid::new_v4();
        self.store
            .write_message_data(message_id, &MessageBody::new(body, content_type))
            .await?;

        let local_region = self.config.region.clone();
        let regions: Vec<String> = if dest_regions.is_empty() {
            vec![local_region.clone()]
        } else {
            dest_regions.to_vec()
        };

        let now = now_ms();
        for dest_region in &regions {
            self.store
                .record_transfer_log(&TransferLogEntry::new(
                    queue_name,
                    &local_region,
                    dest_region,
                    message_id,
                ))
                .await?;

            let request = WriteRequest {
                queue_name: queue_name.to_string(),
                source_region: local_region.clone(),
                dest_region: dest_region.clone(),
                message_id,
                delivery_time: delay_ms.map(|d| now + d),
                expiration_time: expiration_ms.map(|e| now + e),
            };

            if *dest_region == local_region {
                // Inline write; failure is logged, the transfer-log row
                // keeps the message recoverable.
                if let Err(e) = self.sender.send_to_region(request).await {
                    warn!(queue = queue_name, error = %e, "local write failed");
                } else {
                    self.router.worker(queue_name).await.nudge_refresh();
                }
            } else {
                let sender = self.sender.clone();
                let queue = queue_name.to_string();
                let dest = dest_region.clone();
                tokio::spawn(async move {
                    if let Err(e) = sender.send_to_region(request).await {
                        warn!(queue = %queue, dest = %dest, error = %e, "remote send failed");
                    }
                });
            }
        }

        debug!(queue = queue_name, %message_id, regions = regions.len(), "accepted send");
        Ok(message_id)
    }

    /// Take up to `num_requested` messages, long-polling until the count is
    /// reached or `long_poll_ms` elapses. Each returned message is inflight
    /// until acked or swept.
    pub async fn get(
        &self,
        queue_name: &str,
        num_requested: usize,
    ) -> Result<Vec<DeliveredMessage>> {
        queuehouse_core::validate_queue_name(queue_name)?;
        self.ensure_scheduled(queue_name).await;
        let worker = self.router.worker(queue_name).await;

        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.long_poll_ms);
        let pause = Duration::from_millis((self.config.long_poll_ms / 4).max(10));

        let mut rows: Vec<QueueMessage> = Vec::new();
        loop {
            rows.extend(worker.get(num_requested - rows.len()).await?);
            if rows.len() >= num_requested || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(pause).await;
        }

        let mut delivered = Vec::with_capacity(rows.len());
        for row in rows {
            match self.store.load_message_data(row.message_id).await? {
                Some(body) => delivered.push(DeliveredMessage {
                    queue_message_id: row.queue_message_id,
                    message_id: row.message_id,
                    queue_name: row.queue_name,
                    region: row.region,
                    queued_at: row.queued_at,
                    content_type: body.content_type,
                    data: body.blob,
                }),
                None => {
                    // Row without a body: either an expired payload or a
                    // write that never completed. Not deliverable.
                    warn!(
                        queue = queue_name,
                        message_id = %row.message_id,
                        "queue row has no payload, skipping"
                    );
                }
            }
        }
        Ok(delivered)
    }

    /// Acknowledge one delivered message.
    pub async fn ack(&self, queue_name: &str, queue_message_id: Uuid) -> Result<AckStatus> {
        self.router.worker(queue_name).await.ack(queue_message_id).await
    }

    /// Approximate queue depth for one row family.
    pub async fn queue_depth(
        &self,
        queue_name: &str,
        message_type: MessageType,
    ) -> Result<i64> {
        Ok(self.counters.value(queue_name, message_type).await?)
    }

    /// Stop every scheduler task and flush buffered counters.
    pub async fn shutdown(&self) {
        let mut schedulers = self.schedulers.lock().await;
        for (queue, handles) in schedulers.drain() {
            debug!(queue = %queue, "stopping queue schedulers");
            for handle in handles {
                handle.abort();
            }
        }
        if let Err(e) = self.counters.flush().await {
            warn!(error = %e, "counter flush on shutdown failed");
        }
        info!("queue service shut down");
    }

    /// Start the refresh, sweep, and shard-check loops for a queue, once.
    async fn ensure_scheduled(&self, queue_name: &str) {
        let mut schedulers = self.schedulers.lock().await;
        if schedulers.contains_key(queue_name) {
            return;
        }

        let worker = self.router.worker(queue_name).await;
        let mut handles = Vec::with_capacity(3);

        let refresh_every = Duration::from_millis(self.config.queue_refresh_ms);
        let sweep_every =
            Duration::from_millis((self.config.visibility_timeout_ms() as u64 / 2).max(1_000));
        let check_every = Duration::from_millis(self.config.shard_check_interval_ms);

        let w = worker.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh_every);
            loop {
                ticker.tick().await;
                let _ = w.refresh().await;
            }
        }));

        let w = worker.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_every);
            loop {
                ticker.tick().await;
                let _ = w.sweep().await;
            }
        }));

        let w = worker;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_every);
            loop {
                ticker.tick().await;
                let _ = w.check_shards().await;
            }
        }));

        info!(queue = queue_name, "queue schedulers started");
        schedulers.insert(queue_name.to_string(), handles);
    }
}
