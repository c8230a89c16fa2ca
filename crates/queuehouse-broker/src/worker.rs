//! Queue Worker
//!
//! One worker task owns everything single-writer about a queue in this
//! region: the in-memory message cache, the refresh cursor, promotion of
//! DEFAULT rows to INFLIGHT on Get, and the scheduled sweep and shard
//! checks. Callers talk to it through a [`WorkerHandle`] over an mpsc
//! channel, so per-queue state never needs a lock.
//!
//! Promotion ordering is the heart of the at-least-once contract: the
//! INFLIGHT row is written first (fresh queue message id, same payload
//! message id), read back to verify, and only then is the DEFAULT row
//! deleted. A crash anywhere in that sequence leaves at least one live row.

use std::sync::Arc;

use queuehouse_core::{
    id_timestamp_ms, new_queue_message_id, now_ms, MessageType, QueueMessage, ShardType,
};
use queuehouse_store::{
    AuditAction, AuditLogEntry, AuditStatus, BufferedMessageCounters, QueueStore,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::cache::MessageCache;
use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::iter::MultiShardMessageIterator;
use crate::shards::{ShardAllocator, ShardStrategy};
use crate::sweeper::TimeoutSweeper;

/// Outcome of an ack, from the consumer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// The inflight row existed and was deleted.
    Success,
    /// No inflight row with that id: already acked, already swept back to
    /// DEFAULT, or never handed out. Idempotent acks land here.
    NotInflight,
    /// The row existed but could not be deleted.
    Error,
}

enum WorkerRequest {
    Get {
        num_requested: usize,
        reply: oneshot::Sender<Result<Vec<QueueMessage>>>,
    },
    Ack {
        queue_message_id: uuid::Uuid,
        reply: oneshot::Sender<Result<AckStatus>>,
    },
    Refresh {
        reply: Option<oneshot::Sender<Result<usize>>>,
    },
    TimeoutSweep {
        reply: Option<oneshot::Sender<Result<usize>>>,
    },
    ShardCheck {
        reply: Option<oneshot::Sender<()>>,
    },
}

/// Cheap, cloneable handle to one queue's worker task.
#[derive(Clone)]
pub struct WorkerHandle {
    queue_name: String,
    tx: mpsc::Sender<WorkerRequest>,
}

impl WorkerHandle {
    fn unavailable(&self) -> BrokerError {
        BrokerError::WorkerUnavailable(self.queue_name.clone())
    }

    /// Take up to `num_requested` messages, promoting each to INFLIGHT.
    pub async fn get(&self, num_requested: usize) -> Result<Vec<QueueMessage>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest::Get {
                num_requested,
                reply,
            })
            .await
            .map_err(|_| self.unavailable())?;
        rx.await.map_err(|_| self.unavailable())?
    }

    /// Acknowledge one delivered message by its queue message id.
    pub async fn ack(&self, queue_message_id: uuid::Uuid) -> Result<AckStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest::Ack {
                queue_message_id,
                reply,
            })
            .await
            .map_err(|_| self.unavailable())?;
        rx.await.map_err(|_| self.unavailable())?
    }

    /// Refill the cache from the store. Returns how many rows were pulled in.
    pub async fn refresh(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest::Refresh { reply: Some(reply) })
            .await
            .map_err(|_| self.unavailable())?;
        rx.await.map_err(|_| self.unavailable())?
    }

    /// Fire-and-forget refresh nudge, used after a local produce. Dropped
    /// silently if the worker's mailbox is full; the scheduled refresh will
    /// pick the message up anyway.
    pub fn nudge_refresh(&self) {
        let _ = self.tx.try_send(WorkerRequest::Refresh { reply: None });
    }

    /// Run one timeout sweep. Returns how many messages were requeued.
    pub async fn sweep(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest::TimeoutSweep { reply: Some(reply) })
            .await
            .map_err(|_| self.unavailable())?;
        rx.await.map_err(|_| self.unavailable())?
    }

    /// Run one shard-allocation check.
    pub async fn check_shards(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest::ShardCheck { reply: Some(reply) })
            .await
            .map_err(|_| self.unavailable())?;
        rx.await.map_err(|_| self.unavailable())
    }
}

/// Per-queue actor state. Constructed and run by [`spawn`].
struct QueueWorker {
    queue_name: String,
    region: String,
    store: Arc<dyn QueueStore>,
    strategy: ShardStrategy,
    allocator: ShardAllocator,
    sweeper: TimeoutSweeper,
    counters: Arc<BufferedMessageCounters>,
    cache: MessageCache,
    /// Oldest shard the next refresh scan needs to visit. Advances as
    /// refreshes observe drained shards.
    starting_shard: Option<u64>,
    config: Arc<BrokerConfig>,
    rx: mpsc::Receiver<WorkerRequest>,
}

/// Start the worker task for one queue and return its handle.
pub fn spawn(
    queue_name: &str,
    store: Arc<dyn QueueStore>,
    counters: Arc<BufferedMessageCounters>,
    config: Arc<BrokerConfig>,
) -> WorkerHandle {
    let (tx, rx) = mpsc::channel(64);

    let worker = QueueWorker {
        queue_name: queue_name.to_string(),
        region: config.region.clone(),
        store: store.clone(),
        strategy: ShardStrategy::new(store.clone()),
        allocator: ShardAllocator::new(store.clone(), config.clone()),
        sweeper: TimeoutSweeper::new(store, counters.clone(), config.clone()),
        counters,
        cache: MessageCache::new(config.cache_capacity),
        starting_shard: None,
        config,
        rx,
    };

    let queue_name = worker.queue_name.clone();
    tokio::spawn(worker.run());

    WorkerHandle { queue_name, tx }
}

impl QueueWorker {
    async fn run(mut self) {
        debug!(queue = %self.queue_name, "queue worker started");

        while let Some(request) = self.rx.recv().await {
            match request {
                WorkerRequest::Get {
                    num_requested,
                    reply,
                } => {
                    let _ = reply.send(self.handle_get(num_requested).await);
                }
                WorkerRequest::Ack {
                    queue_message_id,
                    reply,
                } => {
                    let _ = reply.send(self.handle_ack(queue_message_id).await);
                }
                WorkerRequest::Refresh { reply } => {
                    let result = self.handle_refresh().await;
                    if let Err(e) = &result {
                        warn!(queue = %self.queue_name, error = %e, "cache refresh failed");
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                WorkerRequest::TimeoutSweep { reply } => {
                    let result = self.sweeper.sweep(&self.queue_name).await;
                    if let Err(e) = &result {
                        warn!(queue = %self.queue_name, error = %e, "timeout sweep failed");
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                WorkerRequest::ShardCheck { reply } => {
                    if let Err(e) = self.allocator.check(&self.queue_name).await {
                        warn!(queue = %self.queue_name, error = %e, "shard check failed");
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                }
            }
        }

        debug!(queue = %self.queue_name, "queue worker stopped");
    }

    /// Serve a Get: drain cached DEFAULT rows, promoting each to INFLIGHT.
    /// A message that fails promotion is dropped from this batch; its
    /// DEFAULT row survives, so a later Get retries it.
    async fn handle_get(&mut self, num_requested: usize) -> Result<Vec<QueueMessage>> {
        if self.cache.len() < num_requested {
            self.handle_refresh().await?;
        }

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        while delivered.len() < num_requested {
            let Some(message) = self.cache.poll() else {
                break;
            };
            match self.promote(&message).await {
                Ok(inflight) => delivered.push(inflight),
                Err(e) => {
                    warn!(
                        queue = %self.queue_name,
                        qmid = %message.queue_message_id,
                        error = %e,
                        "promotion failed, message stays queued"
                    );
                    self.audit(&message, AuditAction::Get, AuditStatus::Error)
                        .await;
                    failed.push(message);
                }
            }
        }
        // Failed promotions keep their DEFAULT rows; put them back at the
        // head so the next get retries them first.
        for message in failed.into_iter().rev() {
            self.cache.push_front(message);
        }

        // Counters are advisory; their failures never take down a get whose
        // promotions already landed.
        if !delivered.is_empty() {
            let _ = self
                .counters
                .decrement(&self.queue_name, MessageType::Default, delivered.len() as i64)
                .await;
            let _ = self
                .counters
                .increment(&self.queue_name, MessageType::Inflight, delivered.len() as i64)
                .await;
        }

        trace!(
            queue = %self.queue_name,
            requested = num_requested,
            delivered = delivered.len(),
            "served get"
        );
        Ok(delivered)
    }

    /// Move one DEFAULT row to INFLIGHT: write the inflight row, read it
    /// back to confirm it is durable, then delete the original.
    async fn promote(&self, message: &QueueMessage) -> Result<QueueMessage> {
        let inflight_id = new_queue_message_id();
        let shard = self
            .strategy
            .select_shard(
                &self.queue_name,
                &self.region,
                ShardType::Inflight,
                inflight_id,
            )
            .await?;

        // The shard was selected for this specific id; pin it on the row.
        let mut inflight = message.into_inflight(shard.shard_id);
        inflight.queue_message_id = inflight_id;

        self.store.write_message(&inflight).await?;

        let verified = self
            .store
            .load_message(
                &self.queue_name,
                &self.region,
                MessageType::Inflight,
                Some(shard.shard_id),
                inflight_id,
            )
            .await?;
        if verified.is_none() {
            return Err(BrokerError::Store(
                queuehouse_store::StoreError::WriteFailed(
                    "inflight row missing on read-back".to_string(),
                ),
            ));
        }

        let _ = self
            .store
            .increment_shard_counter(&self.queue_name, ShardType::Inflight, shard.shard_id, 1)
            .await;

        if let Err(e) = self
            .store
            .delete_message(
                &self.queue_name,
                &self.region,
                MessageType::Default,
                Some(message.shard_id),
                message.queue_message_id,
            )
            .await
        {
            // Both rows now exist. The sweeper will eventually requeue the
            // inflight copy if it is never acked; the consumer may see the
            // message twice.
            warn!(
                queue = %self.queue_name,
                qmid = %message.queue_message_id,
                error = %e,
                "default row delete failed after promotion"
            );
        } else {
            let _ = self
                .store
                .decrement_shard_counter(
                    &self.queue_name,
                    ShardType::Default,
                    message.shard_id,
                    1,
                )
                .await;
        }

        self.audit(&inflight, AuditAction::Get, AuditStatus::Success)
            .await;
        Ok(inflight)
    }

    /// Delete one INFLIGHT row. Absence is not an error: an ack may race the
    /// sweeper or repeat a previous ack, and both are fine under
    /// at-least-once.
    async fn handle_ack(&self, queue_message_id: uuid::Uuid) -> Result<AckStatus> {
        let Some(message) = self
            .store
            .load_message(
                &self.queue_name,
                &self.region,
                MessageType::Inflight,
                None,
                queue_message_id,
            )
            .await?
        else {
            trace!(queue = %self.queue_name, qmid = %queue_message_id, "ack for unknown inflight row");
            return Ok(AckStatus::NotInflight);
        };

        if let Err(e) = self
            .store
            .delete_message(
                &self.queue_name,
                &self.region,
                MessageType::Inflight,
                Some(message.shard_id),
                queue_message_id,
            )
            .await
        {
            warn!(queue = %self.queue_name, qmid = %queue_message_id, error = %e, "ack delete failed");
            self.audit(&message, AuditAction::Ack, AuditStatus::Error)
                .await;
            return Ok(AckStatus::Error);
        }

        let _ = self
            .store
            .decrement_shard_counter(
                &self.queue_name,
                ShardType::Inflight,
                message.shard_id,
                1,
            )
            .await;
        let _ = self
            .counters
            .decrement(&self.queue_name, MessageType::Inflight, 1)
            .await;

        self.audit(&message, AuditAction::Ack, AuditStatus::Success)
            .await;
        Ok(AckStatus::Success)
    }

    /// Refill the cache from the store, resuming from the newest cached id.
    async fn handle_refresh(&mut self) -> Result<usize> {
        if self.cache.remaining() == 0 {
            return Ok(0);
        }

        // A cache that has sat unrefreshed for several intervals may hold
        // rows another actor already consumed; start over from the store.
        if self.cache.stale(5 * self.config.queue_refresh_ms as i64) {
            debug!(queue = %self.queue_name, "cache stale, clearing before refresh");
            self.cache.clear();
            self.starting_shard = None;
        }

        let mut iter = MultiShardMessageIterator::new(
            self.store.clone(),
            &self.queue_name,
            &self.region,
            MessageType::Default,
            self.starting_shard,
            self.cache.newest(),
            self.config.read_page_size,
        )
        .await?;

        let now = now_ms();
        let mut added = 0;
        while self.cache.remaining() > 0 {
            match iter.next().await? {
                Some(message) => {
                    // A delayed message's id is anchored at its delivery
                    // instant. Rows past `now` are not yet due; stop so the
                    // cursor stays behind them.
                    if id_timestamp_ms(&message.queue_message_id).is_some_and(|ts| ts > now) {
                        break;
                    }
                    if message.expired(now) {
                        self.drop_expired(&message).await;
                        continue;
                    }
                    self.cache.push(message);
                    added += 1;
                }
                None => break,
            }
        }

        self.starting_shard = iter.current_shard_id().or(self.starting_shard);
        self.cache.mark_refreshed();

        if added > 0 {
            trace!(queue = %self.queue_name, added, "cache refreshed");
        }
        Ok(added)
    }

    /// Remove an expired DEFAULT row encountered during a refill.
    async fn drop_expired(&self, message: &QueueMessage) {
        trace!(
            queue = %self.queue_name,
            qmid = %message.queue_message_id,
            "dropping expired message"
        );
        if let Err(e) = self
            .store
            .delete_message(
                &self.queue_name,
                &self.region,
                MessageType::Default,
                Some(message.shard_id),
                message.queue_message_id,
            )
            .await
        {
            warn!(queue = %self.queue_name, error = %e, "expired row delete failed");
            return;
        }
        let _ = self
            .store
            .decrement_shard_counter(
                &self.queue_name,
                ShardType::Default,
                message.shard_id,
                1,
            )
            .await;
        let _ = self
            .counters
            .decrement(&self.queue_name, MessageType::Default, 1)
            .await;
    }

    async fn audit(&self, message: &QueueMessage, action: AuditAction, status: AuditStatus) {
        let entry = AuditLogEntry::new(
            action,
            status,
            &self.queue_name,
            &self.region,
            message.message_id,
            message.queue_message_id,
        );
        if let Err(e) = self.store.record_audit_log(&entry).await {
            warn!(queue = %self.queue_name, error = %e, "audit log write failed");
        }
    }
}
