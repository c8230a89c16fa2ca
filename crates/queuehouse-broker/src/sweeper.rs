//! Timeout Sweeper
//!
//! Reclaims messages whose consumer failed to ack within the visibility
//! window. Each sweep walks a queue's INFLIGHT shards oldest-to-newest and,
//! for every row past the window, writes a replacement DEFAULT row (same
//! payload message id, fresh queue message id) before deleting the INFLIGHT
//! row. Write-then-delete ordering favors duplication over loss: a crash
//! between the two steps leaves both rows live, and at-least-once absorbs
//! the duplicate.
//!
//! Message counters are adjusted once per swept batch rather than per
//! message, to bound counter-update cost. The sweep holds no locks across
//! iterations, so concurrent Get and Ack calls interleave freely.

use std::sync::Arc;

use queuehouse_core::{now_ms, MessageType, QueueMessage, ShardType};
use queuehouse_store::{
    AuditAction, AuditLogEntry, AuditStatus, BufferedMessageCounters, QueueStore,
};
use tracing::{debug, warn};

use crate::config::BrokerConfig;
use crate::error::Result;
use crate::iter::MultiShardMessageIterator;
use crate::shards::ShardStrategy;

/// Requeues inflight messages whose visibility window has elapsed.
pub struct TimeoutSweeper {
    store: Arc<dyn QueueStore>,
    strategy: ShardStrategy,
    counters: Arc<BufferedMessageCounters>,
    config: Arc<BrokerConfig>,
}

impl TimeoutSweeper {
    pub fn new(
        store: Arc<dyn QueueStore>,
        counters: Arc<BufferedMessageCounters>,
        config: Arc<BrokerConfig>,
    ) -> Self {
        let strategy = ShardStrategy::new(store.clone());
        Self {
            store,
            strategy,
            counters,
            config,
        }
    }

    /// One sweep over a queue's INFLIGHT shards. Returns how many messages
    /// were requeued.
    pub async fn sweep(&self, queue_name: &str) -> Result<usize> {
        let region = &self.config.region;
        let timeout_ms = self.config.visibility_timeout_ms();
        let now = now_ms();

        let mut iter = MultiShardMessageIterator::new(
            self.store.clone(),
            queue_name,
            region,
            MessageType::Inflight,
            None,
            None,
            self.config.read_page_size,
        )
        .await?;

        let mut requeued = 0usize;
        let mut expired = 0usize;

        while let Some(message) = iter.next().await? {
            if message.inflight_at < 0 || now - message.inflight_at <= timeout_ms {
                continue;
            }
            if message.expired(now) {
                if self.drop_expired(&message).await {
                    expired += 1;
                }
                continue;
            }
            if self.requeue(&message).await {
                requeued += 1;
            }
        }

        // One counter adjustment per batch, not per message. The counters
        // are advisory; a failed update never undoes a finished sweep.
        if requeued > 0 {
            let _ = self
                .counters
                .increment(queue_name, MessageType::Default, requeued as i64)
                .await;
        }
        if requeued + expired > 0 {
            let _ = self
                .counters
                .decrement(queue_name, MessageType::Inflight, (requeued + expired) as i64)
                .await;
            debug!(queue = queue_name, requeued, expired, "timeout sweep finished");
        }

        Ok(requeued)
    }

    /// Requeue one timed-out INFLIGHT row. Failures are audit-logged and
    /// skipped; the next sweep retries whatever is still inflight.
    async fn requeue(&self, message: &QueueMessage) -> bool {
        let replacement_shard = match self
            .strategy
            .select_shard(
                &message.queue_name,
                &message.region,
                ShardType::Default,
                queuehouse_core::new_queue_message_id(),
            )
            .await
        {
            Ok(shard) => shard,
            Err(e) => {
                warn!(queue = %message.queue_name, error = %e, "shard selection failed during sweep");
                return false;
            }
        };

        let replacement = message.requeued(replacement_shard.shard_id);

        if let Err(e) = self.store.write_message(&replacement).await {
            warn!(
                queue = %message.queue_name,
                qmid = %message.queue_message_id,
                error = %e,
                "requeue write failed"
            );
            self.audit(message, AuditStatus::Error).await;
            return false;
        }

        let _ = self
            .store
            .increment_shard_counter(
                &message.queue_name,
                ShardType::Default,
                replacement.shard_id,
                1,
            )
            .await;

        if let Err(e) = self
            .store
            .delete_message(
                &message.queue_name,
                &message.region,
                MessageType::Inflight,
                Some(message.shard_id),
                message.queue_message_id,
            )
            .await
        {
            // Replacement is durable; the stale INFLIGHT row means a
            // possible duplicate, never a loss.
            warn!(
                queue = %message.queue_name,
                qmid = %message.queue_message_id,
                error = %e,
                "inflight delete failed after requeue"
            );
        }

        self.audit(message, AuditStatus::Success).await;
        true
    }

    /// Delete a timed-out INFLIGHT row whose delivery window has also
    /// closed; there is nothing left to requeue.
    async fn drop_expired(&self, message: &QueueMessage) -> bool {
        if let Err(e) = self
            .store
            .delete_message(
                &message.queue_name,
                &message.region,
                MessageType::Inflight,
                Some(message.shard_id),
                message.queue_message_id,
            )
            .await
        {
            warn!(
                queue = %message.queue_name,
                qmid = %message.queue_message_id,
                error = %e,
                "expired inflight delete failed"
            );
            return false;
        }
        let _ = self
            .store
            .decrement_shard_counter(
                &message.queue_name,
                ShardType::Inflight,
                message.shard_id,
                1,
            )
            .await;
        true
    }

    async fn audit(&self, message: &QueueMessage, status: AuditStatus) {
        let entry = AuditLogEntry::new(
            AuditAction::Requeue,
            status,
            &message.queue_name,
            &message.region,
            message.message_id,
            message.queue_message_id,
        );
        if let Err(e) = self.store.record_audit_log(&entry).await {
            warn!(queue = %message.queue_name, error = %e, "audit log write failed");
        }
    }
}
