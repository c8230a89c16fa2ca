//! Queue Writer
//!
//! Persists newly produced messages. On success the writer also cleans up
//! the cross-region transfer-log row that marked the message as in transit,
//! and reports one of three post-write states so the caller can distinguish
//! "durable" from "durable but left an orphan to reconcile later".

use std::sync::Arc;

use queuehouse_core::{new_queue_message_id, MessageType, QueueMessage};
use queuehouse_store::{
    AuditAction, AuditLogEntry, AuditStatus, QueueStore, StoreError,
};
use tracing::{error, trace, warn};
use uuid::Uuid;

use crate::shards::ShardStrategy;

/// A produce request targeting one destination region.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub queue_name: String,
    pub source_region: String,
    pub dest_region: String,
    pub message_id: Uuid,
    /// Earliest delivery time (ms since epoch), if delayed.
    pub delivery_time: Option<i64>,
    /// Expiration time (ms since epoch), if bounded.
    pub expiration_time: Option<i64>,
}

/// Outcome of a write, as seen by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Row written, transfer-log entry removed.
    SuccessXferlogDeleted,
    /// Row written but the transfer-log row could not be cleaned up. The
    /// orphan is non-fatal; a later reconciliation pass removes it.
    SuccessXferlogNotDeleted,
    /// The write itself failed.
    Error,
}

impl WriteStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, WriteStatus::Error)
    }
}

/// Persists produced messages into the destination region's DEFAULT shards.
pub struct QueueWriter {
    store: Arc<dyn QueueStore>,
    strategy: ShardStrategy,
}

impl QueueWriter {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        let strategy = ShardStrategy::new(store.clone());
        Self { store, strategy }
    }

    /// Persist one produce request and clean up its transfer-log row.
    ///
    /// Never returns an error: every failure is folded into the returned
    /// [`WriteStatus`] and audit-logged, because by the time this runs the
    /// producer has already been acked.
    pub async fn write_message(&self, request: &WriteRequest) -> WriteStatus {
        // A delayed message gets an id anchored at its delivery instant, so
        // time-ordered scans surface it only once it is due.
        let queue_message_id = match request.delivery_time {
            Some(at) if at > queuehouse_core::now_ms() => queuehouse_core::id_at_ms(at),
            _ => new_queue_message_id(),
        };

        let shard = match self
            .strategy
            .select_shard(
                &request.queue_name,
                &request.dest_region,
                queuehouse_core::ShardType::Default,
                queue_message_id,
            )
            .await
        {
            Ok(shard) => shard,
            Err(e) => {
                error!(queue = %request.queue_name, error = %e, "shard selection failed");
                return WriteStatus::Error;
            }
        };

        let message = QueueMessage {
            message_id: request.message_id,
            queue_message_id,
            queue_name: request.queue_name.clone(),
            region: request.dest_region.clone(),
            message_type: MessageType::Default,
            shard_id: shard.shard_id,
            queued_at: queuehouse_core::now_ms(),
            inflight_at: -1,
            expires_at: request.expiration_time,
        };

        if let Err(e) = self.store.write_message(&message).await {
            error!(queue = %request.queue_name, error = %e, "message write failed");
            self.audit(request, queue_message_id, AuditStatus::Error).await;
            return WriteStatus::Error;
        }

        trace!(
            queue = %request.queue_name,
            qmid = %queue_message_id,
            shard = shard.shard_id,
            "wrote message"
        );

        // Counters are advisory; failures here degrade allocation accuracy,
        // not correctness.
        let _ = self
            .store
            .increment_shard_counter(
                &request.queue_name,
                queuehouse_core::ShardType::Default,
                shard.shard_id,
                1,
            )
            .await;
        let _ = self
            .store
            .increment_message_counter(&request.queue_name, MessageType::Default, 1)
            .await;

        self.audit(request, queue_message_id, AuditStatus::Success)
            .await;

        self.cleanup_transfer_log(request).await
    }

    async fn cleanup_transfer_log(&self, request: &WriteRequest) -> WriteStatus {
        match self
            .store
            .remove_transfer_log(
                &request.queue_name,
                &request.dest_region,
                request.message_id,
            )
            .await
        {
            Ok(()) => WriteStatus::SuccessXferlogDeleted,

            // A local-origin send may never have had a row to remove.
            Err(StoreError::TransferLogNotFound { .. })
                if request.source_region == request.dest_region =>
            {
                WriteStatus::SuccessXferlogDeleted
            }

            Err(e) => {
                warn!(
                    queue = %request.queue_name,
                    message_id = %request.message_id,
                    error = %e,
                    "transfer log cleanup failed; orphan left for reconciliation"
                );
                WriteStatus::SuccessXferlogNotDeleted
            }
        }
    }

    async fn audit(&self, request: &WriteRequest, queue_message_id: Uuid, status: AuditStatus) {
        let entry = AuditLogEntry::new(
            AuditAction::Send,
            status,
            &request.queue_name,
            &request.dest_region,
            request.message_id,
            queue_message_id,
        );
        if let Err(e) = self.store.record_audit_log(&entry).await {
            warn!(queue = %request.queue_name, error = %e, "audit log write failed");
        }
    }
}
