//! Shard Selection and Allocation
//!
//! Two jobs live here:
//!
//! - **ShardStrategy** answers "which shard does this write belong to":
//!   the newest shard whose anchor instant is at or before the message's
//!   queue message id. Because the allocator opens new shards anchored in
//!   the future, writers roll over to them the moment the anchor passes,
//!   with no coordination.
//! - **ShardAllocator** keeps one active shard with headroom per
//!   (queue, region, type): when the newest shard's approximate fill counter
//!   passes 90% of the configured maximum, it opens shard `id + 1` anchored
//!   `shard_allocation_advance_ms` in the future and seeds its counter.
//!
//! Allocation failures are never fatal: the owning worker logs them and the
//! next scheduled check tries again.

use std::sync::Arc;

use queuehouse_core::{id_at_ms, now_ms, Shard, ShardType};
use queuehouse_store::QueueStore;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::error::Result;

/// Picks the shard a write belongs to.
#[derive(Clone)]
pub struct ShardStrategy {
    store: Arc<dyn QueueStore>,
}

impl ShardStrategy {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Select the shard for a write keyed by `queue_message_id`.
    ///
    /// Returns the newest shard whose `start_id` is at or before the message
    /// id. If the family has no shards yet (first write beats the first
    /// allocator tick), shard 1 is created anchored at the message itself.
    pub async fn select_shard(
        &self,
        queue_name: &str,
        region: &str,
        shard_type: ShardType,
        queue_message_id: Uuid,
    ) -> Result<Shard> {
        let shards = self
            .store
            .list_shards(queue_name, region, shard_type, None)
            .await?;

        if let Some(shard) = shards
            .iter()
            .rev()
            .find(|s| s.start_id <= queue_message_id)
        {
            return Ok(shard.clone());
        }

        // Message older than every anchor: fall back to the earliest shard.
        if let Some(first) = shards.first() {
            return Ok(first.clone());
        }

        let shard = Shard::new(queue_name, region, shard_type, 1, queue_message_id);
        self.store.create_shard(&shard).await?;
        info!(
            queue = queue_name,
            %shard_type,
            "created first shard on write path"
        );
        Ok(shard)
    }
}

/// Opens new shards ahead of demand.
pub struct ShardAllocator {
    store: Arc<dyn QueueStore>,
    config: Arc<BrokerConfig>,
    region: String,
}

impl ShardAllocator {
    pub fn new(store: Arc<dyn QueueStore>, config: Arc<BrokerConfig>) -> Self {
        let region = config.region.clone();
        Self {
            store,
            config,
            region,
        }
    }

    /// One allocation pass for both shard families of a queue.
    pub async fn check(&self, queue_name: &str) -> Result<()> {
        self.check_family(queue_name, ShardType::Default).await?;
        self.check_family(queue_name, ShardType::Inflight).await?;
        Ok(())
    }

    async fn check_family(&self, queue_name: &str, shard_type: ShardType) -> Result<()> {
        let shards = self
            .store
            .list_shards(queue_name, &self.region, shard_type, None)
            .await?;

        let Some(newest) = shards.last() else {
            let shard = Shard::new(
                queue_name,
                &self.region,
                shard_type,
                1,
                id_at_ms(now_ms()),
            );
            self.store.create_shard(&shard).await?;
            self.store
                .increment_shard_counter(queue_name, shard_type, shard.shard_id, 0)
                .await?;
            info!(queue = queue_name, %shard_type, "created first shard");
            return Ok(());
        };

        let fill = self
            .store
            .shard_counter_value(queue_name, shard_type, newest.shard_id)
            .await?
            .unwrap_or(0);

        if fill <= self.config.shard_fill_threshold() {
            return Ok(());
        }

        // Anchor the next shard in the future so writers and readers roll
        // over without a handoff barrier.
        let next = Shard::new(
            queue_name,
            &self.region,
            shard_type,
            newest.shard_id + 1,
            id_at_ms(now_ms() + self.config.shard_allocation_advance_ms),
        );
        self.store.create_shard(&next).await?;
        self.store
            .increment_shard_counter(queue_name, shard_type, next.shard_id, 0)
            .await?;

        debug!(
            queue = queue_name,
            %shard_type,
            fill,
            new_shard = next.shard_id,
            "allocated next shard"
        );
        Ok(())
    }
}
