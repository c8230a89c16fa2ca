//! Shard Model
//!
//! A shard is a time-bounded partition of one queue's message stream, scoped
//! by (queue, region, type). Sharding keeps individual store partitions small
//! so scans and deletes stay bounded.
//!
//! ## Invariants
//!
//! - Shard ids are strictly increasing per (queue, region, type).
//! - A shard's `start_id` (the time-ordered id marking its opening instant)
//!   is >= the previous shard's.
//!
//! Shards are created by the allocator ahead of demand, anchored slightly in
//! the future: writes whose queue message id is newer than the anchor fall
//! into the new shard by construction, so writers and readers roll over
//! without any handoff barrier. The core never deletes shards; retention is
//! an external concern.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which shard family a shard belongs to. Mirrors [`crate::MessageType`]:
/// DEFAULT rows live in DEFAULT shards, INFLIGHT rows in INFLIGHT shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShardType {
    Default,
    Inflight,
}

impl ShardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardType::Default => "default",
            ShardType::Inflight => "inflight",
        }
    }
}

impl From<crate::MessageType> for ShardType {
    fn from(t: crate::MessageType) -> Self {
        match t {
            crate::MessageType::Default => ShardType::Default,
            crate::MessageType::Inflight => ShardType::Inflight,
        }
    }
}

impl std::fmt::Display for ShardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-bounded partition of one queue's message stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub queue_name: String,
    pub region: String,
    pub shard_type: ShardType,

    /// Monotonic shard number, starting at 1.
    pub shard_id: u64,

    /// Time-ordered id marking the shard's opening instant. Writes with a
    /// queue message id at or after this instant belong to this shard
    /// (unless a newer shard has opened).
    pub start_id: Uuid,
}

impl Shard {
    pub fn new(
        queue_name: impl Into<String>,
        region: impl Into<String>,
        shard_type: ShardType,
        shard_id: u64,
        start_id: Uuid,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            region: region.into(),
            shard_type,
            shard_id,
            start_id,
        }
    }

    /// Millisecond timestamp of the shard's opening instant.
    pub fn start_time_ms(&self) -> i64 {
        crate::ids::id_timestamp_ms(&self.start_id).unwrap_or(0)
    }
}
