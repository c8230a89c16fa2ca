//! Queue Message Model
//!
//! A `QueueMessage` is one occurrence of a message in a queue. The message
//! payload lives in its own row, keyed by `message_id`; the queue row only
//! carries bookkeeping. This split lets a message be requeued (new
//! `queue_message_id`) without rewriting its payload.
//!
//! ## Fields
//!
//! - `message_id`: stable payload reference, survives requeues
//! - `queue_message_id`: time-ordered id, regenerated on every requeue
//! - `message_type`: DEFAULT (available for delivery) or INFLIGHT (delivered,
//!   awaiting ack)
//! - `shard_id`: the time-bounded shard this row was written into
//! - `queued_at` / `inflight_at`: millisecond timestamps; `inflight_at` is -1
//!   until the message is first delivered

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which table family a queue message row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Available for delivery.
    Default,
    /// Delivered to a consumer, not yet acknowledged.
    Inflight,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Default => "default",
            MessageType::Inflight => "inflight",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "default" => Ok(MessageType::Default),
            "inflight" => Ok(MessageType::Inflight),
            other => Err(crate::Error::InvalidMessageType(other.to_string())),
        }
    }
}

/// Check that a queue name is usable as a store partition key component:
/// non-empty, and limited to alphanumerics, `-`, `_`, and `.`.
pub fn validate_queue_name(name: &str) -> crate::Result<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(crate::Error::InvalidQueueName(name.to_string()));
    }
    Ok(())
}

/// One occurrence of a message in a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Stable payload reference, shared by every occurrence of this message.
    pub message_id: Uuid,

    /// Time-ordered unique id for this occurrence.
    pub queue_message_id: Uuid,

    /// Queue this message belongs to.
    pub queue_name: String,

    /// Region this row lives in.
    pub region: String,

    /// DEFAULT or INFLIGHT.
    pub message_type: MessageType,

    /// Shard the row was written into.
    pub shard_id: u64,

    /// When this occurrence was written (ms since epoch).
    pub queued_at: i64,

    /// When this occurrence went inflight (ms since epoch), -1 if never.
    pub inflight_at: i64,

    /// When the message stops being deliverable (ms since epoch), if bounded.
    pub expires_at: Option<i64>,
}

impl QueueMessage {
    /// Build a fresh DEFAULT occurrence for a payload.
    pub fn new_default(
        queue_name: impl Into<String>,
        region: impl Into<String>,
        message_id: Uuid,
        shard_id: u64,
    ) -> Self {
        Self {
            message_id,
            queue_message_id: crate::ids::new_queue_message_id(),
            queue_name: queue_name.into(),
            region: region.into(),
            message_type: MessageType::Default,
            shard_id,
            queued_at: crate::ids::now_ms(),
            inflight_at: -1,
            expires_at: None,
        }
    }

    /// Build the INFLIGHT occurrence for a delivered DEFAULT row.
    ///
    /// The new occurrence keeps the payload `message_id` but gets a fresh
    /// `queue_message_id` and an `inflight_at` stamp.
    pub fn into_inflight(&self, shard_id: u64) -> Self {
        Self {
            message_id: self.message_id,
            queue_message_id: crate::ids::new_queue_message_id(),
            queue_name: self.queue_name.clone(),
            region: self.region.clone(),
            message_type: MessageType::Inflight,
            shard_id,
            queued_at: self.queued_at,
            inflight_at: crate::ids::now_ms(),
            expires_at: self.expires_at,
        }
    }

    /// Build the requeued DEFAULT occurrence for a timed-out INFLIGHT row.
    pub fn requeued(&self, shard_id: u64) -> Self {
        Self {
            message_id: self.message_id,
            queue_message_id: crate::ids::new_queue_message_id(),
            queue_name: self.queue_name.clone(),
            region: self.region.clone(),
            message_type: MessageType::Default,
            shard_id,
            queued_at: crate::ids::now_ms(),
            inflight_at: -1,
            expires_at: self.expires_at,
        }
    }

    /// Whether the message's delivery window has closed.
    pub fn expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now_ms)
    }
}

/// Payload body for a message, stored once per `message_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    /// Opaque payload bytes.
    pub blob: Bytes,

    /// MIME content type, e.g. "application/json".
    pub content_type: String,
}

impl MessageBody {
    pub fn new(blob: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            blob: blob.into(),
            content_type: content_type.into(),
        }
    }
}
