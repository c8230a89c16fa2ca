//! Time-Ordered Id Helpers
//!
//! Queue message ids must sort by creation time so that store scans walk
//! messages oldest-to-newest. UUIDv7 encodes a millisecond timestamp in its
//! high bits, which makes byte order equal to time order and lets us recover
//! the timestamp without a side channel.

use uuid::{NoContext, Timestamp, Uuid};

/// Generate a fresh time-ordered queue message id.
///
/// Every requeue gets a new id; only the payload-level `message_id` is stable
/// across requeues.
pub fn new_queue_message_id() -> Uuid {
    Uuid::now_v7()
}

/// Build a time-ordered id anchored at an explicit millisecond timestamp.
///
/// Used by the shard allocator to open shards slightly in the future, so
/// writers roll over to the new shard without a handoff barrier.
pub fn id_at_ms(ms: i64) -> Uuid {
    let secs = (ms / 1000) as u64;
    let nanos = ((ms % 1000) * 1_000_000) as u32;
    Uuid::new_v7(Timestamp::from_unix(NoContext, secs, nanos))
}

/// Extract the millisecond timestamp embedded in a time-ordered id.
///
/// Returns `None` for ids that carry no timestamp (e.g. random v4 ids used
/// for payload message ids).
pub fn id_timestamp_ms(id: &Uuid) -> Option<i64> {
    id.get_timestamp().map(|ts| {
        let (secs, nanos) = ts.to_unix();
        (secs as i64) * 1000 + (nanos as i64) / 1_000_000
    })
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}
