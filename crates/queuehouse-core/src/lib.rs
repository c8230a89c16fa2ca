//! Queuehouse Core Types
//!
//! This crate defines the data model shared by every Queuehouse component:
//!
//! - **QueueMessage**: one occurrence of a message in a queue. The payload is
//!   referenced by a stable `message_id`; each occurrence carries its own
//!   time-ordered `queue_message_id` that is regenerated whenever the message
//!   is requeued.
//! - **Shard**: a time-bounded partition of one queue's message stream, used
//!   to bound the cost of store scans.
//! - **Id helpers**: time-ordered unique ids (UUIDv7) and millisecond
//!   timestamps.
//!
//! ## Message Lifecycle
//!
//! ```text
//! Send ──→ DEFAULT row ──Get──→ INFLIGHT row ──Ack──→ deleted
//!              ▲                     │
//!              └──── timeout sweep ──┘
//!                (new queue_message_id, same message_id)
//! ```
//!
//! A given `message_id` has at most one live DEFAULT row and one INFLIGHT row
//! per region at any time. Transitions are DEFAULT→INFLIGHT on Get,
//! INFLIGHT→deleted on Ack, and INFLIGHT→DEFAULT (with a fresh
//! `queue_message_id`) when the visibility window elapses.

pub mod error;
pub mod ids;
pub mod message;
pub mod shard;

pub use error::{Error, Result};
pub use ids::{id_at_ms, id_timestamp_ms, new_queue_message_id, now_ms};
pub use message::{validate_queue_name, MessageBody, MessageType, QueueMessage};
pub use shard::{Shard, ShardType};
