//! Queuehouse Broker
//!
//! This crate implements the broker core: everything between a producer's
//! Send and a consumer's Ack.
//!
//! ## Architecture Overview
//!
//! ```text
//! Producer ──Send──→ QueueService ──→ QueueSender ──→ QueueWriter ──→ store
//!                         │               (cross-region: RegionTransport,
//!                         │                bounded retries + timeouts)
//!                         ▼
//!                      Router ──→ one QueueWorker task per queue name
//!                                     │  owns the read cache and serializes
//!                                     │  Get / Ack / Refresh / sweeps
//!                                     ▼
//! Consumer ←──Get/Ack──────────── store (DEFAULT and INFLIGHT rows)
//! ```
//!
//! ## Concurrency Model
//!
//! Each queue name gets exactly one worker task; all operations for that
//! queue flow through the worker's channel and execute strictly in order, so
//! the cache and the inflight promotion sequence never race in-process.
//! Workers for different queues run fully in parallel. The router's lookup
//! map is the only shared structure.
//!
//! ## Delivery Guarantees
//!
//! At-least-once. A message delivered but never acked is requeued by the
//! timeout sweeper with a fresh queue message id; an ack racing a sweep can
//! produce a duplicate delivery but never a loss.

pub mod cache;
pub mod config;
pub mod error;
pub mod iter;
pub mod router;
pub mod sender;
pub mod service;
pub mod shards;
pub mod sweeper;
pub mod worker;
pub mod writer;

pub use cache::MessageCache;
pub use config::BrokerConfig;
pub use error::{BrokerError, Result};
pub use iter::MultiShardMessageIterator;
pub use router::Router;
pub use sender::{LocalTransport, QueueSender, RegionTransport};
pub use service::{DeliveredMessage, QueueService};
pub use shards::{ShardAllocator, ShardStrategy};
pub use sweeper::TimeoutSweeper;
pub use worker::{AckStatus, WorkerHandle};
pub use writer::{QueueWriter, WriteRequest, WriteStatus};
