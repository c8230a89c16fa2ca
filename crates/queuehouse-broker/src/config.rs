//! Broker Configuration
//!
//! Every knob the broker recognizes, with per-field serde defaults so a
//! config file only has to name what it changes.
//!
//! ## Usage
//!
//! ```ignore
//! use queuehouse_broker::BrokerConfig;
//!
//! // Defaults, local region name only
//! let config = BrokerConfig {
//!     region: "us-east".to_string(),
//!     ..Default::default()
//! };
//!
//! // Fast-timeout config for tests
//! let config = BrokerConfig {
//!     region: "us-east".to_string(),
//!     visibility_timeout_secs: 1,
//!     queue_refresh_ms: 50,
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Name of the region this broker runs in.
    #[serde(default = "default_region")]
    pub region: String,

    /// Per-queue in-memory read cache capacity (messages).
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Seconds a consumer has to ack before a delivered message is requeued.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Approximate maximum messages per shard before a new one is opened.
    #[serde(default = "default_max_shard_size")]
    pub max_shard_size: u64,

    /// How far in the future a newly allocated shard is anchored (ms).
    #[serde(default = "default_shard_allocation_advance_ms")]
    pub shard_allocation_advance_ms: i64,

    /// Interval between shard fill-level checks (ms).
    #[serde(default = "default_shard_check_interval_ms")]
    pub shard_check_interval_ms: u64,

    /// Interval between cache refills (ms).
    #[serde(default = "default_queue_refresh_ms")]
    pub queue_refresh_ms: u64,

    /// Maximum attempts for a cross-region send.
    #[serde(default = "default_max_send_retries")]
    pub max_send_retries: u32,

    /// Per-attempt timeout for a cross-region send (seconds).
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// How long a Get keeps polling for more messages before returning what
    /// it has (ms).
    #[serde(default = "default_long_poll_ms")]
    pub long_poll_ms: u64,

    /// How long counter deltas may sit in memory before being flushed (ms).
    #[serde(default = "default_counter_flush_ms")]
    pub counter_flush_ms: i64,

    /// Page size for store scans.
    #[serde(default = "default_read_page_size")]
    pub read_page_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            cache_capacity: default_cache_capacity(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            max_shard_size: default_max_shard_size(),
            shard_allocation_advance_ms: default_shard_allocation_advance_ms(),
            shard_check_interval_ms: default_shard_check_interval_ms(),
            queue_refresh_ms: default_queue_refresh_ms(),
            max_send_retries: default_max_send_retries(),
            send_timeout_secs: default_send_timeout_secs(),
            long_poll_ms: default_long_poll_ms(),
            counter_flush_ms: default_counter_flush_ms(),
            read_page_size: default_read_page_size(),
        }
    }
}

impl BrokerConfig {
    /// Visibility timeout in milliseconds.
    pub fn visibility_timeout_ms(&self) -> i64 {
        (self.visibility_timeout_secs as i64) * 1000
    }

    /// Shard allocation threshold: a new shard opens once the fill counter
    /// passes 90% of the maximum shard size.
    pub fn shard_fill_threshold(&self) -> i64 {
        ((self.max_shard_size as f64) * 0.9) as i64
    }
}

fn default_region() -> String {
    "local".to_string()
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_visibility_timeout_secs() -> u64 {
    30
}

fn default_max_shard_size() -> u64 {
    400_000
}

fn default_shard_allocation_advance_ms() -> i64 {
    5_000
}

fn default_shard_check_interval_ms() -> u64 {
    10_000
}

fn default_queue_refresh_ms() -> u64 {
    1_000
}

fn default_max_send_retries() -> u32 {
    5
}

fn default_send_timeout_secs() -> u64 {
    5
}

fn default_long_poll_ms() -> u64 {
    500
}

fn default_counter_flush_ms() -> i64 {
    5_000
}

fn default_read_page_size() -> usize {
    100
}
