//! Broker Error Types
//!
//! Failures are caught at the request boundary and converted into a typed
//! response or a logged anomaly; no error here ever takes the process down.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Store error: {0}")]
    Store(#[from] queuehouse_store::StoreError),

    #[error("Core error: {0}")]
    Core(#[from] queuehouse_core::Error),

    /// The cross-region send gave up after exhausting its retry budget.
    /// The producer was already acked, so this surfaces via logs and audit
    /// trails only.
    #[error("Send to queue {queue_name} region {dest_region} failed after {attempts} attempts")]
    SendRetriesExhausted {
        queue_name: String,
        dest_region: String,
        attempts: u32,
    },

    /// No transport is registered for the destination region.
    #[error("No transport registered for region {0}")]
    UnknownRegion(String),

    /// The per-queue worker task is gone (only possible during shutdown).
    #[error("Queue worker unavailable for queue {0}")]
    WorkerUnavailable(String),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
