//! Error Types for the Store Boundary

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or timed out. Transient; callers
    /// may retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A write was rejected by the backend.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// No transfer-log row matched a removal request.
    #[error("Transfer log entry not found for message {message_id} (queue {queue_name}, region {dest_region})")]
    TransferLogNotFound {
        queue_name: String,
        dest_region: String,
        message_id: Uuid,
    },

    #[error("Core error: {0}")]
    Core(#[from] queuehouse_core::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
