//! Error Types for Queuehouse Core
//!
//! All core functions return `Result<T>` aliased to `Result<T, Error>`, so
//! callers can propagate with `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid queue name: {0}")]
    InvalidQueueName(String),

    #[error("Invalid message type: {0}")]
    InvalidMessageType(String),
}

pub type Result<T> = std::result::Result<T, Error>;
