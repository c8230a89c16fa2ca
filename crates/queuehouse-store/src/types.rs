//! Audit and Transfer Log Types
//!
//! Append-only diagnostic records. The audit log captures the outcome of
//! every Send/Get/Ack/Requeue against a message; the transfer log marks a
//! message as in transit between regions until the destination confirms
//! durable receipt. Neither participates in the delivery protocol, except
//! that a transfer-log row's presence means a cross-region send has not yet
//! fully completed.

use queuehouse_core::now_ms;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which queue operation an audit entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    Send,
    Get,
    Ack,
    Requeue,
}

/// How the operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStatus {
    Success,
    Error,
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub action: AuditAction,
    pub status: AuditStatus,
    pub queue_name: String,
    pub region: String,
    pub message_id: Uuid,
    pub queue_message_id: Uuid,
    pub recorded_at: i64,
}

impl AuditLogEntry {
    pub fn new(
        action: AuditAction,
        status: AuditStatus,
        queue_name: impl Into<String>,
        region: impl Into<String>,
        message_id: Uuid,
        queue_message_id: Uuid,
    ) -> Self {
        Self {
            action,
            status,
            queue_name: queue_name.into(),
            region: region.into(),
            message_id,
            queue_message_id,
            recorded_at: now_ms(),
        }
    }
}

/// A message in transit between regions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLogEntry {
    pub queue_name: String,
    pub source_region: String,
    pub dest_region: String,
    pub message_id: Uuid,
    pub recorded_at: i64,
}

impl TransferLogEntry {
    pub fn new(
        queue_name: impl Into<String>,
        source_region: impl Into<String>,
        dest_region: impl Into<String>,
        message_id: Uuid,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            source_region: source_region.into(),
            dest_region: dest_region.into(),
            message_id,
            recorded_at: now_ms(),
        }
    }
}
