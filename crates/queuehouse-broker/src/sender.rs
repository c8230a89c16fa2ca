//! Queue Sender
//!
//! Drives the produce path to its destination region. Local-region sends go
//! straight to the writer; remote sends travel over a [`RegionTransport`]
//! with a per-attempt timeout and a bounded retry budget.
//!
//! By the time the sender runs, the producer has already received its
//! provisional ack, so exhausting the retry budget surfaces as a broker
//! error for logs and alerting, never back to the producer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::writer::{QueueWriter, WriteRequest, WriteStatus};

/// Delivers a write request to a (possibly remote) region's writer.
///
/// Implementations are expected to be idempotent per queue message: a retry
/// after a timed-out-but-actually-successful attempt writes a second DEFAULT
/// row, which the at-least-once contract absorbs.
#[async_trait]
pub trait RegionTransport: Send + Sync {
    async fn deliver(&self, request: WriteRequest) -> Result<WriteStatus>;
}

/// In-process transport: delivers straight to a local writer. Used for the
/// local region and by tests standing in for a remote one.
pub struct LocalTransport {
    writer: Arc<QueueWriter>,
}

impl LocalTransport {
    pub fn new(writer: Arc<QueueWriter>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl RegionTransport for LocalTransport {
    async fn deliver(&self, request: WriteRequest) -> Result<WriteStatus> {
        Ok(self.writer.write_message(&request).await)
    }
}

/// Routes produce requests to the right region with retries.
pub struct QueueSender {
    local_region: String,
    writer: Arc<QueueWriter>,
    transports: RwLock<HashMap<String, Arc<dyn RegionTransport>>>,
    config: Arc<BrokerConfig>,
}

impl QueueSender {
    pub fn new(writer: Arc<QueueWriter>, config: Arc<BrokerConfig>) -> Self {
        Self {
            local_region: config.region.clone(),
            writer,
            transports: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register the transport for a remote region.
    pub async fn register_transport(&self, region: &str, transport: Arc<dyn RegionTransport>) {
        self.transports
            .write()
            .await
            .insert(region.to_string(), transport);
    }

    /// Send one produce request to its destination region.
    ///
    /// Local region: a single direct write. Remote region: up to
    /// `max_send_retries` attempts, each bounded by `send_timeout_secs`,
    /// retrying on timeout, transport failure, or an explicit error status.
    pub async fn send_to_region(&self, request: WriteRequest) -> Result<WriteStatus> {
        if request.dest_region == self.local_region {
            return Ok(self.writer.write_message(&request).await);
        }

        let transport = {
            let transports = self.transports.read().await;
            transports
                .get(&request.dest_region)
                .cloned()
                .ok_or_else(|| BrokerError::UnknownRegion(request.dest_region.clone()))?
        };

        let attempt_timeout = Duration::from_secs(self.config.send_timeout_secs);
        let mut attempts = 0;

        while attempts < self.config.max_send_retries {
            attempts += 1;

            match timeout(attempt_timeout, transport.deliver(request.clone())).await {
                Ok(Ok(status)) if status.is_success() => {
                    if attempts > 1 {
                        debug!(
                            queue = %request.queue_name,
                            dest = %request.dest_region,
                            attempts,
                            "send succeeded after retries"
                        );
                    }
                    return Ok(status);
                }
                Ok(Ok(_)) => {
                    debug!(
                        queue = %request.queue_name,
                        dest = %request.dest_region,
                        attempts,
                        "error status from destination, retrying"
                    );
                }
                Ok(Err(e)) => {
                    debug!(
                        queue = %request.queue_name,
                        dest = %request.dest_region,
                        attempts,
                        error = %e,
                        "transport error, retrying"
                    );
                }
                Err(_) => {
                    debug!(
                        queue = %request.queue_name,
                        dest = %request.dest_region,
                        attempts,
                        "send timed out, retrying"
                    );
                }
            }
        }

        warn!(
            queue = %request.queue_name,
            dest = %request.dest_region,
            attempts,
            "send retries exhausted"
        );
        Err(BrokerError::SendRetriesExhausted {
            queue_name: request.queue_name.clone(),
            dest_region: request.dest_region.clone(),
            attempts,
        })
    }
}
