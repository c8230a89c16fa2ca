//! Queue Router
//!
//! Maps queue names to their worker tasks. Workers are created lazily on
//! first use and live for the life of the router, so every Get, Ack, and
//! scheduled maintenance call for a queue lands on the same single-writer
//! actor.

use std::collections::HashMap;
use std::sync::Arc;

use queuehouse_store::{BufferedMessageCounters, QueueStore};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::BrokerConfig;
use crate::worker::{self, WorkerHandle};

/// Lazily spawns and hands out per-queue worker handles.
pub struct Router {
    store: Arc<dyn QueueStore>,
    counters: Arc<BufferedMessageCounters>,
    config: Arc<BrokerConfig>,
    workers: RwLock<HashMap<String, WorkerHandle>>,
}

impl Router {
    pub fn new(
        store: Arc<dyn QueueStore>,
        counters: Arc<BufferedMessageCounters>,
        config: Arc<BrokerConfig>,
    ) -> Self {
        Self {
            store,
            counters,
            config,
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Handle for a queue's worker, spawning it on first use.
    pub async fn worker(&self, queue_name: &str) -> WorkerHandle {
        {
            let workers = self.workers.read().await;
            if let Some(handle) = workers.get(queue_name) {
                return handle.clone();
            }
        }

        let mut workers = self.workers.write().await;
        // Double-check: another caller may have spawned while we waited.
        if let Some(handle) = workers.get(queue_name) {
            return handle.clone();
        }

        debug!(queue = queue_name, "spawning queue worker");
        let handle = worker::spawn(
            queue_name,
            self.store.clone(),
            self.counters.clone(),
            self.config.clone(),
        );
        workers.insert(queue_name.to_string(), handle.clone());
        handle
    }

    /// Names of every queue with a live worker.
    pub async fn active_queues(&self) -> Vec<String> {
        self.workers.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuehouse_store::MemoryQueueStore;

    fn router() -> Router {
        let store = Arc::new(MemoryQueueStore::new());
        let counters = Arc::new(BufferedMessageCounters::new(store.clone(), 0));
        let config = Arc::new(BrokerConfig {
            region: "us-east".to_string(),
            ..Default::default()
        });
        Router::new(store, counters, config)
    }

    #[tokio::test]
    async fn test_same_queue_gets_same_worker() {
        let router = router();
        let a = router.worker("orders").await;
        let b = router.worker("orders").await;

        // Both handles reach the same actor: a message acked through one
        // handle is gone through the other.
        assert!(a.get(1).await.unwrap().is_empty());
        assert!(b.get(1).await.unwrap().is_empty());
        assert_eq!(router.active_queues().await, ["orders"]);
    }

    #[tokio::test]
    async fn test_distinct_queues_get_distinct_workers() {
        let router = router();
        router.worker("orders").await;
        router.worker("payments").await;

        let mut queues = router.active_queues().await;
        queues.sort();
        assert_eq!(queues, ["orders", "payments"]);
    }
}
