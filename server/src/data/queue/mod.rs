//! Message queue layer
//!
//! At-least-once delivery of claim-check envelopes from the gateway.
//!
//! ## Backends
//!
//! - `memory` - In-process partitions (local runs, tests)
//! - `redis` - Redis Streams with consumer groups (production)
//!
//! ## Commit Modes
//!
//! - Manual (default): the consumer loop calls [`MessageQueue::commit`] once per batch
//! - Auto-commit: the previous poll's messages are committed at the start of the
//!   next poll and on close

pub mod backend;
pub mod error;
pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::core::config::{QueueBackendKind, QueueConfig};

pub use backend::{PartitionBatch, PolledBatch, Published, QueueBackend, QueueMessage};
pub use error::QueueError;
pub use memory::MemoryQueueBackend;
pub use redis::{ConsumerIdentity, RedisQueueBackend};

/// Consumer-side queue handle
///
/// Owns the backend and applies batch size and commit mode.
pub struct MessageQueue {
    backend: Arc<dyn QueueBackend>,
    batch_size: usize,
    auto_commit: bool,
    closed: AtomicBool,
}

impl MessageQueue {
    pub fn new(backend: Arc<dyn QueueBackend>, batch_size: usize, auto_commit: bool) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
            auto_commit,
            closed: AtomicBool::new(false),
        }
    }

    /// Build the configured backend
    pub async fn from_config(config: &QueueConfig) -> Result<Self, QueueError> {
        let backend: Arc<dyn QueueBackend> = match config.backend {
            QueueBackendKind::Memory => {
                tracing::debug!(partitions = config.partitions, "Using in-memory queue backend");
                Arc::new(MemoryQueueBackend::new(config.partitions))
            }
            QueueBackendKind::Redis => {
                let identity = ConsumerIdentity {
                    topic: config.topic.clone(),
                    group: config.group_id.clone(),
                    consumer: config.consumer_name.clone(),
                };
                Arc::new(
                    RedisQueueBackend::new(&config.redis_url, identity, config.partitions).await?,
                )
            }
        };
        Ok(Self::new(backend, config.batch_size, config.auto_commit))
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Poll up to `batch_size` messages, waiting at most `timeout`
    pub async fn poll(&self, timeout: Duration) -> Result<PolledBatch, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        if self.auto_commit {
            self.backend.commit().await?;
        }
        self.backend.poll(timeout, self.batch_size).await
    }

    /// Commit every message delivered so far
    pub async fn commit(&self) -> Result<usize, QueueError> {
        self.backend.commit().await
    }

    /// Claim deliveries other consumers left idle for at least `min_idle`
    pub async fn claim_stale(&self, min_idle: Duration) -> Result<PolledBatch, QueueError> {
        self.backend.claim_stale(min_idle, self.batch_size).await
    }

    pub async fn publish(&self, key: Option<&str>, value: &[u8]) -> Result<Published, QueueError> {
        self.backend.publish(key, value).await
    }

    /// Close the handle; idempotent
    ///
    /// In auto-commit mode the last poll's messages are committed first.
    pub async fn close(&self) -> Result<(), QueueError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let committed = if self.auto_commit {
            self.backend.commit().await
        } else {
            Ok(0)
        };
        let closed = self.backend.close().await;
        committed?;
        closed
    }
}
