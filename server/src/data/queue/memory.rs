//! In-memory queue backend
//!
//! Each partition is a `VecDeque` with a delivery position and a committed
//! offset, mirroring a consumer group with a single member.
//!
//! ## Limitations
//!
//! Suitable for local development and tests:
//! - Process exit = all messages lost (no persistence)
//! - One consumer per process, so there are never stale deliveries to claim
//!
//! Use the Redis backend for durable, multi-process deployments.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::backend::{PolledBatch, Published, QueueBackend, QueueMessage, partition_for_key};
use super::error::QueueError;

struct Entry {
    offset: u64,
    key: Option<String>,
    value: Vec<u8>,
}

#[derive(Default)]
struct Partition {
    /// Entries from `committed` onwards; older entries are dropped on commit
    entries: VecDeque<Entry>,
    next_offset: u64,
    /// Next offset to deliver
    position: u64,
    /// First offset not yet committed
    committed: u64,
}

/// In-memory queue backend
pub struct MemoryQueueBackend {
    partitions: Mutex<Vec<Partition>>,
    notify: Notify,
    round_robin: AtomicU32,
    closed: AtomicBool,
}

impl MemoryQueueBackend {
    /// Create a queue with `partitions` partitions (at least one)
    pub fn new(partitions: u32) -> Self {
        let count = partitions.max(1) as usize;
        Self {
            partitions: Mutex::new((0..count).map(|_| Partition::default()).collect()),
            notify: Notify::new(),
            round_robin: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Move every partition's position back to its committed offset.
    ///
    /// Simulates a consumer restart: uncommitted messages are delivered again.
    /// Returns the number of messages that will be redelivered.
    pub fn rewind_uncommitted(&self) -> usize {
        let mut partitions = self.partitions.lock();
        partitions
            .iter_mut()
            .map(|p| {
                let rewound = (p.position - p.committed) as usize;
                p.position = p.committed;
                rewound
            })
            .sum()
    }

    /// Messages published but not yet committed
    pub fn lag(&self) -> usize {
        let partitions = self.partitions.lock();
        partitions
            .iter()
            .map(|p| (p.next_offset - p.committed) as usize)
            .sum()
    }

    fn take_ready(&self, max_records: usize) -> Vec<QueueMessage> {
        let mut partitions = self.partitions.lock();
        let mut out = Vec::new();

        for (index, partition) in partitions.iter_mut().enumerate() {
            while out.len() < max_records && partition.position < partition.next_offset {
                let skip = (partition.position - partition.committed) as usize;
                let Some(entry) = partition.entries.get(skip) else {
                    break;
                };
                out.push(QueueMessage {
                    partition: index as u32,
                    offset: entry.offset.to_string(),
                    key: entry.key.clone(),
                    value: entry.value.clone(),
                });
                partition.position += 1;
            }
        }
        out
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for MemoryQueueBackend {
    async fn poll(
        &self,
        timeout: Duration,
        max_records: usize,
    ) -> Result<PolledBatch, QueueError> {
        self.ensure_open()?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking so a concurrent publish is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let ready = self.take_ready(max_records.max(1));
            if !ready.is_empty() {
                return Ok(PolledBatch::from_messages(ready));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(PolledBatch::default()),
            }
        }
    }

    async fn commit(&self) -> Result<usize, QueueError> {
        let mut partitions = self.partitions.lock();
        let mut committed = 0;
        for partition in partitions.iter_mut() {
            let count = (partition.position - partition.committed) as usize;
            partition.entries.drain(..count);
            partition.committed = partition.position;
            committed += count;
        }
        Ok(committed)
    }

    async fn claim_stale(
        &self,
        _min_idle: Duration,
        _max_records: usize,
    ) -> Result<PolledBatch, QueueError> {
        Ok(PolledBatch::default())
    }

    async fn publish(&self, key: Option<&str>, value: &[u8]) -> Result<Published, QueueError> {
        self.ensure_open()?;
        let published = {
            let mut partitions = self.partitions.lock();
            let count = partitions.len() as u32;
            let index = match key {
                Some(k) => partition_for_key(k, count),
                None => self.round_robin.fetch_add(1, Ordering::Relaxed) % count,
            };
            let partition = &mut partitions[index as usize];
            let offset = partition.next_offset;
            partition.next_offset += 1;
            partition.entries.push_back(Entry {
                offset,
                key: key.map(str::to_string),
                value: value.to_vec(),
            });
            Published {
                partition: index,
                offset: offset.to_string(),
            }
        };

        self.notify.notify_waiters();
        Ok(published)
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        self.ensure_open()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
