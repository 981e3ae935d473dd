//! Queue backend trait definition
//!
//! A backend is bound to one topic, one consumer group and one consumer name.
//! Delivery is at-least-once: polled messages stay pending until committed and
//! are redelivered to the group if the consumer goes away first.

use std::time::Duration;

use async_trait::async_trait;

use super::error::QueueError;

/// Message delivered by a poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Partition the message was read from
    pub partition: u32,
    /// Backend position (memory: decimal sequence, Redis: stream id)
    pub offset: String,
    /// Optional message key (tenant id for telemetry)
    pub key: Option<String>,
    /// Raw message value
    pub value: Vec<u8>,
}

/// Ordered messages from one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionBatch {
    pub partition: u32,
    pub messages: Vec<QueueMessage>,
}

/// Result of one poll, partitions in ascending order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolledBatch {
    pub partitions: Vec<PartitionBatch>,
}

impl PolledBatch {
    /// Group messages by partition, keeping in-partition order
    pub fn from_messages(messages: Vec<QueueMessage>) -> Self {
        let mut partitions: Vec<PartitionBatch> = Vec::new();
        for message in messages {
            match partitions.iter_mut().find(|p| p.partition == message.partition) {
                Some(batch) => batch.messages.push(message),
                None => partitions.push(PartitionBatch {
                    partition: message.partition,
                    messages: vec![message],
                }),
            }
        }
        partitions.sort_by_key(|p| p.partition);
        Self { partitions }
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(|p| p.messages.is_empty())
    }

    /// Total number of messages across partitions
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.messages.len()).sum()
    }

    /// Flatten to partition order, then in-partition order
    pub fn into_messages(self) -> Vec<QueueMessage> {
        self.partitions
            .into_iter()
            .flat_map(|p| p.messages)
            .collect()
    }
}

/// Position assigned to a published message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub partition: u32,
    pub offset: String,
}

/// Queue backend trait
///
/// Implemented by the in-memory queue and by Redis Streams.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Wait up to `timeout` for messages and return at most `max_records`.
    ///
    /// Returned messages are pending until the next [`commit`](Self::commit).
    async fn poll(&self, timeout: Duration, max_records: usize)
    -> Result<PolledBatch, QueueError>;

    /// Commit every message delivered to this consumer so far.
    ///
    /// Returns the number of messages committed.
    async fn commit(&self) -> Result<usize, QueueError>;

    /// Take over deliveries that other consumers left pending for longer
    /// than `min_idle`. Claimed messages are pending on this consumer.
    async fn claim_stale(
        &self,
        min_idle: Duration,
        max_records: usize,
    ) -> Result<PolledBatch, QueueError>;

    /// Append a message; the partition is chosen from the key.
    async fn publish(&self, key: Option<&str>, value: &[u8]) -> Result<Published, QueueError>;

    /// Release the consumer. Uncommitted messages stay pending.
    async fn close(&self) -> Result<(), QueueError>;

    /// Health check (validates connection)
    async fn health_check(&self) -> Result<(), QueueError>;

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}

/// Stable partition for a message key (FNV-1a)
///
/// Messages without a key are spread by the caller.
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    if partitions <= 1 {
        return 0;
    }
    let hash = key.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    });
    (hash % u64::from(partitions)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(partition: u32, offset: &str) -> QueueMessage {
        QueueMessage {
            partition,
            offset: offset.to_string(),
            key: None,
            value: Vec::new(),
        }
    }

    #[test]
    fn test_from_messages_groups_and_orders_partitions() {
        let batch = PolledBatch::from_messages(vec![
            msg(2, "0"),
            msg(0, "5"),
            msg(2, "1"),
            msg(0, "6"),
        ]);

        assert_eq!(batch.partitions.len(), 2);
        assert_eq!(batch.partitions[0].partition, 0);
        assert_eq!(batch.len(), 4);

        let offsets: Vec<_> = batch
            .into_messages()
            .into_iter()
            .map(|m| (m.partition, m.offset))
            .collect();
        assert_eq!(
            offsets,
            vec![
                (0, "5".to_string()),
                (0, "6".to_string()),
                (2, "0".to_string()),
                (2, "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_batch() {
        let batch = PolledBatch::default();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }

    #[test]
    fn test_partition_for_key_is_stable_and_bounded() {
        for key in ["1", "42", "tenant-7", ""] {
            let p = partition_for_key(key, 4);
            assert!(p < 4);
            assert_eq!(p, partition_for_key(key, 4));
        }
        assert_eq!(partition_for_key("42", 1), 0);
        assert_eq!(partition_for_key("42", 0), 0);
    }
}
