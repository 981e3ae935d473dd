//! Redis Streams queue backend
//!
//! Each partition of a topic is one stream consumed through a consumer group:
//! - `XADD` for publishing (with MAXLEN trimming)
//! - `XREADGROUP` for consuming
//! - `XACK` for commit
//! - `XPENDING` + `XCLAIM` for recovery of deliveries left by crashed consumers
//!
//! On startup the consumer first re-reads its own pending entries (cursor `0`)
//! so messages delivered before a restart are processed again. This relies on
//! the consumer name being stable across restarts (`queue.consumer_name`);
//! entries pending under any other name are reached through `XCLAIM`.
//!
//! ## Key Layout
//!
//! - Streams: `{easysmart}:stream:{topic}:{partition}` (hash tag for cluster compatibility)
//! - Entry fields: `key` (optional) and `payload`

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{RedisResult, Value as RedisValue};
use deadpool_redis::{Config, Pool, Runtime};
use parking_lot::Mutex;

use super::backend::{PolledBatch, Published, QueueBackend, QueueMessage, partition_for_key};
use super::error::QueueError;
use crate::core::constants::QUEUE_STREAM_MAXLEN;

/// Stream key prefix (hash tag for Redis Cluster)
const STREAM_PREFIX: &str = "{easysmart}:stream:";

/// Identity of this consumer inside the group
#[derive(Debug, Clone)]
pub struct ConsumerIdentity {
    pub topic: String,
    pub group: String,
    pub consumer: String,
}

#[derive(Default)]
struct ConsumerState {
    /// Per-partition cursor over our own pending entries; `None` once drained
    recovery: Vec<Option<String>>,
    /// Per-partition ids delivered but not yet acknowledged
    delivered: Vec<Vec<String>>,
}

/// Entry parsed from a stream reply
#[derive(Debug, PartialEq, Eq)]
struct RawEntry {
    id: String,
    key: Option<String>,
    /// `None` when the entry was trimmed while pending
    payload: Option<Vec<u8>>,
}

/// Redis Streams queue backend
pub struct RedisQueueBackend {
    pool: Pool,
    identity: ConsumerIdentity,
    stream_keys: Vec<String>,
    stream_maxlen: u64,
    state: Mutex<ConsumerState>,
    round_robin: AtomicU32,
}

impl RedisQueueBackend {
    /// Connect, validate with PING and create the consumer group on every partition stream
    pub async fn new(
        redis_url: &str,
        identity: ConsumerIdentity,
        partitions: u32,
    ) -> Result<Self, QueueError> {
        let sanitized_url = sanitize_redis_url(redis_url);

        let mut config = Config::from_url(redis_url);
        config.pool = Some(deadpool_redis::PoolConfig {
            max_size: 8,
            timeouts: deadpool_redis::Timeouts {
                wait: Some(Duration::from_secs(5)),
                create: Some(Duration::from_secs(5)),
                recycle: Some(Duration::from_secs(5)),
            },
            ..Default::default()
        });

        let pool = config.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            QueueError::Connection(format!(
                "Failed to create Redis pool for {sanitized_url}: {e}"
            ))
        })?;

        let mut conn = pool.get().await.map_err(|e| {
            QueueError::Connection(format!(
                "Failed to get Redis connection from pool for {sanitized_url}: {e}"
            ))
        })?;

        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| {
                QueueError::Connection(format!("Redis PING failed for {sanitized_url}: {e}"))
            })?;
        drop(conn);

        let partitions = partitions.max(1);
        let stream_keys = (0..partitions)
            .map(|p| stream_key(&identity.topic, p))
            .collect();

        let backend = Self {
            pool,
            identity,
            stream_keys,
            stream_maxlen: QUEUE_STREAM_MAXLEN,
            state: Mutex::new(ConsumerState {
                recovery: vec![Some("0".to_string()); partitions as usize],
                delivered: vec![Vec::new(); partitions as usize],
            }),
            round_robin: AtomicU32::new(0),
        };
        backend.ensure_consumer_groups().await?;

        tracing::debug!(
            url = %sanitized_url,
            topic = %backend.identity.topic,
            group = %backend.identity.group,
            consumer = %backend.identity.consumer,
            partitions,
            "Redis queue backend connected"
        );
        Ok(backend)
    }

    /// Create the consumer group on every stream if not exists
    async fn ensure_consumer_groups(&self) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;

        for key in &self.stream_keys {
            let result: RedisResult<String> = deadpool_redis::redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(key)
                .arg(&self.identity.group)
                .arg("0") // From the beginning to pick up entries published before the group
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;

            match result {
                Ok(_) => {}
                Err(e) if e.to_string().contains("BUSYGROUP") => {}
                Err(e) => {
                    return Err(QueueError::ConsumerGroup(format!(
                        "Failed to create consumer group {}: {e}",
                        self.identity.group
                    )));
                }
            }
        }
        Ok(())
    }

    fn partition_of(&self, stream: &str) -> Option<u32> {
        self.stream_keys
            .iter()
            .position(|k| k == stream)
            .map(|p| p as u32)
    }

    fn per_stream_count(&self, max_records: usize) -> usize {
        (max_records / self.stream_keys.len()).max(1)
    }

    /// Read our own pending entries for partitions still in recovery
    async fn read_recovery(&self, max_records: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let cursors: Vec<(u32, String)> = {
            let state = self.state.lock();
            state
                .recovery
                .iter()
                .enumerate()
                .filter_map(|(p, cursor)| cursor.clone().map(|c| (p as u32, c)))
                .collect()
        };
        if cursors.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = deadpool_redis::redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.identity.group)
            .arg(&self.identity.consumer)
            .arg("COUNT")
            .arg(self.per_stream_count(max_records))
            .arg("STREAMS");
        for (p, _) in &cursors {
            cmd.arg(&self.stream_keys[*p as usize]);
        }
        for (_, cursor) in &cursors {
            cmd.arg(cursor);
        }

        let mut conn = self.pool.get().await?;
        let reply: RedisValue = cmd.query_async(&mut conn).await?;
        let streams = parse_xreadgroup_response(reply);

        let mut messages = Vec::new();
        let mut state = self.state.lock();
        for (p, _) in &cursors {
            let entries = streams
                .iter()
                .find(|(name, _)| self.partition_of(name) == Some(*p))
                .map(|(_, entries)| entries.as_slice())
                .unwrap_or_default();

            match entries.last() {
                None => state.recovery[*p as usize] = None,
                Some(last) => state.recovery[*p as usize] = Some(last.id.clone()),
            }
            for entry in entries {
                state.delivered[*p as usize].push(entry.id.clone());
                if let Some(message) = to_message(*p, entry) {
                    messages.push(message);
                }
            }
        }
        drop(state);

        if !messages.is_empty() {
            tracing::debug!(count = messages.len(), "Recovered pending entries from previous run");
        }
        Ok(messages)
    }

    /// Blocking read of new entries across all partitions
    async fn read_new(
        &self,
        timeout: Duration,
        max_records: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut cmd = deadpool_redis::redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.identity.group)
            .arg(&self.identity.consumer)
            .arg("BLOCK")
            .arg(timeout.as_millis().max(1) as u64)
            .arg("COUNT")
            .arg(self.per_stream_count(max_records))
            .arg("STREAMS");
        for key in &self.stream_keys {
            cmd.arg(key);
        }
        for _ in &self.stream_keys {
            cmd.arg(">"); // Only new messages
        }

        let mut conn = self.pool.get().await?;
        let result: RedisResult<RedisValue> = cmd.query_async(&mut conn).await;

        let reply = match result {
            Ok(RedisValue::Nil) => return Ok(Vec::new()),
            Ok(value) => value,
            Err(e) if e.to_string().contains("NOGROUP") => {
                // Consumer group was lost (e.g. stream key recreated)
                tracing::warn!("Consumer group lost, recreating from start...");
                drop(conn);
                self.ensure_consumer_groups().await?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(self.record_deliveries(parse_xreadgroup_response(reply)))
    }

    fn record_deliveries(&self, streams: Vec<(String, Vec<RawEntry>)>) -> Vec<QueueMessage> {
        let mut messages = Vec::new();
        let mut state = self.state.lock();
        for (name, entries) in streams {
            let Some(p) = self.partition_of(&name) else {
                continue;
            };
            for entry in entries {
                state.delivered[p as usize].push(entry.id.clone());
                if let Some(message) = to_message(p, &entry) {
                    messages.push(message);
                }
            }
        }
        messages
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn poll(
        &self,
        timeout: Duration,
        max_records: usize,
    ) -> Result<PolledBatch, QueueError> {
        let recovered = self.read_recovery(max_records).await?;
        if !recovered.is_empty() {
            return Ok(PolledBatch::from_messages(recovered));
        }
        let messages = self.read_new(timeout, max_records).await?;
        Ok(PolledBatch::from_messages(messages))
    }

    async fn commit(&self) -> Result<usize, QueueError> {
        let pending: Vec<(usize, Vec<String>)> = {
            let mut state = self.state.lock();
            state
                .delivered
                .iter_mut()
                .enumerate()
                .filter(|(_, ids)| !ids.is_empty())
                .map(|(p, ids)| (p, std::mem::take(ids)))
                .collect()
        };
        if pending.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.get().await?;
        let mut committed = 0;
        let mut remaining = pending.into_iter();

        while let Some((p, ids)) = remaining.next() {
            let mut cmd = deadpool_redis::redis::cmd("XACK");
            cmd.arg(&self.stream_keys[p]).arg(&self.identity.group);
            for id in &ids {
                cmd.arg(id.as_str());
            }

            if let Err(e) = cmd.query_async::<i64>(&mut conn).await {
                // Keep unacknowledged ids for the next commit
                let mut state = self.state.lock();
                state.delivered[p].extend(ids);
                for (p, ids) in remaining {
                    state.delivered[p].extend(ids);
                }
                return Err(e.into());
            }
            committed += ids.len();
        }

        Ok(committed)
    }

    async fn claim_stale(
        &self,
        min_idle: Duration,
        max_records: usize,
    ) -> Result<PolledBatch, QueueError> {
        let min_idle_ms = min_idle.as_millis() as u64;
        let mut conn = self.pool.get().await?;
        let mut claimed = Vec::new();

        for key in &self.stream_keys {
            let pending: RedisValue = deadpool_redis::redis::cmd("XPENDING")
                .arg(key)
                .arg(&self.identity.group)
                .arg("-")
                .arg("+")
                .arg(max_records.max(1))
                .query_async(&mut conn)
                .await?;

            let ids_to_claim = parse_idle_pending(pending, min_idle_ms, &self.identity.consumer);
            if ids_to_claim.is_empty() {
                continue;
            }

            let mut cmd = deadpool_redis::redis::cmd("XCLAIM");
            cmd.arg(key)
                .arg(&self.identity.group)
                .arg(&self.identity.consumer)
                .arg(min_idle_ms);
            for id in &ids_to_claim {
                cmd.arg(id);
            }

            let reply: RedisValue = cmd.query_async(&mut conn).await?;
            if let RedisValue::Array(entries) = reply {
                claimed.push((key.clone(), parse_entries(&entries)));
            }
        }
        drop(conn);

        let messages = self.record_deliveries(claimed);
        if !messages.is_empty() {
            tracing::info!(count = messages.len(), "Claimed stale deliveries");
        }
        Ok(PolledBatch::from_messages(messages))
    }

    async fn publish(&self, key: Option<&str>, value: &[u8]) -> Result<Published, QueueError> {
        let partitions = self.stream_keys.len() as u32;
        let partition = match key {
            Some(k) => partition_for_key(k, partitions),
            None => self.round_robin.fetch_add(1, Ordering::Relaxed) % partitions,
        };
        let mut conn = self.pool.get().await?;

        let mut cmd = deadpool_redis::redis::cmd("XADD");
        cmd.arg(&self.stream_keys[partition as usize])
            .arg("MAXLEN")
            .arg("~")
            .arg(self.stream_maxlen)
            .arg("*");
        if let Some(k) = key {
            cmd.arg("key").arg(k);
        }
        cmd.arg("payload").arg(value);

        let id: String = cmd.query_async(&mut conn).await?;
        Ok(Published {
            partition,
            offset: id,
        })
    }

    async fn close(&self) -> Result<(), QueueError> {
        let uncommitted: usize = self.state.lock().delivered.iter().map(Vec::len).sum();
        tracing::debug!(
            consumer = %self.identity.consumer,
            uncommitted,
            "Redis queue consumer closed"
        );
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

fn stream_key(topic: &str, partition: u32) -> String {
    format!("{}{}:{}", STREAM_PREFIX, topic, partition)
}

fn to_message(partition: u32, entry: &RawEntry) -> Option<QueueMessage> {
    let payload = entry.payload.as_ref()?;
    Some(QueueMessage {
        partition,
        offset: entry.id.clone(),
        key: entry.key.clone(),
        value: payload.clone(),
    })
}

/// Parse XREADGROUP response into `(stream, entries)` pairs
fn parse_xreadgroup_response(value: RedisValue) -> Vec<(String, Vec<RawEntry>)> {
    // Response format: [[stream_name, [[id, [field, value, ...]], ...]]]
    let RedisValue::Array(streams) = value else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for stream_data in streams {
        let RedisValue::Array(parts) = stream_data else {
            continue;
        };
        if parts.len() < 2 {
            continue;
        }
        let (RedisValue::BulkString(name), RedisValue::Array(msg_list)) = (&parts[0], &parts[1])
        else {
            continue;
        };
        let Ok(name) = String::from_utf8(name.clone()) else {
            continue;
        };
        out.push((name, parse_entries(msg_list)));
    }
    out
}

/// Parse `[[id, [field, value, ...] | nil], ...]`
fn parse_entries(entries: &[RedisValue]) -> Vec<RawEntry> {
    let mut out = Vec::new();
    for entry in entries {
        if let RedisValue::Array(parts) = entry
            && let Some(RedisValue::BulkString(id_bytes)) = parts.first()
            && let Ok(id) = String::from_utf8(id_bytes.clone())
        {
            let (key, payload) = match parts.get(1) {
                Some(RedisValue::Array(fields)) => extract_fields(fields),
                _ => (None, None),
            };
            out.push(RawEntry { id, key, payload });
        }
    }
    out
}

/// Extract `key` and `payload` from `[field1, value1, field2, value2, ...]`
fn extract_fields(fields: &[RedisValue]) -> (Option<String>, Option<Vec<u8>>) {
    let mut key = None;
    let mut payload = None;
    for pair in fields.chunks(2) {
        if let [RedisValue::BulkString(name), RedisValue::BulkString(value)] = pair {
            match name.as_slice() {
                b"payload" => payload = Some(value.clone()),
                b"key" => key = String::from_utf8(value.clone()).ok(),
                _ => {}
            }
        }
    }
    (key, payload)
}

/// Ids from an extended XPENDING reply idle for at least `min_idle_ms`
/// and owned by another consumer
fn parse_idle_pending(pending: RedisValue, min_idle_ms: u64, own_consumer: &str) -> Vec<String> {
    let mut ids = Vec::new();
    if let RedisValue::Array(entries) = pending {
        for entry in entries {
            // [id, consumer, idle_time, delivery_count]
            if let RedisValue::Array(parts) = entry
                && parts.len() >= 3
                && let (
                    RedisValue::BulkString(id_bytes),
                    RedisValue::BulkString(owner),
                    RedisValue::Int(idle),
                ) = (&parts[0], &parts[1], &parts[2])
                && *idle as u64 >= min_idle_ms
                && owner.as_slice() != own_consumer.as_bytes()
                && let Ok(id) = String::from_utf8(id_bytes.clone())
            {
                ids.push(id);
            }
        }
    }
    ids
}

/// Sanitize Redis URL for logging (removes password)
pub(crate) fn sanitize_redis_url(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
        if let Some(colon_pos) = url[scheme_end..at_pos].find(':') {
            let abs_colon = scheme_end + colon_pos;
            let prefix = &url[..abs_colon + 1];
            let suffix = &url[at_pos..];
            return format!("{prefix}***{suffix}");
        }
    }
    url.to_string()
}
