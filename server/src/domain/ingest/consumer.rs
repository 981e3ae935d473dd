//! Consumer loop
//!
//! poll → resolve → process → cleanup → commit, one message at a time.
//! A failing message never stops the batch; it is left uncommitted-equivalent
//! by keeping its blob, and the batch commit still happens once at the end.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::envelope::{Envelope, EnvelopeError};
use super::processor::{BatchResult, BulkProcessor, parse_tenant_id};
use super::resolver::{ClaimCheckRef, PayloadResolver, ResolveError};
use crate::core::config::AppConfig;
use crate::core::constants::{CLAIM_INTERVAL_SECS, EMPTY_POLL_BACKOFF_MS, POLL_TIMEOUT_MS};
use crate::data::queue::{MessageQueue, PolledBatch, QueueError, QueueMessage};

/// Message-level failure
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("telemetry transaction failed: {0}")]
    Transaction(String),
}

/// Loop timing and cleanup behaviour
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Topic name, part of the source id of inline messages
    pub topic: String,
    pub delete_after_processing: bool,
    pub poll_timeout: Duration,
    pub empty_poll_backoff: Duration,
    pub claim_interval: Duration,
    pub claim_min_idle: Duration,
}

impl ConsumerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            topic: config.queue.topic.clone(),
            delete_after_processing: config.storage.delete_after_processing,
            poll_timeout: Duration::from_millis(POLL_TIMEOUT_MS),
            empty_poll_backoff: Duration::from_millis(EMPTY_POLL_BACKOFF_MS),
            claim_interval: Duration::from_secs(CLAIM_INTERVAL_SECS),
            claim_min_idle: Duration::from_secs(config.queue.claim_idle_secs),
        }
    }
}

/// Per-batch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub messages: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub records_inserted: usize,
}

/// Drives the queue through the ingest pipeline
pub struct ConsumerLoop {
    queue: MessageQueue,
    resolver: PayloadResolver,
    processor: BulkProcessor,
    settings: ConsumerSettings,
}

impl ConsumerLoop {
    pub fn new(
        queue: MessageQueue,
        resolver: PayloadResolver,
        processor: BulkProcessor,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            queue,
            resolver,
            processor,
            settings,
        }
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    /// Spawn the loop on the runtime
    pub fn start(self, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown_rx).await })
    }

    /// Run until shutdown, then close the queue
    ///
    /// Shutdown is observed between polls; a batch in progress always finishes.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!(
            topic = %self.settings.topic,
            backend = self.queue.backend().backend_name(),
            batch_size = self.queue.batch_size(),
            auto_commit = self.queue.auto_commit(),
            delete_after_processing = self.settings.delete_after_processing,
            "Telemetry consumer started"
        );

        // Deliveries left pending by a previous run are claimed before the first poll
        let mut next_claim = Instant::now();

        loop {
            if *shutdown_rx.borrow() {
                tracing::debug!("Telemetry consumer received shutdown");
                break;
            }

            if Instant::now() >= next_claim {
                self.claim_stale().await;
                next_claim = Instant::now() + self.settings.claim_interval;
            }

            match self.queue.poll(self.settings.poll_timeout).await {
                Ok(batch) if batch.is_empty() => {
                    self.pause(&mut shutdown_rx, self.settings.empty_poll_backoff)
                        .await;
                }
                Ok(batch) => {
                    let summary = self.process_batch(batch).await;
                    tracing::info!(
                        messages = summary.messages,
                        succeeded = summary.succeeded,
                        failed = summary.failed,
                        records_inserted = summary.records_inserted,
                        "Batch processed"
                    );
                }
                Err(QueueError::Closed) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Queue poll failed");
                    self.pause(&mut shutdown_rx, self.settings.poll_timeout)
                        .await;
                }
            }
        }

        if let Err(e) = self.queue.close().await {
            tracing::warn!(error = %e, "Failed to close queue");
        }
        tracing::info!("Telemetry consumer stopped");
    }

    /// Sleep, waking early on shutdown
    async fn pause(&self, shutdown_rx: &mut watch::Receiver<bool>, duration: Duration) {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }

    async fn claim_stale(&self) {
        match self.queue.claim_stale(self.settings.claim_min_idle).await {
            Ok(batch) if batch.is_empty() => {
                tracing::trace!("No stale deliveries to claim");
            }
            Ok(batch) => {
                let summary = self.process_batch(batch).await;
                tracing::info!(
                    messages = summary.messages,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "Processed claimed deliveries"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to claim stale deliveries");
            }
        }
    }

    /// Process every message of a batch, then commit once (manual mode)
    pub async fn process_batch(&self, batch: PolledBatch) -> BatchSummary {
        let messages = batch.into_messages();
        let mut summary = BatchSummary {
            messages: messages.len(),
            ..Default::default()
        };
        if messages.is_empty() {
            return summary;
        }

        for message in &messages {
            match self.process_message(message).await {
                Ok(result) => {
                    summary.succeeded += 1;
                    summary.records_inserted += result.inserted;
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        tenant_id = parse_tenant_id(message.key.as_deref()),
                        partition = message.partition,
                        offset = %message.offset,
                        error = %e,
                        "Failed to process message"
                    );
                }
            }
        }

        if !self.queue.auto_commit() {
            match self.queue.commit().await {
                Ok(committed) => tracing::debug!(committed, "Offsets committed"),
                Err(e) => tracing::error!(
                    error = %e,
                    "Failed to commit offsets; batch will be redelivered"
                ),
            }
        }

        summary
    }

    async fn process_message(&self, message: &QueueMessage) -> Result<BatchResult, IngestError> {
        let envelope = Envelope::from_message(message)?;
        let tenant_id = parse_tenant_id(envelope.key.as_deref());
        let resolved = self.resolver.resolve(&envelope.body, envelope.size).await?;

        let source_id = match &resolved.claim_check {
            Some(claim) => claim.key.clone(),
            None => format!(
                "{}:{}:{}",
                self.settings.topic, envelope.partition, envelope.offset
            ),
        };

        let result = self
            .processor
            .process(
                tenant_id,
                &resolved.records,
                &source_id,
                resolved.payload_bytes,
            )
            .await;

        if let Some(failure) = &result.failure {
            return Err(IngestError::Transaction(failure.clone()));
        }

        if let Some(first) = result.errors.first() {
            tracing::warn!(
                tenant_id,
                rejected = result.errors.len(),
                first_index = first.record_index,
                first_reason = %first.reason,
                "Rejected telemetry records"
            );
        }
        tracing::debug!(
            tenant_id,
            partition = envelope.partition,
            offset = %envelope.offset,
            claim_check = resolved.claim_check.as_ref().map(|c| c.key.as_str()),
            processed = result.processed,
            inserted = result.inserted,
            duplicates = result.duplicates,
            "Telemetry processed"
        );

        if self.settings.delete_after_processing
            && let Some(claim) = &resolved.claim_check
        {
            self.delete_blob(claim).await;
        }

        Ok(result)
    }

    /// Delete a processed blob; failures are logged and swallowed
    async fn delete_blob(&self, claim: &ClaimCheckRef) {
        let store = match self.resolver.storage().get(claim.storage) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(key = %claim.key, error = %e, "Cannot delete processed file");
                return;
            }
        };
        match store.delete(&claim.key).await {
            Ok(()) => tracing::debug!(key = %claim.key, "Processed file deleted"),
            Err(e) => {
                tracing::warn!(key = %claim.key, error = %e, "Failed to delete processed file")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    use crate::core::config::StorageType;
    use crate::data::objects::StorageRegistry;
    use crate::data::objects::testing::MockObjectStore;
    use crate::data::queue::{MemoryQueueBackend, Published, QueueBackend};
    use crate::data::telemetry::testing::MemoryTelemetryStore;
    use crate::utils::gzip;

    /// Memory queue that records polls, claims and commits
    struct RecordingQueue {
        inner: MemoryQueueBackend,
        polls: Mutex<Vec<Instant>>,
        claims: Mutex<Vec<Instant>>,
        commits: AtomicUsize,
        closes: AtomicUsize,
    }

    impl RecordingQueue {
        fn new() -> Self {
            Self {
                inner: MemoryQueueBackend::new(1),
                polls: Mutex::new(Vec::new()),
                claims: Mutex::new(Vec::new()),
                commits: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl QueueBackend for RecordingQueue {
        async fn poll(
            &self,
            timeout: Duration,
            max_records: usize,
        ) -> Result<PolledBatch, QueueError> {
            self.polls.lock().push(Instant::now());
            self.inner.poll(timeout, max_records).await
        }

        async fn commit(&self) -> Result<usize, QueueError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            self.inner.commit().await
        }

        async fn claim_stale(
            &self,
            min_idle: Duration,
            max_records: usize,
        ) -> Result<PolledBatch, QueueError> {
            self.claims.lock().push(Instant::now());
            self.inner.claim_stale(min_idle, max_records).await
        }

        async fn publish(&self, key: Option<&str>, value: &[u8]) -> Result<Published, QueueError> {
            self.inner.publish(key, value).await
        }

        async fn close(&self) -> Result<(), QueueError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close().await
        }

        async fn health_check(&self) -> Result<(), QueueError> {
            self.inner.health_check().await
        }

        fn backend_name(&self) -> &'static str {
            "recording"
        }
    }

    struct Harness {
        queue: Arc<RecordingQueue>,
        objects: Arc<MockObjectStore>,
        store: Arc<MemoryTelemetryStore>,
        consumer: ConsumerLoop,
    }

    fn harness(delete_after_processing: bool) -> Harness {
        let queue = Arc::new(RecordingQueue::new());
        let objects = Arc::new(MockObjectStore::new());
        let store = Arc::new(MemoryTelemetryStore::new());

        let mut registry = StorageRegistry::new(StorageType::Minio);
        registry.register(StorageType::Minio, objects.clone());

        let settings = ConsumerSettings {
            topic: "telemetry.raw".to_string(),
            delete_after_processing,
            poll_timeout: Duration::ZERO,
            empty_poll_backoff: Duration::from_millis(100),
            claim_interval: Duration::from_secs(3600),
            claim_min_idle: Duration::from_secs(60),
        };
        let consumer = ConsumerLoop::new(
            MessageQueue::new(queue.clone(), 100, false),
            PayloadResolver::new(registry),
            BulkProcessor::new(store.clone()).with_retry(2, 1),
            settings,
        );

        Harness {
            queue,
            objects,
            store,
            consumer,
        }
    }

    fn telemetry(sensor: &str) -> serde_json::Value {
        json!([{
            "equip_uuid": "eq-1",
            "sensor_uuid": sensor,
            "status": "12.5",
            "timestamp": "2025-01-15T10:30:00Z"
        }])
    }

    /// Store a blob and publish its claim-check envelope
    async fn publish_claim_check(h: &Harness, key: &str, tenant: &str) {
        let json = serde_json::to_vec(&telemetry(key)).unwrap();
        h.objects.insert(key, gzip::compress(&json).unwrap());
        publish_pointer(h, key, tenant).await;
    }

    async fn publish_pointer(h: &Harness, key: &str, tenant: &str) {
        let envelope = json!({"claim_check": key, "storage_type": "minio", "compression": "gzip"});
        h.queue
            .publish(Some(tenant), envelope.to_string().as_bytes())
            .await
            .unwrap();
    }

    async fn poll(h: &Harness) -> PolledBatch {
        h.consumer.queue().poll(Duration::ZERO).await.unwrap()
    }

    #[tokio::test]
    async fn test_failed_message_does_not_stop_batch() {
        let h = harness(false);
        for i in 1..=5 {
            let key = format!("telemetry/day/{i}.json.gz");
            if i == 3 {
                publish_pointer(&h, &key, "1").await;
            } else {
                publish_claim_check(&h, &key, "1").await;
            }
        }

        let summary = h.consumer.process_batch(poll(&h).await).await;

        assert_eq!(
            summary,
            BatchSummary {
                messages: 5,
                succeeded: 4,
                failed: 1,
                records_inserted: 4,
            }
        );
        let sensors: Vec<_> = h
            .store
            .rows()
            .into_iter()
            .map(|(_, row)| row.sensor_uuid)
            .collect();
        assert!(sensors.contains(&"telemetry/day/4.json.gz".to_string()));
        assert!(sensors.contains(&"telemetry/day/5.json.gz".to_string()));
        assert_eq!(h.queue.commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_after_success_exactly_once() {
        let h = harness(true);
        publish_claim_check(&h, "telemetry/day/a.json.gz", "2").await;

        let summary = h.consumer.process_batch(poll(&h).await).await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(h.objects.deleted(), vec!["telemetry/day/a.json.gz"]);
        assert!(!h.objects.contains("telemetry/day/a.json.gz"));
    }

    #[tokio::test]
    async fn test_no_delete_on_transaction_failure() {
        let h = harness(true);
        publish_claim_check(&h, "telemetry/day/a.json.gz", "2").await;
        h.store.fail_next(10);

        let summary = h.consumer.process_batch(poll(&h).await).await;

        assert_eq!(summary.failed, 1);
        assert!(h.objects.deleted().is_empty());
        assert!(h.objects.contains("telemetry/day/a.json.gz"));
    }

    #[tokio::test]
    async fn test_no_delete_when_disabled() {
        let h = harness(false);
        publish_claim_check(&h, "telemetry/day/a.json.gz", "2").await;

        h.consumer.process_batch(poll(&h).await).await;
        assert!(h.objects.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_delete_failure_is_swallowed() {
        let h = harness(true);
        publish_claim_check(&h, "telemetry/day/a.json.gz", "2").await;
        h.objects.fail_delete_for("telemetry/day/a.json.gz");

        let summary = h.consumer.process_batch(poll(&h).await).await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(h.objects.deleted().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_once_even_when_all_fail() {
        let h = harness(false);
        h.queue.publish(None, b"{not json").await.unwrap();
        h.queue.publish(None, b"{\"claim_check\": 5}").await.unwrap();

        let summary = h.consumer.process_batch(poll(&h).await).await;

        assert_eq!(summary.failed, 2);
        assert_eq!(h.queue.commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_not_committed() {
        let h = harness(false);
        let summary = h.consumer.process_batch(PolledBatch::default()).await;
        assert_eq!(summary, BatchSummary::default());
        assert_eq!(h.queue.commits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let h = harness(false);
        publish_claim_check(&h, "telemetry/day/a.json.gz", "4").await;
        h.queue
            .publish(Some("4"), telemetry("inline").to_string().as_bytes())
            .await
            .unwrap();

        let messages = poll(&h).await.into_messages();
        let first = h
            .consumer
            .process_batch(PolledBatch::from_messages(messages.clone()))
            .await;
        assert_eq!(first.records_inserted, 2);
        let usage = h.store.usage(4);

        // Same offsets delivered again, as after a crash before the commit
        let second = h
            .consumer
            .process_batch(PolledBatch::from_messages(messages))
            .await;

        assert_eq!(second.succeeded, 2);
        assert_eq!(second.records_inserted, 0);
        assert_eq!(h.store.rows().len(), 2);
        assert_eq!(h.store.usage(4), usage);
    }

    #[tokio::test]
    async fn test_uncommitted_batch_redelivered_after_rewind() {
        let h = harness(false);
        publish_claim_check(&h, "telemetry/day/a.json.gz", "4").await;

        let batch = poll(&h).await;
        // Crash before processing/commit
        drop(batch);
        assert_eq!(h.queue.inner.rewind_uncommitted(), 1);

        let summary = h.consumer.process_batch(poll(&h).await).await;
        assert_eq!(summary.records_inserted, 1);
    }

    #[tokio::test]
    async fn test_tenant_from_key_and_inline_source_id() {
        let h = harness(false);
        h.queue
            .publish(Some("77"), telemetry("s").to_string().as_bytes())
            .await
            .unwrap();

        h.consumer.process_batch(poll(&h).await).await;

        let rows = h.store.rows();
        assert_eq!(rows[0].0, 77);
        assert_eq!(rows[0].1.source_id, "telemetry.raw:0:0");
    }

    #[tokio::test]
    async fn test_run_backs_off_on_empty_polls_and_stops() {
        let h = harness(false);
        let (tx, rx) = watch::channel(false);
        let queue = h.queue.clone();

        let handle = h.consumer.start(rx);
        tokio::time::sleep(Duration::from_millis(350)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        let polls = queue.polls.lock().clone();
        assert!(polls.len() >= 2, "expected several polls, got {}", polls.len());
        for pair in polls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
        assert_eq!(queue.commits.load(Ordering::SeqCst), 0);
        assert_eq!(queue.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_claims_stale_deliveries_before_first_poll() {
        let h = harness(false);
        let (tx, rx) = watch::channel(false);
        let queue = h.queue.clone();

        let handle = h.consumer.start(rx);
        tokio::time::sleep(Duration::from_millis(150)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        // The hourly interval has not elapsed, so only the startup claim ran
        let claims = queue.claims.lock().clone();
        let polls = queue.polls.lock().clone();
        assert_eq!(claims.len(), 1);
        assert!(!polls.is_empty());
        assert!(claims[0] <= polls[0]);
    }

    #[tokio::test]
    async fn test_run_processes_published_messages() {
        let h = harness(false);
        publish_claim_check(&h, "telemetry/day/a.json.gz", "3").await;
        let (tx, rx) = watch::channel(false);
        let (queue, store) = (h.queue.clone(), h.store.clone());

        let handle = h.consumer.start(rx);
        tokio::time::sleep(Duration::from_millis(150)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.rows().len(), 1);
        assert_eq!(queue.commits.load(Ordering::SeqCst), 1);
        assert_eq!(queue.inner.lag(), 0);
    }
}
