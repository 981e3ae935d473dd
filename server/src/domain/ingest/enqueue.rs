//! Claim-check producer
//!
//! Stores a telemetry document the way the gateway does and publishes the
//! pointer. Backs the `enqueue` command used for replays and smoke tests.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::envelope::ClaimCheckEnvelope;
use crate::core::constants::{CLAIM_CHECK_PREFIX, CLAIM_CHECK_SUFFIX};
use crate::data::objects::{ObjectStoreError, StorageRegistry};
use crate::data::queue::{Published, QueueBackend, QueueError};
use crate::utils::gzip;

#[derive(Error, Debug)]
pub enum EnqueueError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to compress payload: {0}")]
    Compress(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] ObjectStoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Object key for a blob stored at `now`
///
/// `telemetry/{YYYY-MM-DDTHH-MM-SS}/{uuid}.json.gz`
pub fn claim_check_key(now: DateTime<Utc>) -> String {
    format!(
        "{}{}/{}{}",
        CLAIM_CHECK_PREFIX,
        now.format("%Y-%m-%dT%H-%M-%S"),
        Uuid::new_v4(),
        CLAIM_CHECK_SUFFIX
    )
}

/// Gzip `payload` into the default store and publish its envelope keyed by tenant
pub async fn enqueue_payload(
    registry: &StorageRegistry,
    queue: &dyn QueueBackend,
    tenant_id: i64,
    payload: &[u8],
    now: DateTime<Utc>,
) -> Result<(ClaimCheckEnvelope, Published), EnqueueError> {
    // Reject garbage before it reaches storage
    serde_json::from_slice::<Value>(payload)?;

    let compressed = gzip::compress(payload)?;
    let key = claim_check_key(now);
    let storage_type = registry.default_type();
    let store = registry.get(storage_type)?;
    store.put(&key, &compressed).await?;

    let envelope = ClaimCheckEnvelope {
        claim_check: key,
        storage_type: storage_type.to_string(),
        file_size: compressed.len() as u64,
        original_size: payload.len() as u64,
        compression: "gzip".to_string(),
        timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    let value = serde_json::to_vec(&envelope)?;
    let published = queue
        .publish(Some(&tenant_id.to_string()), &value)
        .await?;

    tracing::debug!(
        tenant_id,
        key = %envelope.claim_check,
        storage = %storage_type,
        partition = published.partition,
        offset = %published.offset,
        "Claim check enqueued"
    );
    Ok((envelope, published))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::core::config::StorageType;
    use crate::data::objects::LocalObjectStore;
    use crate::data::queue::MemoryQueueBackend;
    use crate::domain::ingest::envelope::Envelope;
    use crate::domain::ingest::resolver::PayloadResolver;

    fn local_registry(dir: &TempDir) -> StorageRegistry {
        let mut registry = StorageRegistry::new(StorageType::Local);
        registry.register(
            StorageType::Local,
            Arc::new(LocalObjectStore::new(dir.path().to_path_buf())),
        );
        registry
    }

    #[test]
    fn test_claim_check_key_layout() {
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 5).unwrap();
        let key = claim_check_key(now);
        assert!(key.starts_with("telemetry/2025-01-15T10-30-05/"));
        assert!(key.ends_with(".json.gz"));
        assert!(!key.contains(':'));
    }

    #[tokio::test]
    async fn test_enqueue_then_resolve() {
        let dir = TempDir::new().unwrap();
        let registry = local_registry(&dir);
        let queue = MemoryQueueBackend::new(2);
        let payload = json!([{"equip_uuid": "e", "sensor_uuid": "s", "status": "1"}]).to_string();

        let (envelope, published) =
            enqueue_payload(&registry, &queue, 9, payload.as_bytes(), Utc::now())
                .await
                .unwrap();

        assert_eq!(envelope.storage_type, "local");
        assert_eq!(envelope.original_size, payload.len() as u64);
        assert_eq!(envelope.compression, "gzip");

        let messages = queue
            .poll(Duration::from_millis(20), 10)
            .await
            .unwrap()
            .into_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key.as_deref(), Some("9"));
        assert_eq!(messages[0].partition, published.partition);

        let decoded = Envelope::from_message(&messages[0]).unwrap();
        let resolved = PayloadResolver::new(registry)
            .resolve(&decoded.body, decoded.size)
            .await
            .unwrap();
        assert_eq!(resolved.records.len(), 1);
        assert_eq!(resolved.payload_bytes, payload.len() as u64);
        assert_eq!(
            resolved.claim_check.unwrap().file_size,
            envelope.file_size
        );
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_json() {
        let dir = TempDir::new().unwrap();
        let registry = local_registry(&dir);
        let queue = MemoryQueueBackend::new(1);

        let result = enqueue_payload(&registry, &queue, 1, b"{oops", Utc::now()).await;

        assert!(matches!(result, Err(EnqueueError::Json(_))));
        assert_eq!(queue.lag(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_requires_default_store() {
        let registry = StorageRegistry::new(StorageType::Minio);
        let queue = MemoryQueueBackend::new(1);

        let result = enqueue_payload(&registry, &queue, 1, b"[]", Utc::now()).await;

        assert!(matches!(result, Err(EnqueueError::Storage(_))));
    }
}
