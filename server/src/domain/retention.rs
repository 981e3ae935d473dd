//! Claim-check blob retention
//!
//! Blobs left behind (delete-after-processing off, failed deletes, poison
//! messages) are removed once they are older than the retention window.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::constants::{
    CLAIM_CHECK_PREFIX, CLAIM_CHECK_SUFFIX, RETENTION_RETRY_DELAY_SECS,
    RETENTION_SWEEP_INTERVAL_SECS,
};
use crate::data::objects::StorageRegistry;

/// Counters of one sweep
///
/// `failed` counts both failed deletes and stores whose listing failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Delete expired claim-check blobs from every configured store
///
/// Failures are counted and skipped; an unreachable store does not stop the
/// sweep of the others.
pub async fn sweep_once(
    registry: &StorageRegistry,
    retention_days: u32,
    now: DateTime<Utc>,
) -> SweepStats {
    let cutoff = now - TimeDelta::days(i64::from(retention_days));
    let mut stats = SweepStats::default();

    for (kind, store) in registry.all() {
        let objects = match store.list(CLAIM_CHECK_PREFIX).await {
            Ok(objects) => objects,
            Err(e) => {
                stats.failed += 1;
                tracing::warn!(storage = %kind, error = %e, "Failed to list blobs for retention");
                continue;
            }
        };
        for object in objects {
            if !object.key.ends_with(CLAIM_CHECK_SUFFIX) {
                continue;
            }
            stats.scanned += 1;
            if object.last_modified >= cutoff {
                continue;
            }
            match store.delete(&object.key).await {
                Ok(()) => {
                    stats.deleted += 1;
                    tracing::trace!(storage = %kind, key = %object.key, "Expired blob deleted");
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(
                        storage = %kind,
                        key = %object.key,
                        error = %e,
                        "Failed to delete expired blob"
                    );
                }
            }
        }
    }

    stats
}

/// Spawn the periodic sweep; `None` when retention is disabled
pub fn start_retention_task(
    registry: StorageRegistry,
    retention_days: u32,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if retention_days == 0 {
        tracing::debug!("File retention disabled");
        return None;
    }

    tracing::debug!(retention_days, "Starting file retention task");

    Some(tokio::spawn(async move {
        loop {
            let stats = sweep_once(&registry, retention_days, Utc::now()).await;
            let delay = if stats.failed > 0 {
                tracing::warn!(
                    scanned = stats.scanned,
                    deleted = stats.deleted,
                    failed = stats.failed,
                    "File retention sweep had failures, retrying later"
                );
                RETENTION_RETRY_DELAY_SECS
            } else {
                if stats.deleted > 0 {
                    tracing::info!(
                        scanned = stats.scanned,
                        deleted = stats.deleted,
                        "File retention sweep completed"
                    );
                } else {
                    tracing::debug!(scanned = stats.scanned, "File retention sweep, nothing to delete");
                }
                RETENTION_SWEEP_INTERVAL_SECS
            };

            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    tracing::debug!("File retention task shutting down");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::core::config::StorageType;
    use crate::data::objects::testing::MockObjectStore;

    fn registry(store: Arc<MockObjectStore>) -> StorageRegistry {
        let mut registry = StorageRegistry::new(StorageType::Local);
        registry.register(StorageType::Local, store);
        registry
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_expired_blobs() {
        let now = Utc::now();
        let store = Arc::new(MockObjectStore::new());
        store.insert_at("telemetry/a/old.json.gz", vec![1], now - TimeDelta::days(8));
        store.insert_at("telemetry/a/new.json.gz", vec![1], now - TimeDelta::days(6));
        store.insert_at("telemetry/a/notes.txt", vec![1], now - TimeDelta::days(30));
        store.insert_at("other/old.json.gz", vec![1], now - TimeDelta::days(30));

        let stats = sweep_once(&registry(store.clone()), 7, now).await;

        assert_eq!(
            stats,
            SweepStats {
                scanned: 2,
                deleted: 1,
                failed: 0,
            }
        );
        assert_eq!(store.deleted(), vec!["telemetry/a/old.json.gz"]);
        assert!(store.contains("telemetry/a/new.json.gz"));
        assert!(store.contains("telemetry/a/notes.txt"));
    }

    #[tokio::test]
    async fn test_sweep_counts_failed_deletes() {
        let now = Utc::now();
        let store = Arc::new(MockObjectStore::new());
        store.insert_at("telemetry/a/1.json.gz", vec![1], now - TimeDelta::days(10));
        store.insert_at("telemetry/a/2.json.gz", vec![1], now - TimeDelta::days(10));
        store.fail_delete_for("telemetry/a/1.json.gz");

        let stats = sweep_once(&registry(store.clone()), 7, now).await;

        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.failed, 1);
        assert!(store.contains("telemetry/a/1.json.gz"));
    }

    #[tokio::test]
    async fn test_sweep_covers_every_store() {
        let now = Utc::now();
        let local = Arc::new(MockObjectStore::new());
        let minio = Arc::new(MockObjectStore::new());
        local.insert_at("telemetry/l.json.gz", vec![1], now - TimeDelta::days(2));
        minio.insert_at("telemetry/m.json.gz", vec![1], now - TimeDelta::days(2));

        let mut registry = registry(local.clone());
        registry.register(StorageType::Minio, minio.clone());

        let stats = sweep_once(&registry, 1, now).await;
        assert_eq!(stats.deleted, 2);
        assert!(!local.contains("telemetry/l.json.gz"));
        assert!(!minio.contains("telemetry/m.json.gz"));
    }

    #[tokio::test]
    async fn test_sweep_continues_past_unlistable_store() {
        let now = Utc::now();
        let minio = Arc::new(MockObjectStore::new());
        let local = Arc::new(MockObjectStore::new());
        minio.insert_at("telemetry/m.json.gz", vec![1], now - TimeDelta::days(2));
        minio.fail_list();
        local.insert_at("telemetry/l.json.gz", vec![1], now - TimeDelta::days(2));

        // Default store is listed first
        let mut registry = StorageRegistry::new(StorageType::Minio);
        registry.register(StorageType::Minio, minio.clone());
        registry.register(StorageType::Local, local.clone());

        let stats = sweep_once(&registry, 1, now).await;

        assert_eq!(
            stats,
            SweepStats {
                scanned: 1,
                deleted: 1,
                failed: 1,
            }
        );
        assert!(!local.contains("telemetry/l.json.gz"));
        assert!(minio.contains("telemetry/m.json.gz"));
    }

    #[tokio::test]
    async fn test_disabled_when_zero_days() {
        let (_tx, rx) = watch::channel(false);
        let store = Arc::new(MockObjectStore::new());
        assert!(start_retention_task(registry(store), 0, rx).is_none());
    }

    #[tokio::test]
    async fn test_task_sweeps_immediately_and_stops_on_shutdown() {
        let store = Arc::new(MockObjectStore::new());
        store.insert_at(
            "telemetry/a/old.json.gz",
            vec![1],
            Utc::now() - TimeDelta::days(30),
        );
        let (tx, rx) = watch::channel(false);

        let handle = start_retention_task(registry(store.clone()), 7, rx).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!store.contains("telemetry/a/old.json.gz"));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
