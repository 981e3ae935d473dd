//! Claim-check object storage
//!
//! The gateway writes gzip-compressed telemetry blobs to object storage and
//! publishes only a pointer (the claim-check key) on the queue. This module
//! resolves those pointers.
//!
//! ## Architecture
//!
//! - `store` - `ObjectStore` trait and key validation
//! - `filesystem` - Local filesystem backend (`local`)
//! - `s3` - MinIO / S3-compatible backend (`minio`)
//! - `error` - Error types for object operations
//!
//! ## Key Layout
//!
//! ```text
//! telemetry/
//! └── {iso-timestamp-with-dashes}/
//!     └── {uuid}.json.gz
//! ```

pub mod error;
pub mod filesystem;
pub mod s3;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::config::{StorageConfig, StorageType};

pub use error::ObjectStoreError;
pub use filesystem::LocalObjectStore;
pub use s3::MinioObjectStore;
pub use store::{ObjectInfo, ObjectStore, validate_key};

/// Configured object stores keyed by storage type
///
/// Envelopes may name a storage type explicitly; otherwise the default applies.
#[derive(Clone)]
pub struct StorageRegistry {
    default: StorageType,
    backends: HashMap<StorageType, Arc<dyn ObjectStore>>,
}

impl StorageRegistry {
    /// Create an empty registry with the given default type
    pub fn new(default: StorageType) -> Self {
        Self {
            default,
            backends: HashMap::new(),
        }
    }

    /// Build every backend the configuration enables
    ///
    /// The local backend is always available; MinIO requires an endpoint.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, ObjectStoreError> {
        let mut registry = Self::new(config.default_type);

        registry.register(
            StorageType::Local,
            Arc::new(LocalObjectStore::new(config.local_path.clone())),
        );

        if config.minio.endpoint.is_some() {
            let minio = MinioObjectStore::new(&config.minio).await?;
            registry.register(StorageType::Minio, Arc::new(minio));
        }

        if !registry.backends.contains_key(&registry.default) {
            return Err(ObjectStoreError::NotConfigured(registry.default.to_string()));
        }

        tracing::debug!(
            default = %registry.default,
            backends = registry.backends.len(),
            "Storage registry initialized"
        );
        Ok(registry)
    }

    /// Register (or replace) a backend
    pub fn register(&mut self, storage_type: StorageType, store: Arc<dyn ObjectStore>) {
        self.backends.insert(storage_type, store);
    }

    pub fn default_type(&self) -> StorageType {
        self.default
    }

    /// Backend for an envelope's `storage_type`, falling back to the default
    ///
    /// Unknown names and unconfigured types are errors.
    pub fn resolve(
        &self,
        storage_type: Option<&str>,
    ) -> Result<(StorageType, Arc<dyn ObjectStore>), ObjectStoreError> {
        let kind = match storage_type {
            Some(name) => name
                .parse::<StorageType>()
                .map_err(|_| ObjectStoreError::NotConfigured(name.to_string()))?,
            None => self.default,
        };
        self.get(kind).map(|store| (kind, store))
    }

    /// Backend for an explicit storage type
    pub fn get(&self, kind: StorageType) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
        self.backends
            .get(&kind)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotConfigured(kind.to_string()))
    }

    /// Every configured backend, default first
    pub fn all(&self) -> Vec<(StorageType, Arc<dyn ObjectStore>)> {
        let mut all: Vec<_> = self
            .backends
            .iter()
            .map(|(kind, store)| (*kind, Arc::clone(store)))
            .collect();
        all.sort_by_key(|(kind, _)| *kind != self.default);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn local_registry() -> StorageRegistry {
        let mut registry = StorageRegistry::new(StorageType::Local);
        registry.register(
            StorageType::Local,
            Arc::new(LocalObjectStore::new(PathBuf::from("/tmp/unused"))),
        );
        registry
    }

    #[test]
    fn test_resolve_default() {
        let registry = local_registry();
        let (kind, store) = registry.resolve(None).unwrap();
        assert_eq!(kind, StorageType::Local);
        assert_eq!(store.backend_name(), "local");
    }

    #[test]
    fn test_resolve_explicit_case_insensitive() {
        let registry = local_registry();
        let (kind, _) = registry.resolve(Some("LOCAL")).unwrap();
        assert_eq!(kind, StorageType::Local);
    }

    #[test]
    fn test_resolve_unconfigured_type() {
        let registry = local_registry();
        assert!(matches!(
            registry.resolve(Some("minio")),
            Err(ObjectStoreError::NotConfigured(name)) if name == "minio"
        ));
    }

    #[test]
    fn test_resolve_unknown_type() {
        let registry = local_registry();
        assert!(matches!(
            registry.resolve(Some("gcs")),
            Err(ObjectStoreError::NotConfigured(name)) if name == "gcs"
        ));
    }

    #[tokio::test]
    async fn test_from_config_requires_default_backend() {
        let mut config = StorageConfig::default();
        config.default_type = StorageType::Minio;
        config.minio.endpoint = None;

        assert!(matches!(
            StorageRegistry::from_config(&config).await,
            Err(ObjectStoreError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_from_config_local_only() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = StorageConfig::default();
        config.default_type = StorageType::Local;
        config.local_path = temp_dir.path().to_path_buf();

        let registry = StorageRegistry::from_config(&config).await.unwrap();
        assert_eq!(registry.default_type(), StorageType::Local);
        assert_eq!(registry.all().len(), 1);
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory `ObjectStore` that records deletes

    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;

    use super::{ObjectInfo, ObjectStore, ObjectStoreError, validate_key};

    #[derive(Default)]
    pub struct MockObjectStore {
        objects: Mutex<HashMap<String, (Vec<u8>, DateTime<Utc>)>>,
        deletes: Mutex<Vec<String>>,
        failing_deletes: Mutex<HashSet<String>>,
        failing_list: AtomicBool,
    }

    impl MockObjectStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, key: &str, data: Vec<u8>) {
            self.insert_at(key, data, Utc::now());
        }

        pub fn insert_at(&self, key: &str, data: Vec<u8>, last_modified: DateTime<Utc>) {
            self.objects
                .lock()
                .insert(key.to_string(), (data, last_modified));
        }

        /// Make deletes of `key` fail with a backend error
        pub fn fail_delete_for(&self, key: &str) {
            self.failing_deletes.lock().insert(key.to_string());
        }

        /// Make every listing fail with a backend error
        pub fn fail_list(&self) {
            self.failing_list.store(true, Ordering::SeqCst);
        }

        /// Every delete call, in order
        pub fn deleted(&self) -> Vec<String> {
            self.deletes.lock().clone()
        }

        pub fn contains(&self, key: &str) -> bool {
            self.objects.lock().contains_key(key)
        }
    }

    #[async_trait]
    impl ObjectStore for MockObjectStore {
        fn backend_name(&self) -> &'static str {
            "mock"
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
            validate_key(key)?;
            self.objects
                .lock()
                .get(key)
                .map(|(data, _)| data.clone())
                .ok_or_else(|| ObjectStoreError::NotFound {
                    key: key.to_string(),
                })
        }

        async fn put(&self, key: &str, data: &[u8]) -> Result<(), ObjectStoreError> {
            validate_key(key)?;
            self.insert(key, data.to_vec());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
            self.deletes.lock().push(key.to_string());
            if self.failing_deletes.lock().contains(key) {
                return Err(ObjectStoreError::Backend("delete refused".to_string()));
            }
            self.objects.lock().remove(key);
            Ok(())
        }

        async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, ObjectStoreError> {
            if self.failing_list.load(Ordering::SeqCst) {
                return Err(ObjectStoreError::Backend("list refused".to_string()));
            }
            let mut listed: Vec<_> = self
                .objects
                .lock()
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .map(|(key, (data, last_modified))| ObjectInfo {
                    key: key.clone(),
                    size: data.len() as u64,
                    last_modified: *last_modified,
                })
                .collect();
            listed.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(listed)
        }
    }
}
