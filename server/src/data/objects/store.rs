//! Object store trait definition
//!
//! Defines the interface for claim-check blob backends (local filesystem, MinIO).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::ObjectStoreError;

/// Listing entry for a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Relative, `/`-separated key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
}

/// Trait for object storage backends
///
/// All implementations must be thread-safe (Send + Sync) for use in async contexts.
/// Keys are relative `/`-separated paths; see [`validate_key`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logging
    fn backend_name(&self) -> &'static str;

    /// Fetch the full object body
    ///
    /// Returns `NotFound` when no object exists under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError>;

    /// Store an object, overwriting any previous body
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), ObjectStoreError>;

    /// Delete an object
    ///
    /// Does not fail if the object doesn't exist.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;

    /// List objects whose key starts with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, ObjectStoreError>;
}

/// Validate an object key
///
/// Keys must be non-empty, relative and free of `..` segments.
pub fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    let invalid = |reason| ObjectStoreError::InvalidKey {
        key: key.to_string(),
        reason,
    };

    if key.trim().is_empty() {
        return Err(invalid("empty key"));
    }
    let has_drive_prefix = key.as_bytes().get(1) == Some(&b':');
    if key.starts_with('/') || key.starts_with('\\') || has_drive_prefix {
        return Err(invalid("absolute key"));
    }
    if key.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(invalid("path traversal"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert!(validate_key("telemetry/2025-01-01T10-00-00/abc.json.gz").is_ok());
        assert!(validate_key("file.json.gz").is_ok());
        assert!(validate_key("a/b..c/d").is_ok());
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            validate_key(""),
            Err(ObjectStoreError::InvalidKey { .. })
        ));
        assert!(validate_key("   ").is_err());
    }

    #[test]
    fn test_absolute_key_rejected() {
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("\\windows\\system32").is_err());
        assert!(validate_key("C:/data/file").is_err());
    }

    #[test]
    fn test_traversal_rejected() {
        assert!(validate_key("../secret").is_err());
        assert!(validate_key("telemetry/../../secret").is_err());
        assert!(validate_key("telemetry\\..\\secret").is_err());
    }
}
