//! Filesystem-based object storage
//!
//! Objects live at `{base_path}/{key}` with `/` in the key mapped to directories.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use super::error::ObjectStoreError;
use super::store::{ObjectInfo, ObjectStore, validate_key};

/// Local filesystem object store
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn object_path(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.base_path.clone(), |path, segment| path.join(segment))
    }

    /// Clean up empty parent directories after deletion (best effort)
    async fn cleanup_empty_parents(&self, file_path: &Path) {
        let mut current = file_path.parent();

        while let Some(dir) = current {
            if dir == self.base_path || !dir.starts_with(&self.base_path) {
                break;
            }
            match fs::remove_dir(dir).await {
                Ok(_) => {
                    tracing::trace!(path = %dir.display(), "Removed empty directory");
                    current = dir.parent();
                }
                Err(_) => break,
            }
        }
    }

    /// Collect every regular file below `dir` as an [`ObjectInfo`]
    async fn walk(&self, dir: &Path, out: &mut Vec<ObjectInfo>) -> Result<(), ObjectStoreError> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            let path = entry.path();

            if file_type.is_dir() {
                Box::pin(self.walk(&path, out)).await?;
            } else if file_type.is_file() {
                let metadata = entry.metadata().await?;
                let last_modified = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                let Some(key) = self.key_for(&path) else {
                    continue;
                };
                out.push(ObjectInfo {
                    key,
                    size: metadata.len(),
                    last_modified,
                });
            }
        }
        Ok(())
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_path).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        validate_key(key)?;
        let path = self.object_path(key);

        // Map ENOENT to NotFound instead of a racy exists() check
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ObjectStoreError::NotFound {
                    key: key.to_string(),
                }
            } else {
                ObjectStoreError::Io(e)
            }
        })
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), ObjectStoreError> {
        validate_key(key)?;
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a staging file and rename so readers never see a partial blob
        let staging = path.with_extension(format!("{}.tmp", std::process::id()));
        fs::write(&staging, data).await?;
        if let Err(e) = fs::rename(&staging, &path).await {
            fs::remove_file(&staging).await.ok();
            return Err(ObjectStoreError::Io(e));
        }

        tracing::debug!(key, size = data.len(), path = %path.display(), "Object stored");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        validate_key(key)?;
        let path = self.object_path(key);

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(key, "Object deleted");
                self.cleanup_empty_parents(&path).await;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, ObjectStoreError> {
        if !prefix.is_empty() {
            validate_key(prefix)?;
        }

        // Start the walk at the deepest directory named by the prefix
        let dir_part = prefix.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        let start = self.object_path(dir_part);

        let mut objects = Vec::new();
        self.walk(&start, &mut objects).await?;
        objects.retain(|o| o.key.starts_with(prefix));
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}
