//! MinIO (S3-compatible) object storage
//!
//! Claim-check keys map 1:1 to object keys inside the configured bucket.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};

use super::error::ObjectStoreError;
use super::store::{ObjectInfo, ObjectStore, validate_key};
use crate::core::config::MinioConfig;

/// MinIO-backed object store
#[derive(Debug, Clone)]
pub struct MinioObjectStore {
    client: Client,
    bucket: String,
}

impl MinioObjectStore {
    /// Create a client for the configured MinIO endpoint
    ///
    /// Static credentials are used when both keys are set, otherwise the default
    /// AWS credential chain applies.
    pub async fn new(config: &MinioConfig) -> Result<Self, ObjectStoreError> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            ObjectStoreError::Backend("MinIO storage configured without an endpoint".to_string())
        })?;
        let endpoint_url = endpoint_url(endpoint, config.port, config.use_ssl);

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access), Some(secret)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access.clone(),
                secret.clone(),
                None,
                None,
                "easysmart-ingest",
            ));
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(&endpoint_url)
            .force_path_style(true)
            .build();

        tracing::debug!(
            endpoint = %endpoint_url,
            bucket = %config.bucket,
            "MinIO object store initialized"
        );

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        })
    }
}

/// Build the endpoint URL from `MINIO_ENDPOINT`, `MINIO_PORT` and `MINIO_USE_SSL`.
///
/// An endpoint that already carries a scheme is used verbatim.
pub(crate) fn endpoint_url(endpoint: &str, port: u16, use_ssl: bool) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.contains("://") {
        return endpoint.to_string();
    }
    let scheme = if use_ssl { "https" } else { "http" };
    if endpoint.rsplit_once(':').is_some_and(|(_, p)| p.parse::<u16>().is_ok()) {
        format!("{}://{}", scheme, endpoint)
    } else {
        format!("{}://{}:{}", scheme, endpoint, port)
    }
}

#[async_trait]
impl ObjectStore for MinioObjectStore {
    fn backend_name(&self) -> &'static str {
        "minio"
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        validate_key(key)?;

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    ObjectStoreError::NotFound {
                        key: key.to_string(),
                    }
                } else {
                    ObjectStoreError::Backend(format!("S3 get_object error: {}", service_err))
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| ObjectStoreError::Backend(format!("S3 body read error: {}", e)))?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), ObjectStoreError> {
        validate_key(key)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/gzip")
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(format!("S3 put_object error: {}", e)))?;

        tracing::debug!(key, size = data.len(), bucket = %self.bucket, "Object stored in MinIO");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        validate_key(key)?;

        // delete_object succeeds for missing keys
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(format!("S3 delete_object error: {}", e)))?;

        tracing::debug!(key, "Object deleted from MinIO");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, ObjectStoreError> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| {
                ObjectStoreError::Backend(format!("S3 list_objects_v2 error: {}", e))
            })?;

            for obj in response.contents() {
                let Some(key) = obj.key() else { continue };
                let last_modified = obj
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or_else(Utc::now);
                objects.push(ObjectInfo {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified,
                });
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(objects)
    }
}
