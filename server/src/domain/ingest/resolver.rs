//! Claim-check resolution
//!
//! Turns an envelope body into the raw telemetry array, fetching and
//! decompressing the referenced blob when needed.

use serde_json::Value;
use thiserror::Error;

use super::envelope::{ClaimCheckPointer, EnvelopeBody};
use crate::core::config::StorageType;
use crate::data::objects::{ObjectStoreError, StorageRegistry};
use crate::utils::gzip;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("storage error: {0}")]
    Storage(#[from] ObjectStoreError),

    #[error("unsupported compression '{0}'")]
    UnsupportedCompression(String),

    #[error("failed to decompress {key}: {source}")]
    Decompress {
        key: String,
        source: std::io::Error,
    },

    #[error("invalid JSON in {key}: {source}")]
    Json {
        key: String,
        source: serde_json::Error,
    },
}

/// Where a resolved payload came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimCheckRef {
    pub key: String,
    pub storage: StorageType,
    pub file_size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPayload {
    pub records: Vec<Value>,
    /// Set when the payload was fetched from object storage
    pub claim_check: Option<ClaimCheckRef>,
    /// Uncompressed payload size, used for usage accounting
    pub payload_bytes: u64,
}

impl ResolvedPayload {
    pub fn is_claim_check(&self) -> bool {
        self.claim_check.is_some()
    }
}

/// Resolves envelope bodies against the configured object stores
#[derive(Clone)]
pub struct PayloadResolver {
    storage: StorageRegistry,
}

impl PayloadResolver {
    pub fn new(storage: StorageRegistry) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &StorageRegistry {
        &self.storage
    }

    /// Resolve a body into its telemetry records
    ///
    /// `raw_size` is the size of the queue message, used as the payload size
    /// for inline bodies.
    pub async fn resolve(
        &self,
        body: &EnvelopeBody,
        raw_size: usize,
    ) -> Result<ResolvedPayload, ResolveError> {
        match body {
            EnvelopeBody::ClaimCheck(pointer) => self.resolve_claim_check(pointer).await,
            EnvelopeBody::Inline(value) => {
                tracing::warn!(
                    "Received inline telemetry envelope; the inline format is deprecated, \
                     publish claim-check envelopes instead"
                );
                Ok(ResolvedPayload {
                    records: normalize_records(value.clone()),
                    claim_check: None,
                    payload_bytes: raw_size as u64,
                })
            }
        }
    }

    async fn resolve_claim_check(
        &self,
        pointer: &ClaimCheckPointer,
    ) -> Result<ResolvedPayload, ResolveError> {
        let key = pointer.claim_check.as_str();

        if let Some(compression) = pointer.compression.as_deref()
            && !compression.eq_ignore_ascii_case("gzip")
        {
            return Err(ResolveError::UnsupportedCompression(compression.to_string()));
        }

        let (storage, store) = self.storage.resolve(pointer.storage_type.as_deref())?;
        let compressed = store.get(key).await?;

        let decompressed = gzip::decompress(&compressed).map_err(|source| {
            ResolveError::Decompress {
                key: key.to_string(),
                source,
            }
        })?;

        let value: Value =
            serde_json::from_slice(&decompressed).map_err(|source| ResolveError::Json {
                key: key.to_string(),
                source,
            })?;

        let records = normalize_records(value);
        tracing::debug!(
            key,
            storage = %storage,
            compressed_bytes = compressed.len(),
            decompressed_bytes = decompressed.len(),
            records = records.len(),
            "Claim check resolved"
        );

        Ok(ResolvedPayload {
            records,
            claim_check: Some(ClaimCheckRef {
                key: key.to_string(),
                storage,
                file_size: pointer.file_size,
            }),
            payload_bytes: decompressed.len() as u64,
        })
    }
}

/// Normalize a decoded payload into a record array
///
/// Arrays are used as-is; `{"data": X}` yields `X` (wrapped unless an array);
/// any other value becomes a one-element array.
pub fn normalize_records(value: Value) -> Vec<Value> {
    match value {
        Value::Array(records) => records,
        Value::Object(mut obj) if obj.contains_key("data") => match obj.remove("data") {
            Some(Value::Array(records)) => records,
            Some(other) => vec![other],
            None => Vec::new(),
        },
        other => vec![other],
    }
}
