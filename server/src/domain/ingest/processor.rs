//! Bulk validation and persistence of one telemetry array

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::record::{ErrorDetail, validate_record};
use crate::core::constants::DEFAULT_TENANT_ID;
use crate::data::telemetry::{TelemetryRow, TelemetryStore, TelemetryStoreError};
use crate::utils::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, retry_with_backoff_async};

/// Outcome of processing one telemetry array
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    pub processed: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub errors: Vec<ErrorDetail>,
    /// Set when the storage transaction failed; every record is then in `errors`
    pub failure: Option<String>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Tenant id from a message key
///
/// Only a non-empty run of ASCII digits is a tenant id. Absent keys, signs,
/// whitespace and values beyond `i64` map to [`DEFAULT_TENANT_ID`].
pub fn parse_tenant_id(key: Option<&str>) -> i64 {
    let Some(k) = key else {
        return DEFAULT_TENANT_ID;
    };
    let digits = !k.is_empty() && k.bytes().all(|b| b.is_ascii_digit());
    match k.parse::<i64>() {
        Ok(id) if digits => id,
        _ => {
            tracing::debug!(key = k, "Non-numeric message key, using default tenant");
            DEFAULT_TENANT_ID
        }
    }
}

/// Validates records and writes them through a [`TelemetryStore`]
#[derive(Clone)]
pub struct BulkProcessor {
    store: Arc<dyn TelemetryStore>,
    max_attempts: u32,
    base_delay_ms: u64,
}

impl BulkProcessor {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }

    /// Override the transaction retry policy
    pub fn with_retry(mut self, max_attempts: u32, base_delay_ms: u64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Validate `records` and insert the valid rows in one transaction
    pub async fn process(
        &self,
        tenant_id: i64,
        records: &[Value],
        source_id: &str,
        payload_bytes: u64,
    ) -> BatchResult {
        let mut rows: Vec<TelemetryRow> = Vec::with_capacity(records.len());
        let mut errors = Vec::new();

        for (index, record) in records.iter().enumerate() {
            match validate_record(record, index, source_id) {
                Ok(row) => rows.push(row),
                Err(detail) => errors.push(detail),
            }
        }

        let mut result = BatchResult {
            processed: records.len(),
            ..Default::default()
        };

        if rows.is_empty() {
            result.errors = errors;
            return result;
        }

        let store = &self.store;
        let rows_ref = &rows;
        let outcome = retry_with_backoff_async(
            self.max_attempts,
            self.base_delay_ms,
            |e: &TelemetryStoreError| e.is_transient(),
            move || store.insert_batch(tenant_id, rows_ref, payload_bytes),
        )
        .await;

        match outcome {
            Ok((outcome, attempts)) => {
                if attempts > 1 {
                    tracing::debug!(tenant_id, attempts, "Telemetry insert succeeded after retry");
                }
                result.inserted = outcome.inserted;
                result.duplicates = outcome.duplicates;
                result.errors = errors;
            }
            Err((e, attempts)) => {
                tracing::error!(
                    tenant_id,
                    source_id,
                    attempts,
                    error = %e,
                    "Telemetry transaction failed"
                );
                let reason = format!("transaction failed: {}", e);
                errors.extend(
                    rows.iter()
                        .map(|row| ErrorDetail::new(row.record_index, reason.clone())),
                );
                errors.sort_by_key(|d| d.record_index);
                result.errors = errors;
                result.failure = Some(e.to_string());
            }
        }

        result
    }
}
