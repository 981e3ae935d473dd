//! Telemetry persistence seam
//!
//! The ingest pipeline writes validated rows through [`TelemetryStore`]; the
//! PostgreSQL service is the production implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use super::postgres::repositories::telemetry as repo;
use super::postgres::{PostgresError, PostgresService};

/// Validated telemetry reading ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRow {
    pub equipment_uuid: String,
    pub sensor_uuid: String,
    pub sensor_type: Option<String>,
    pub unit: Option<String>,
    /// Numeric reading when the raw value parses as a number
    pub value: Option<f64>,
    pub raw_value: String,
    pub recorded_at: DateTime<Utc>,
    /// Full original record
    pub attributes: Value,
    /// Claim-check key or `{topic}:{partition}:{offset}`
    pub source_id: String,
    /// Position of the record in its telemetry array
    pub record_index: usize,
}

/// Rows written by one `insert_batch` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Newly written rows
    pub inserted: usize,
    /// Rows skipped because their idempotency key already existed
    pub duplicates: usize,
}

#[derive(Error, Debug)]
pub enum TelemetryStoreError {
    #[error(transparent)]
    Postgres(#[from] PostgresError),

    #[error("telemetry store unavailable: {0}")]
    Unavailable(String),
}

impl TelemetryStoreError {
    pub fn is_transient(&self) -> bool {
        match self {
            TelemetryStoreError::Postgres(e) => e.is_transient(),
            TelemetryStoreError::Unavailable(_) => true,
        }
    }
}

/// Transactional sink for telemetry rows
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Insert `rows` for `tenant_id` in a single transaction.
    ///
    /// Rows whose `(source_id, record_index, recorded_at)` already exist are
    /// skipped. Usage counters for the tenant are updated in the same
    /// transaction, only by newly written rows. On error nothing is written.
    async fn insert_batch(
        &self,
        tenant_id: i64,
        rows: &[TelemetryRow],
        payload_bytes: u64,
    ) -> Result<InsertOutcome, TelemetryStoreError>;
}

#[async_trait]
impl TelemetryStore for PostgresService {
    async fn insert_batch(
        &self,
        tenant_id: i64,
        rows: &[TelemetryRow],
        payload_bytes: u64,
    ) -> Result<InsertOutcome, TelemetryStoreError> {
        if rows.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let mut tx = self.pool().begin().await.map_err(PostgresError::from)?;

        let inserted_sensors = repo::insert_rows(&mut *tx, tenant_id, rows).await?;
        let inserted = inserted_sensors.len();

        if inserted > 0 {
            repo::upsert_tenant_usage(
                &mut *tx,
                tenant_id,
                Utc::now().date_naive(),
                inserted as i64,
                repo::distinct_sensors(&inserted_sensors) as i64,
                payload_bytes as i64,
            )
            .await?;
        }

        tx.commit().await.map_err(PostgresError::from)?;

        Ok(InsertOutcome {
            inserted,
            duplicates: rows.len() - inserted,
        })
    }
}
