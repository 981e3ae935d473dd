//! Telemetry repository for PostgreSQL operations
//!
//! Multi-row inserts into `telemetry_data` and per-tenant usage counters.
//! Both functions take a connection so callers can run them inside one transaction.

use std::collections::HashSet;

use chrono::NaiveDate;
use sqlx::types::Json;
use sqlx::{PgConnection, Postgres, QueryBuilder};

use crate::core::constants::TELEMETRY_INSERT_CHUNK_ROWS;
use crate::data::postgres::PostgresError;
use crate::data::telemetry::TelemetryRow;

const INSERT_PREFIX: &str = "INSERT INTO telemetry_data \
    (tenant_id, equipment_uuid, sensor_uuid, sensor_type, unit, value, raw_value, \
     recorded_at, attributes, source_id, record_index) ";

const INSERT_SUFFIX: &str =
    " ON CONFLICT (source_id, record_index, recorded_at) DO NOTHING RETURNING sensor_uuid";

/// Build one multi-row INSERT for a chunk of rows
fn build_insert<'a>(tenant_id: i64, rows: &'a [TelemetryRow]) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new(INSERT_PREFIX);
    builder.push_values(rows, |mut b, row| {
        b.push_bind(tenant_id)
            .push_bind(row.equipment_uuid.as_str())
            .push_bind(row.sensor_uuid.as_str())
            .push_bind(row.sensor_type.as_deref())
            .push_bind(row.unit.as_deref())
            .push_bind(row.value)
            .push_bind(row.raw_value.as_str())
            .push_bind(row.recorded_at)
            .push_bind(Json(&row.attributes))
            .push_bind(row.source_id.as_str())
            .push_bind(row.record_index as i32);
    });
    builder.push(INSERT_SUFFIX);
    builder
}

/// Insert rows, skipping any whose idempotency key already exists
///
/// Returns the sensor uuid of every newly written row.
pub async fn insert_rows(
    conn: &mut PgConnection,
    tenant_id: i64,
    rows: &[TelemetryRow],
) -> Result<Vec<String>, PostgresError> {
    let mut inserted = Vec::with_capacity(rows.len());

    for chunk in rows.chunks(TELEMETRY_INSERT_CHUNK_ROWS) {
        let mut builder = build_insert(tenant_id, chunk);
        let sensors: Vec<String> = builder
            .build_query_scalar()
            .fetch_all(&mut *conn)
            .await?;
        inserted.extend(sensors);
    }

    Ok(inserted)
}

/// Add newly inserted rows to the tenant's counters for `day`
///
/// `sensors_count` keeps the largest distinct-sensor count seen for the day.
pub async fn upsert_tenant_usage(
    conn: &mut PgConnection,
    tenant_id: i64,
    day: NaiveDate,
    items: i64,
    sensors: i64,
    bytes: i64,
) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        INSERT INTO tenant_usage_daily (tenant_id, day, items_count, sensors_count, bytes_ingested, updated_at)
        VALUES ($1, $2, $3, $4, $5, now())
        ON CONFLICT (tenant_id, day) DO UPDATE SET
            items_count = tenant_usage_daily.items_count + EXCLUDED.items_count,
            sensors_count = GREATEST(tenant_usage_daily.sensors_count, EXCLUDED.sensors_count),
            bytes_ingested = tenant_usage_daily.bytes_ingested + EXCLUDED.bytes_ingested,
            updated_at = now()
        "#,
    )
    .bind(tenant_id)
    .bind(day)
    .bind(items)
    .bind(sensors)
    .bind(bytes)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Number of distinct sensors in a list of inserted sensor uuids
pub fn distinct_sensors(sensors: &[String]) -> usize {
    sensors.iter().collect::<HashSet<_>>().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn row(index: usize) -> TelemetryRow {
        TelemetryRow {
            equipment_uuid: "eq-1".to_string(),
            sensor_uuid: format!("s-{index}"),
            sensor_type: Some("temperature".to_string()),
            unit: Some("°C".to_string()),
            value: Some(21.5),
            raw_value: "21.5".to_string(),
            recorded_at: Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap(),
            attributes: json!({"status": "21.5"}),
            source_id: "telemetry/2025-01-15T10-30-00/a.json.gz".to_string(),
            record_index: index,
        }
    }

    #[test]
    fn test_build_insert_sql_shape() {
        let rows = vec![row(0), row(1)];
        let builder = build_insert(7, &rows);
        let sql = builder.sql();

        assert!(sql.starts_with("INSERT INTO telemetry_data"));
        assert!(sql.contains("$22"));
        assert!(!sql.contains("$23"));
        assert!(sql.ends_with("DO NOTHING RETURNING sensor_uuid"));
    }

    #[test]
    fn test_chunk_bind_count_under_protocol_limit() {
        assert!(TELEMETRY_INSERT_CHUNK_ROWS * 11 < u16::MAX as usize);
    }

    #[test]
    fn test_distinct_sensors() {
        let sensors = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        assert_eq!(distinct_sensors(&sensors), 2);
        assert_eq!(distinct_sensors(&[]), 0);
    }
}
