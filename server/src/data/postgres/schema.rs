//! PostgreSQL schema definitions
//!
//! The initial schema creates the telemetry tables. Later versions are applied
//! as incremental migrations (see `migrations.rs`).

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initial schema (v1)
pub const SCHEMA: &str = r#"
-- =============================================================================
-- Infrastructure: Schema version tracking
-- =============================================================================
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    applied_at BIGINT NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at BIGINT NOT NULL,
    checksum TEXT NOT NULL,
    execution_time_ms INTEGER,
    success BOOLEAN NOT NULL DEFAULT TRUE
);

-- =============================================================================
-- 1. Telemetry readings
-- =============================================================================
-- Unique key includes recorded_at so the table can become a hypertable.
CREATE TABLE IF NOT EXISTS telemetry_data (
    id BIGSERIAL NOT NULL,
    tenant_id BIGINT NOT NULL,
    equipment_uuid TEXT NOT NULL,
    sensor_uuid TEXT NOT NULL,
    sensor_type TEXT,
    unit TEXT,
    value DOUBLE PRECISION,
    raw_value TEXT NOT NULL,
    recorded_at TIMESTAMPTZ NOT NULL,
    attributes JSONB NOT NULL DEFAULT '{}'::jsonb,
    source_id TEXT NOT NULL,
    record_index INTEGER NOT NULL CHECK (record_index >= 0),
    ingested_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT uq_telemetry_source UNIQUE (source_id, record_index, recorded_at)
);

CREATE INDEX IF NOT EXISTS idx_telemetry_tenant_sensor_time
    ON telemetry_data(tenant_id, sensor_uuid, recorded_at DESC);
CREATE INDEX IF NOT EXISTS idx_telemetry_tenant_equipment_time
    ON telemetry_data(tenant_id, equipment_uuid, recorded_at DESC);

-- =============================================================================
-- 2. Per-tenant daily usage counters
-- =============================================================================
CREATE TABLE IF NOT EXISTS tenant_usage_daily (
    tenant_id BIGINT NOT NULL,
    day DATE NOT NULL,
    items_count BIGINT NOT NULL DEFAULT 0,
    sensors_count BIGINT NOT NULL DEFAULT 0,
    bytes_ingested BIGINT NOT NULL DEFAULT 0,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (tenant_id, day)
);
"#;

/// v2: convert `telemetry_data` into a TimescaleDB hypertable when the extension is installable
pub const MIGRATION_V2_HYPERTABLE: &str = r#"
DO $$
BEGIN
    IF EXISTS (SELECT 1 FROM pg_available_extensions WHERE name = 'timescaledb') THEN
        BEGIN
            CREATE EXTENSION IF NOT EXISTS timescaledb;
            PERFORM create_hypertable(
                'telemetry_data',
                'recorded_at',
                if_not_exists => TRUE,
                migrate_data => TRUE
            );
        EXCEPTION WHEN OTHERS THEN
            RAISE NOTICE 'TimescaleDB unavailable, keeping plain table: %', SQLERRM;
        END;
    END IF;
END
$$;
"#;
