//! PostgreSQL migration management
//!
//! Handles schema initialization and versioned migrations.

use sqlx::PgPool;

use super::error::PostgresError;
use super::schema::{MIGRATION_V2_HYPERTABLE, SCHEMA, SCHEMA_VERSION};

/// Version recorded by the initial schema
const INITIAL_VERSION: i32 = 1;

/// Run all pending migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), PostgresError> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_schema = current_schema()
            AND table_name = 'schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    let current_version: Option<i32> = if table_exists {
        sqlx::query_scalar("SELECT version FROM schema_version WHERE id = 1")
            .fetch_optional(pool)
            .await?
    } else {
        None
    };

    let from = match current_version {
        None => {
            tracing::debug!("Applying initial PostgreSQL schema v{}", INITIAL_VERSION);
            apply_initial_schema(pool).await?;
            INITIAL_VERSION
        }
        Some(v) if v > SCHEMA_VERSION => {
            tracing::warn!(
                "PostgreSQL schema version {} is newer than application version {}. This may cause issues.",
                v,
                SCHEMA_VERSION
            );
            return Ok(());
        }
        Some(v) => v,
    };

    if from < SCHEMA_VERSION {
        tracing::debug!(
            "Migrating PostgreSQL schema from v{} to v{}",
            from,
            SCHEMA_VERSION
        );
        for version in (from + 1)..=SCHEMA_VERSION {
            apply_versioned_migration(pool, version).await?;
        }
    } else {
        tracing::debug!("PostgreSQL schema is up to date (v{})", SCHEMA_VERSION);
    }

    Ok(())
}

/// Apply the initial schema
async fn apply_initial_schema(pool: &PgPool) -> Result<(), PostgresError> {
    let now = chrono::Utc::now().timestamp();

    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| PostgresError::MigrationFailed {
            version: INITIAL_VERSION,
            name: "initial_schema".to_string(),
            error: e.to_string(),
        })?;

    sqlx::query(
        "INSERT INTO schema_version (id, version, applied_at, description)
         VALUES (1, $1, $2, 'Initial schema')
         ON CONFLICT (id) DO UPDATE SET version = $1, applied_at = $2",
    )
    .bind(INITIAL_VERSION)
    .bind(now)
    .execute(pool)
    .await?;

    tracing::debug!("PostgreSQL schema v{} applied successfully", INITIAL_VERSION);
    Ok(())
}

/// SQL for a versioned migration
///
/// Add new migrations here as the schema evolves.
fn migration_sql(version: i32) -> Option<(&'static str, &'static str)> {
    match version {
        2 => Some(("timescale_hypertable", MIGRATION_V2_HYPERTABLE)),
        _ => None,
    }
}

/// Apply a specific versioned migration
async fn apply_versioned_migration(pool: &PgPool, version: i32) -> Result<(), PostgresError> {
    let start = std::time::Instant::now();
    let now = chrono::Utc::now().timestamp();

    let (name, sql) = migration_sql(version).ok_or_else(|| PostgresError::MigrationFailed {
        version,
        name: "unknown".to_string(),
        error: format!("No migration defined for version {}", version),
    })?;

    sqlx::raw_sql(sql)
        .execute(pool)
        .await
        .map_err(|e| PostgresError::MigrationFailed {
            version,
            name: name.to_string(),
            error: e.to_string(),
        })?;

    let elapsed = start.elapsed().as_millis() as i32;

    sqlx::query(
        "INSERT INTO schema_migrations (version, name, applied_at, checksum, execution_time_ms, success)
         VALUES ($1, $2, $3, $4, $5, TRUE)
         ON CONFLICT (version) DO NOTHING",
    )
    .bind(version)
    .bind(name)
    .bind(now)
    .bind(compute_checksum(sql))
    .bind(elapsed)
    .execute(pool)
    .await?;

    sqlx::query("UPDATE schema_version SET version = $1, applied_at = $2 WHERE id = 1")
        .bind(version)
        .bind(now)
        .execute(pool)
        .await?;

    tracing::debug!(
        "PostgreSQL migration v{} ({}) applied in {}ms",
        version,
        name,
        elapsed
    );
    Ok(())
}

fn compute_checksum(sql: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    sql.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}
