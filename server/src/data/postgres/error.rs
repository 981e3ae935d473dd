//! PostgreSQL error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PostgresError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration {version} ({name}) failed: {error}")]
    MigrationFailed {
        version: i32,
        name: String,
        error: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PostgresError {
    /// Whether retrying the same transaction may succeed
    ///
    /// Connection loss, pool timeouts, serialization failures and deadlocks
    /// are transient. Constraint and syntax errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            PostgresError::Database(err) => is_transient_sqlx(err),
            PostgresError::MigrationFailed { .. } | PostgresError::Config(_) => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Protocol(_) => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| {
            // 40001 serialization_failure, 40P01 deadlock_detected, 08xxx connection_exception,
            // 57P01 admin_shutdown
            code == "40001" || code == "40P01" || code == "57P01" || code.starts_with("08")
        }),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_failed_error_display() {
        let err = PostgresError::MigrationFailed {
            version: 2,
            name: "timescale_hypertable".to_string(),
            error: "syntax error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Migration 2 (timescale_hypertable) failed: syntax error"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = PostgresError::Config("missing URL".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing URL");
    }

    #[test]
    fn test_transient_classification() {
        assert!(PostgresError::Database(sqlx::Error::PoolTimedOut).is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(PostgresError::Database(sqlx::Error::Io(io)).is_transient());
        assert!(!PostgresError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!PostgresError::Config("bad".into()).is_transient());
    }
}
