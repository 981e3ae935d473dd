// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display)
pub const APP_NAME: &str = "EasySmart Ingest";

/// Application name in lowercase (for paths, identifiers and log filters)
pub const APP_NAME_LOWER: &str = "easysmart_ingest";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".easysmart";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "ingest.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "INGEST_CONFIG";

// =============================================================================
// Environment Variables - Logging
// =============================================================================

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "INGEST_LOG";

/// Environment variable for log output format (`compact` or `json`)
pub const ENV_LOG_FORMAT: &str = "INGEST_LOG_FORMAT";

// =============================================================================
// Environment Variables - Message Queue
// =============================================================================

pub const ENV_QUEUE_BACKEND: &str = "QUEUE_BACKEND";
pub const ENV_REDIS_URL: &str = "REDIS_URL";
pub const ENV_QUEUE_TOPIC: &str = "QUEUE_TOPIC";
pub const ENV_QUEUE_GROUP_ID: &str = "QUEUE_GROUP_ID";
pub const ENV_QUEUE_BATCH_SIZE: &str = "QUEUE_BATCH_SIZE";
pub const ENV_QUEUE_AUTO_COMMIT: &str = "QUEUE_AUTO_COMMIT";
pub const ENV_QUEUE_PARTITIONS: &str = "QUEUE_PARTITIONS";
pub const ENV_QUEUE_CLAIM_IDLE_SECS: &str = "QUEUE_CLAIM_IDLE_SECS";
pub const ENV_QUEUE_CONSUMER_NAME: &str = "QUEUE_CONSUMER_NAME";

/// Host name, used as the default consumer name
pub const ENV_HOSTNAME: &str = "HOSTNAME";

// =============================================================================
// Message Queue Defaults
// =============================================================================

/// Topic the gateway publishes claim-check envelopes to
pub const DEFAULT_QUEUE_TOPIC: &str = "telemetry.raw";

/// Consumer group shared by all ingest workers
pub const DEFAULT_QUEUE_GROUP_ID: &str = "telemetry-workers";

/// Maximum messages returned by one poll
pub const DEFAULT_QUEUE_BATCH_SIZE: usize = 100;

/// Number of partitions (independent streams) per topic
pub const DEFAULT_QUEUE_PARTITIONS: u32 = 1;

/// Idle time after which another consumer's delivery may be claimed
pub const DEFAULT_QUEUE_CLAIM_IDLE_SECS: u64 = 60;

/// Host name file read when `HOSTNAME` is unset
pub const HOSTNAME_FILE: &str = "/etc/hostname";

/// Default Redis URL for the stream backend
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";

/// Approximate maximum length of each partition stream
pub const QUEUE_STREAM_MAXLEN: u64 = 1_000_000;

// =============================================================================
// Consumer Loop Timing
// =============================================================================

/// Poll timeout for one batch
pub const POLL_TIMEOUT_MS: u64 = 1000;

/// Sleep after an empty poll
pub const EMPTY_POLL_BACKOFF_MS: u64 = 100;

/// Interval between stale-delivery claim attempts
pub const CLAIM_INTERVAL_SECS: u64 = 30;

// =============================================================================
// Environment Variables - Object Storage
// =============================================================================

pub const ENV_STORAGE_TYPE: &str = "STORAGE_TYPE";
pub const ENV_STORAGE_LOCAL_PATH: &str = "STORAGE_LOCAL_PATH";
pub const ENV_MINIO_ENDPOINT: &str = "MINIO_ENDPOINT";
pub const ENV_MINIO_PORT: &str = "MINIO_PORT";
pub const ENV_MINIO_USE_SSL: &str = "MINIO_USE_SSL";
pub const ENV_MINIO_BUCKET: &str = "MINIO_BUCKET";
pub const ENV_MINIO_REGION: &str = "MINIO_REGION";
pub const ENV_MINIO_ACCESS_KEY: &str = "MINIO_ACCESS_KEY";
pub const ENV_MINIO_SECRET_KEY: &str = "MINIO_SECRET_KEY";
pub const ENV_DELETE_FILE_AFTER_PROCESSING: &str = "DELETE_FILE_AFTER_PROCESSING";

// =============================================================================
// Object Storage Defaults
// =============================================================================

/// Default root for the local storage backend
pub const DEFAULT_STORAGE_LOCAL_PATH: &str = "/app/storage";

/// Default MinIO bucket holding claim-check blobs
pub const DEFAULT_MINIO_BUCKET: &str = "telemetry-raw";

/// Default MinIO region
pub const DEFAULT_MINIO_REGION: &str = "us-east-1";

/// Default MinIO port, used when the endpoint carries no port
pub const DEFAULT_MINIO_PORT: u16 = 9000;

/// Key prefix of claim-check blobs written by the gateway
pub const CLAIM_CHECK_PREFIX: &str = "telemetry/";

/// File suffix of claim-check blobs
pub const CLAIM_CHECK_SUFFIX: &str = ".json.gz";

// =============================================================================
// Retention
// =============================================================================

pub const ENV_FILE_RETENTION_DAYS: &str = "FILE_RETENTION_DAYS";

/// Days a claim-check blob is kept before the sweep removes it
pub const DEFAULT_FILE_RETENTION_DAYS: u32 = 7;

/// Interval between retention sweeps
pub const RETENTION_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Delay before retrying a failed retention sweep
pub const RETENTION_RETRY_DELAY_SECS: u64 = 60 * 60;

// =============================================================================
// Tenancy
// =============================================================================

/// Tenant id used when the message key is absent or not numeric
pub const DEFAULT_TENANT_ID: i64 = 1;

// =============================================================================
// Shutdown
// =============================================================================

/// Maximum time to wait for background tasks during shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// PostgreSQL
// =============================================================================

/// Environment variable for PostgreSQL connection URL
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// Maximum connections in pool
pub const POSTGRES_DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Minimum connections to keep warm
pub const POSTGRES_DEFAULT_MIN_CONNECTIONS: u32 = 1;

/// Connection acquire timeout
pub const POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Idle connection timeout
pub const POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Max connection lifetime
pub const POSTGRES_DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;

/// Statement timeout (runaway query protection)
pub const POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 60;

/// Rows per multi-row INSERT statement (keeps bind count under the protocol limit)
pub const TELEMETRY_INSERT_CHUNK_ROWS: usize = 1000;
