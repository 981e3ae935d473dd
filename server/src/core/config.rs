use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::utils::file::expand_path;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, APP_NAME_LOWER, CONFIG_FILE_NAME, DEFAULT_FILE_RETENTION_DAYS, DEFAULT_MINIO_BUCKET,
    DEFAULT_MINIO_PORT, DEFAULT_MINIO_REGION, DEFAULT_QUEUE_BATCH_SIZE,
    DEFAULT_QUEUE_CLAIM_IDLE_SECS, DEFAULT_QUEUE_GROUP_ID, DEFAULT_QUEUE_PARTITIONS,
    DEFAULT_QUEUE_TOPIC, DEFAULT_REDIS_URL, DEFAULT_STORAGE_LOCAL_PATH, ENV_DATABASE_URL,
    ENV_HOSTNAME, ENV_MINIO_ENDPOINT, HOSTNAME_FILE, POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS, POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS,
    POSTGRES_DEFAULT_MAX_CONNECTIONS, POSTGRES_DEFAULT_MAX_LIFETIME_SECS,
    POSTGRES_DEFAULT_MIN_CONNECTIONS, POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS,
};

// =============================================================================
// Queue Backend Enum
// =============================================================================

/// Message queue backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackendKind {
    Memory,
    #[default]
    Redis,
}

impl fmt::Display for QueueBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueBackendKind::Memory => write!(f, "memory"),
            QueueBackendKind::Redis => write!(f, "redis"),
        }
    }
}

// =============================================================================
// Storage Type Enum
// =============================================================================

/// Object storage backend holding claim-check blobs
///
/// Also the `storage_type` value carried by claim-check envelopes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Minio,
    Local,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Minio => "minio",
            StorageType::Local => "local",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "minio" => Ok(StorageType::Minio),
            "local" => Ok(StorageType::Local),
            _ => Err(format!(
                "Invalid storage type '{}'. Valid options: minio, local",
                s
            )),
        }
    }
}

// =============================================================================
// File Config Structs (JSON deserialization)
// =============================================================================

/// Queue configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct QueueFileConfig {
    pub backend: Option<QueueBackendKind>,
    pub redis_url: Option<String>,
    pub topic: Option<String>,
    pub group_id: Option<String>,
    pub batch_size: Option<usize>,
    pub auto_commit: Option<bool>,
    pub partitions: Option<u32>,
    pub claim_idle_secs: Option<u64>,
    pub consumer_name: Option<String>,
}

/// MinIO configuration (nested under storage)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct MinioFileConfig {
    pub endpoint: Option<String>,
    pub port: Option<u16>,
    pub use_ssl: Option<bool>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

/// Object storage configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct StorageFileConfig {
    #[serde(rename = "type")]
    pub storage_type: Option<StorageType>,
    pub local_path: Option<String>,
    pub delete_after_processing: Option<bool>,
    pub minio: Option<MinioFileConfig>,
}

/// PostgreSQL configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct DatabaseFileConfig {
    pub url: Option<String>,
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub acquire_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
    pub statement_timeout_secs: Option<u64>,
}

/// Retention configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RetentionFileConfig {
    pub file_retention_days: Option<u32>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub queue: Option<QueueFileConfig>,
    pub storage: Option<StorageFileConfig>,
    pub database: Option<DatabaseFileConfig>,
    pub retention: Option<RetentionFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Overwrite `current` when `other` is set
fn take<T: fmt::Debug>(field: &str, current: &mut Option<T>, other: Option<T>) {
    if other.is_some() {
        tracing::trace!(field, value = ?other, "Merging config value");
        *current = other;
    }
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        if let Some(queue) = other.queue {
            let current = self.queue.get_or_insert_with(QueueFileConfig::default);
            take("queue.backend", &mut current.backend, queue.backend);
            if queue.redis_url.is_some() {
                current.redis_url = queue.redis_url;
            }
            take("queue.topic", &mut current.topic, queue.topic);
            take("queue.group_id", &mut current.group_id, queue.group_id);
            take("queue.batch_size", &mut current.batch_size, queue.batch_size);
            take("queue.auto_commit", &mut current.auto_commit, queue.auto_commit);
            take("queue.partitions", &mut current.partitions, queue.partitions);
            take(
                "queue.claim_idle_secs",
                &mut current.claim_idle_secs,
                queue.claim_idle_secs,
            );
            take(
                "queue.consumer_name",
                &mut current.consumer_name,
                queue.consumer_name,
            );
        }

        if let Some(storage) = other.storage {
            let current = self.storage.get_or_insert_with(StorageFileConfig::default);
            take("storage.type", &mut current.storage_type, storage.storage_type);
            take("storage.local_path", &mut current.local_path, storage.local_path);
            take(
                "storage.delete_after_processing",
                &mut current.delete_after_processing,
                storage.delete_after_processing,
            );

            if let Some(minio) = storage.minio {
                let current = current.minio.get_or_insert_with(MinioFileConfig::default);
                take("storage.minio.endpoint", &mut current.endpoint, minio.endpoint);
                take("storage.minio.port", &mut current.port, minio.port);
                take("storage.minio.use_ssl", &mut current.use_ssl, minio.use_ssl);
                take("storage.minio.bucket", &mut current.bucket, minio.bucket);
                take("storage.minio.region", &mut current.region, minio.region);
                // Credentials are not logged
                if minio.access_key.is_some() {
                    current.access_key = minio.access_key;
                }
                if minio.secret_key.is_some() {
                    current.secret_key = minio.secret_key;
                }
            }
        }

        if let Some(database) = other.database {
            let current = self.database.get_or_insert_with(DatabaseFileConfig::default);
            if database.url.is_some() {
                current.url = database.url;
            }
            take(
                "database.max_connections",
                &mut current.max_connections,
                database.max_connections,
            );
            take(
                "database.min_connections",
                &mut current.min_connections,
                database.min_connections,
            );
            take(
                "database.acquire_timeout_secs",
                &mut current.acquire_timeout_secs,
                database.acquire_timeout_secs,
            );
            take(
                "database.idle_timeout_secs",
                &mut current.idle_timeout_secs,
                database.idle_timeout_secs,
            );
            take(
                "database.max_lifetime_secs",
                &mut current.max_lifetime_secs,
                database.max_lifetime_secs,
            );
            take(
                "database.statement_timeout_secs",
                &mut current.statement_timeout_secs,
                database.statement_timeout_secs,
            );
        }

        if let Some(retention) = other.retention {
            let current = self.retention.get_or_insert_with(RetentionFileConfig::default);
            take(
                "retention.file_retention_days",
                &mut current.file_retention_days,
                retention.file_retention_days,
            );
        }
    }
}

// =============================================================================
// Runtime Config Structs
// =============================================================================

/// Message queue configuration
#[derive(Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub backend: QueueBackendKind,
    pub redis_url: String,
    pub topic: String,
    pub group_id: String,
    pub batch_size: usize,
    pub auto_commit: bool,
    pub partitions: u32,
    /// Idle time before another consumer's pending delivery is claimed
    pub claim_idle_secs: u64,
    /// Consumer name within the group
    ///
    /// Must survive restarts so the consumer can re-read its own pending deliveries.
    pub consumer_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackendKind::default(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            topic: DEFAULT_QUEUE_TOPIC.to_string(),
            group_id: DEFAULT_QUEUE_GROUP_ID.to_string(),
            batch_size: DEFAULT_QUEUE_BATCH_SIZE,
            auto_commit: false,
            partitions: DEFAULT_QUEUE_PARTITIONS,
            claim_idle_secs: DEFAULT_QUEUE_CLAIM_IDLE_SECS,
            consumer_name: default_consumer_name(),
        }
    }
}

impl fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConfig")
            .field("backend", &self.backend)
            .field("redis_url", &redact_url_password(&self.redis_url))
            .field("topic", &self.topic)
            .field("group_id", &self.group_id)
            .field("batch_size", &self.batch_size)
            .field("auto_commit", &self.auto_commit)
            .field("partitions", &self.partitions)
            .field("claim_idle_secs", &self.claim_idle_secs)
            .field("consumer_name", &self.consumer_name)
            .finish()
    }
}

/// MinIO (S3-compatible) connection settings
#[derive(Clone, PartialEq, Eq)]
pub struct MinioConfig {
    /// Host, `host:port` or full URL; MinIO is unavailable when unset
    pub endpoint: Option<String>,
    pub port: u16,
    pub use_ssl: bool,
    pub bucket: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl Default for MinioConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            port: DEFAULT_MINIO_PORT,
            use_ssl: false,
            bucket: DEFAULT_MINIO_BUCKET.to_string(),
            region: DEFAULT_MINIO_REGION.to_string(),
            access_key: None,
            secret_key: None,
        }
    }
}

impl fmt::Debug for MinioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MinioConfig")
            .field("endpoint", &self.endpoint)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key", &self.access_key.as_ref().map(|_| "[REDACTED]"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Object storage configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Backend used for envelopes without `storage_type` and for `enqueue`
    pub default_type: StorageType,
    pub local_path: PathBuf,
    pub minio: MinioConfig,
    pub delete_after_processing: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_type: StorageType::default(),
            local_path: PathBuf::from(DEFAULT_STORAGE_LOCAL_PATH),
            minio: MinioConfig::default(),
            delete_after_processing: false,
        }
    }
}

/// PostgreSQL configuration
///
/// Zero pool values fall back to the built-in defaults.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub statement_timeout_secs: u64,
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("url", &redact_url_password(&self.url))
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("max_lifetime_secs", &self.max_lifetime_secs)
            .field("statement_timeout_secs", &self.statement_timeout_secs)
            .finish()
    }
}

/// Claim-check blob retention
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Days before a blob is swept; 0 disables the sweep
    pub file_retention_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            file_retention_days: DEFAULT_FILE_RETENTION_DAYS,
        }
    }
}

/// Resolved runtime configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    pub database: PostgresConfig,
    pub retention: RetentionConfig,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.easysmart/ingest.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        let config = Self::resolve(file_config, cli);
        config.validate()?;
        tracing::debug!(config = ?config, "Configuration resolved");
        Ok(config)
    }

    /// Layer merged file values under CLI/env values and fill defaults
    fn resolve(file_config: FileConfig, cli: &CliConfig) -> Self {
        let file_queue = file_config.queue.unwrap_or_default();
        let file_storage = file_config.storage.unwrap_or_default();
        let file_minio = file_storage.minio.unwrap_or_default();
        let file_database = file_config.database.unwrap_or_default();
        let file_retention = file_config.retention.unwrap_or_default();

        let defaults = QueueConfig::default();
        let queue = QueueConfig {
            backend: cli
                .queue_backend
                .or(file_queue.backend)
                .unwrap_or(defaults.backend),
            redis_url: cli
                .redis_url
                .clone()
                .or(file_queue.redis_url)
                .unwrap_or(defaults.redis_url),
            topic: cli
                .queue_topic
                .clone()
                .or(file_queue.topic)
                .unwrap_or(defaults.topic),
            group_id: cli
                .queue_group_id
                .clone()
                .or(file_queue.group_id)
                .unwrap_or(defaults.group_id),
            batch_size: cli
                .queue_batch_size
                .or(file_queue.batch_size)
                .unwrap_or(defaults.batch_size),
            auto_commit: cli
                .queue_auto_commit
                .or(file_queue.auto_commit)
                .unwrap_or(defaults.auto_commit),
            partitions: cli
                .queue_partitions
                .or(file_queue.partitions)
                .unwrap_or(defaults.partitions),
            claim_idle_secs: cli
                .queue_claim_idle_secs
                .or(file_queue.claim_idle_secs)
                .unwrap_or(defaults.claim_idle_secs),
            consumer_name: cli
                .queue_consumer_name
                .clone()
                .or(file_queue.consumer_name)
                .unwrap_or(defaults.consumer_name),
        };

        let defaults = MinioConfig::default();
        let minio = MinioConfig {
            endpoint: cli
                .minio_endpoint
                .clone()
                .or(file_minio.endpoint)
                .filter(|e| !e.trim().is_empty()),
            port: cli.minio_port.or(file_minio.port).unwrap_or(defaults.port),
            use_ssl: cli
                .minio_use_ssl
                .or(file_minio.use_ssl)
                .unwrap_or(defaults.use_ssl),
            bucket: cli
                .minio_bucket
                .clone()
                .or(file_minio.bucket)
                .unwrap_or(defaults.bucket),
            region: cli
                .minio_region
                .clone()
                .or(file_minio.region)
                .unwrap_or(defaults.region),
            access_key: cli.minio_access_key.clone().or(file_minio.access_key),
            secret_key: cli.minio_secret_key.clone().or(file_minio.secret_key),
        };

        let storage = StorageConfig {
            default_type: cli
                .storage_type
                .or(file_storage.storage_type)
                .unwrap_or_default(),
            local_path: cli
                .storage_local_path
                .clone()
                .or(file_storage.local_path)
                .map(|p| expand_path(&p))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_LOCAL_PATH)),
            minio,
            delete_after_processing: cli
                .delete_file_after_processing
                .or(file_storage.delete_after_processing)
                .unwrap_or(false),
        };

        let database = PostgresConfig {
            url: cli
                .database_url
                .clone()
                .or(file_database.url)
                .unwrap_or_default(),
            max_connections: file_database
                .max_connections
                .unwrap_or(POSTGRES_DEFAULT_MAX_CONNECTIONS),
            min_connections: file_database
                .min_connections
                .unwrap_or(POSTGRES_DEFAULT_MIN_CONNECTIONS),
            acquire_timeout_secs: file_database
                .acquire_timeout_secs
                .unwrap_or(POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout_secs: file_database
                .idle_timeout_secs
                .unwrap_or(POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS),
            max_lifetime_secs: file_database
                .max_lifetime_secs
                .unwrap_or(POSTGRES_DEFAULT_MAX_LIFETIME_SECS),
            statement_timeout_secs: file_database
                .statement_timeout_secs
                .unwrap_or(POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS),
        };

        let retention = RetentionConfig {
            file_retention_days: cli
                .file_retention_days
                .or(file_retention.file_retention_days)
                .unwrap_or(DEFAULT_FILE_RETENTION_DAYS),
        };

        Self {
            queue,
            storage,
            database,
            retention,
        }
    }

    /// Validate settings shared by every command
    fn validate(&self) -> Result<()> {
        if self.queue.topic.trim().is_empty() {
            anyhow::bail!("Queue topic cannot be empty");
        }
        if self.queue.group_id.trim().is_empty() {
            anyhow::bail!("Queue consumer group cannot be empty");
        }
        if self.queue.consumer_name.trim().is_empty() {
            anyhow::bail!("Queue consumer name cannot be empty");
        }
        if self.queue.batch_size == 0 {
            anyhow::bail!("Queue batch size must be at least 1");
        }
        if self.queue.partitions == 0 {
            anyhow::bail!("Queue partitions must be at least 1");
        }
        if self.queue.backend == QueueBackendKind::Redis && self.queue.redis_url.trim().is_empty() {
            anyhow::bail!("Redis URL is required when the queue backend is redis");
        }
        if self.storage.default_type == StorageType::Minio && self.storage.minio.endpoint.is_none()
        {
            anyhow::bail!(
                "{} is required when the storage type is minio (or set the storage type to local)",
                ENV_MINIO_ENDPOINT
            );
        }
        if self.storage.minio.access_key.is_some() != self.storage.minio.secret_key.is_some() {
            anyhow::bail!("MinIO access key and secret key must be set together");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be at least 1");
        }
        Ok(())
    }

    /// Ensure a database URL is present (required by `start`)
    pub fn require_database(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            anyhow::bail!("{} is required to start the ingest worker", ENV_DATABASE_URL);
        }
        Ok(())
    }
}

/// Replace the password of a connection URL for logging
pub(crate) fn redact_url_password(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
        None => url.to_string(),
    }
}

/// Host name of this machine, falling back to the application name
fn default_consumer_name() -> String {
    std::env::var(ENV_HOSTNAME)
        .ok()
        .or_else(|| fs::read_to_string(HOSTNAME_FILE).ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| APP_NAME_LOWER.to_string())
}

/// Get the profile config path (~/.easysmart/ingest.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}
