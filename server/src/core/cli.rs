use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::{QueueBackendKind, StorageType};
use super::constants::{
    ENV_CONFIG, ENV_DATABASE_URL, ENV_DELETE_FILE_AFTER_PROCESSING, ENV_FILE_RETENTION_DAYS,
    ENV_MINIO_ACCESS_KEY, ENV_MINIO_BUCKET, ENV_MINIO_ENDPOINT, ENV_MINIO_PORT, ENV_MINIO_REGION,
    ENV_MINIO_SECRET_KEY, ENV_MINIO_USE_SSL, ENV_QUEUE_AUTO_COMMIT, ENV_QUEUE_BACKEND,
    ENV_QUEUE_BATCH_SIZE, ENV_QUEUE_CLAIM_IDLE_SECS, ENV_QUEUE_CONSUMER_NAME, ENV_QUEUE_GROUP_ID, ENV_QUEUE_PARTITIONS,
    ENV_QUEUE_TOPIC, ENV_REDIS_URL, ENV_STORAGE_LOCAL_PATH, ENV_STORAGE_TYPE,
};

#[derive(Parser)]
#[command(name = "easysmart-ingest")]
#[command(version, about = "Claim-check telemetry ingestion worker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    // Queue options
    /// Queue backend (memory or redis)
    #[arg(long, global = true, env = ENV_QUEUE_BACKEND, value_parser = parse_queue_backend)]
    pub queue_backend: Option<QueueBackendKind>,

    /// Redis URL for the stream backend
    #[arg(long, global = true, env = ENV_REDIS_URL)]
    pub redis_url: Option<String>,

    /// Topic carrying claim-check envelopes
    #[arg(long, global = true, env = ENV_QUEUE_TOPIC)]
    pub queue_topic: Option<String>,

    /// Consumer group shared by all workers
    #[arg(long, global = true, env = ENV_QUEUE_GROUP_ID)]
    pub queue_group_id: Option<String>,

    /// Maximum messages per poll
    #[arg(long, global = true, env = ENV_QUEUE_BATCH_SIZE)]
    pub queue_batch_size: Option<usize>,

    /// Commit on the next poll instead of after each batch
    #[arg(long, global = true, env = ENV_QUEUE_AUTO_COMMIT)]
    pub queue_auto_commit: Option<bool>,

    /// Partitions per topic
    #[arg(long, global = true, env = ENV_QUEUE_PARTITIONS)]
    pub queue_partitions: Option<u32>,

    /// Seconds before another consumer's pending delivery is claimed
    #[arg(long, global = true, env = ENV_QUEUE_CLAIM_IDLE_SECS)]
    pub queue_claim_idle_secs: Option<u64>,

    /// Consumer name within the group; stable across restarts (default: host name)
    #[arg(long, global = true, env = ENV_QUEUE_CONSUMER_NAME)]
    pub queue_consumer_name: Option<String>,

    // Storage options
    /// Default object storage (minio or local)
    #[arg(long, global = true, env = ENV_STORAGE_TYPE, value_parser = parse_storage_type)]
    pub storage_type: Option<StorageType>,

    /// Root directory of the local storage backend
    #[arg(long, global = true, env = ENV_STORAGE_LOCAL_PATH)]
    pub storage_local_path: Option<String>,

    /// MinIO endpoint (host, host:port or URL)
    #[arg(long, global = true, env = ENV_MINIO_ENDPOINT)]
    pub minio_endpoint: Option<String>,

    /// MinIO port, used when the endpoint has none
    #[arg(long, global = true, env = ENV_MINIO_PORT)]
    pub minio_port: Option<u16>,

    /// Use HTTPS for MinIO
    #[arg(long, global = true, env = ENV_MINIO_USE_SSL)]
    pub minio_use_ssl: Option<bool>,

    /// MinIO bucket holding claim-check blobs
    #[arg(long, global = true, env = ENV_MINIO_BUCKET)]
    pub minio_bucket: Option<String>,

    /// MinIO region
    #[arg(long, global = true, env = ENV_MINIO_REGION)]
    pub minio_region: Option<String>,

    /// MinIO access key
    #[arg(long, global = true, env = ENV_MINIO_ACCESS_KEY, hide_env_values = true)]
    pub minio_access_key: Option<String>,

    /// MinIO secret key
    #[arg(long, global = true, env = ENV_MINIO_SECRET_KEY, hide_env_values = true)]
    pub minio_secret_key: Option<String>,

    /// Delete claim-check blobs once their telemetry is stored
    #[arg(long, global = true, env = ENV_DELETE_FILE_AFTER_PROCESSING)]
    pub delete_file_after_processing: Option<bool>,

    /// Days to keep claim-check blobs (0 = never sweep)
    #[arg(long, global = true, env = ENV_FILE_RETENTION_DAYS)]
    pub file_retention_days: Option<u32>,

    // Database options
    /// PostgreSQL connection URL
    #[arg(long, global = true, env = ENV_DATABASE_URL, hide_env_values = true)]
    pub database_url: Option<String>,
}

/// Parse queue backend from CLI/env string
fn parse_queue_backend(s: &str) -> Result<QueueBackendKind, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(QueueBackendKind::Memory),
        "redis" => Ok(QueueBackendKind::Redis),
        _ => Err(format!(
            "Invalid queue backend '{}'. Valid options: memory, redis",
            s
        )),
    }
}

/// Parse storage type from CLI/env string
fn parse_storage_type(s: &str) -> Result<StorageType, String> {
    s.parse()
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Run the ingest worker (default command)
    Start,
    /// Store a JSON file as a claim-check blob and publish its envelope
    Enqueue {
        /// Tenant id used as the message key
        #[arg(long, short = 't')]
        tenant: i64,
        /// JSON file with one record or an array of records
        file: PathBuf,
    },
    /// Run one retention sweep and exit
    Sweep,
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub config: Option<PathBuf>,
    pub queue_backend: Option<QueueBackendKind>,
    pub redis_url: Option<String>,
    pub queue_topic: Option<String>,
    pub queue_group_id: Option<String>,
    pub queue_batch_size: Option<usize>,
    pub queue_auto_commit: Option<bool>,
    pub queue_partitions: Option<u32>,
    pub queue_claim_idle_secs: Option<u64>,
    pub queue_consumer_name: Option<String>,
    pub storage_type: Option<StorageType>,
    pub storage_local_path: Option<String>,
    pub minio_endpoint: Option<String>,
    pub minio_port: Option<u16>,
    pub minio_use_ssl: Option<bool>,
    pub minio_bucket: Option<String>,
    pub minio_region: Option<String>,
    pub minio_access_key: Option<String>,
    pub minio_secret_key: Option<String>,
    pub delete_file_after_processing: Option<bool>,
    pub file_retention_days: Option<u32>,
    pub database_url: Option<String>,
}

impl From<Cli> for CliConfig {
    fn from(cli: Cli) -> Self {
        Self {
            config: cli.config,
            queue_backend: cli.queue_backend,
            redis_url: cli.redis_url,
            queue_topic: cli.queue_topic,
            queue_group_id: cli.queue_group_id,
            queue_batch_size: cli.queue_batch_size,
            queue_auto_commit: cli.queue_auto_commit,
            queue_partitions: cli.queue_partitions,
            queue_claim_idle_secs: cli.queue_claim_idle_secs,
            queue_consumer_name: cli.queue_consumer_name,
            storage_type: cli.storage_type,
            storage_local_path: cli.storage_local_path,
            minio_endpoint: cli.minio_endpoint,
            minio_port: cli.minio_port,
            minio_use_ssl: cli.minio_use_ssl,
            minio_bucket: cli.minio_bucket,
            minio_region: cli.minio_region,
            minio_access_key: cli.minio_access_key,
            minio_secret_key: cli.minio_secret_key,
            delete_file_after_processing: cli.delete_file_after_processing,
            file_retention_days: cli.file_retention_days,
            database_url: cli.database_url,
        }
    }
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let mut cli = Cli::parse();
    let command = cli.command.take();
    (CliConfig::from(cli), command)
}
