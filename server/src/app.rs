//! Core application

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::core::banner;
use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::{AppConfig, QueueBackendKind};
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG, ENV_LOG_FORMAT};
use crate::core::shutdown::ShutdownService;
use crate::data::objects::StorageRegistry;
use crate::data::queue::MessageQueue;
use crate::data::{PostgresService, TelemetryStore};
use crate::domain::ingest::{
    BulkProcessor, ConsumerLoop, ConsumerSettings, PayloadResolver, enqueue_payload,
};
use crate::domain::retention;

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub database: Arc<PostgresService>,
    pub storage: StorageRegistry,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::Enqueue { tenant, file }) => {
                return Self::enqueue(&cli_config, tenant, &file).await;
            }
            Some(Commands::Sweep) => return Self::sweep(&cli_config).await,
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        app.start().await
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        config.require_database()?;

        let database = Arc::new(
            PostgresService::init(&config.database)
                .await
                .context("Failed to initialize PostgreSQL")?,
        );
        let storage = StorageRegistry::from_config(&config.storage)
            .await
            .context("Failed to initialize object storage")?;
        tracing::debug!(
            default = %storage.default_type(),
            backends = storage.all().len(),
            "Object storage initialized"
        );

        let shutdown = ShutdownService::new(Some(Arc::clone(&database)));

        Ok(Self {
            shutdown,
            config,
            database,
            storage,
        })
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        let json = std::env::var(ENV_LOG_FORMAT).is_ok_and(|f| f.eq_ignore_ascii_case("json"));

        if json {
            tracing_subscriber::fmt()
                .json()
                .with_current_span(false)
                .with_env_filter(filter)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_thread_ids(false)
                .with_level(true)
                .with_ansi(true)
                .compact()
                .with_env_filter(filter)
                .init();
        }
    }

    async fn start(self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        self.shutdown.install_signal_handlers();

        self.start_background_tasks().await?;
        banner::print_banner(&self.config);

        self.shutdown.wait().await;
        self.shutdown.shutdown().await;

        tracing::info!("Ingest worker stopped");
        Ok(())
    }

    pub async fn start_background_tasks(&self) -> Result<()> {
        self.shutdown
            .register(
                self.database
                    .start_health_check_task(self.shutdown.subscribe()),
            )
            .await;

        if let Some(h) = retention::start_retention_task(
            self.storage.clone(),
            self.config.retention.file_retention_days,
            self.shutdown.subscribe(),
        ) {
            self.shutdown.register(h).await;
        }

        let queue = MessageQueue::from_config(&self.config.queue)
            .await
            .context("Failed to initialize message queue")?;
        queue
            .backend()
            .health_check()
            .await
            .context("Message queue health check failed")?;

        let store: Arc<dyn TelemetryStore> = self.database.clone();
        let consumer = ConsumerLoop::new(
            queue,
            PayloadResolver::new(self.storage.clone()),
            BulkProcessor::new(store),
            ConsumerSettings::from_config(&self.config),
        );

        self.shutdown
            .register(consumer.start(self.shutdown.subscribe()))
            .await;

        tracing::debug!("Background tasks started");
        Ok(())
    }

    /// `enqueue` command: store a file as a claim-check blob and publish it
    async fn enqueue(cli: &CliConfig, tenant_id: i64, file: &Path) -> Result<()> {
        let config = AppConfig::load(cli)?;
        if config.queue.backend == QueueBackendKind::Memory {
            tracing::warn!(
                "Queue backend is memory; the enqueued message only lives in this process"
            );
        }

        let payload = tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let storage = StorageRegistry::from_config(&config.storage)
            .await
            .context("Failed to initialize object storage")?;
        let queue = MessageQueue::from_config(&config.queue)
            .await
            .context("Failed to initialize message queue")?;

        let result = enqueue_payload(
            &storage,
            queue.backend().as_ref(),
            tenant_id,
            &payload,
            Utc::now(),
        )
        .await;
        if let Err(e) = queue.close().await {
            tracing::warn!(error = %e, "Failed to close queue");
        }
        let (envelope, published) =
            result.with_context(|| format!("Failed to enqueue {}", file.display()))?;

        println!(
            "Enqueued {} ({} -> {} bytes) on {}:{}:{}",
            envelope.claim_check,
            envelope.original_size,
            envelope.file_size,
            config.queue.topic,
            published.partition,
            published.offset
        );
        Ok(())
    }

    /// `sweep` command: one retention pass
    async fn sweep(cli: &CliConfig) -> Result<()> {
        let config = AppConfig::load(cli)?;
        let days = config.retention.file_retention_days;
        if days == 0 {
            println!("File retention is disabled (retention days = 0)");
            return Ok(());
        }

        let storage = StorageRegistry::from_config(&config.storage)
            .await
            .context("Failed to initialize object storage")?;
        let stats = retention::sweep_once(&storage, days, Utc::now()).await;

        println!(
            "Swept blobs older than {} days: scanned {}, deleted {}, failed {}",
            days, stats.scanned, stats.deleted, stats.failed
        );
        Ok(())
    }
}
