//! Startup banner

use super::config::{AppConfig, QueueBackendKind, StorageType, redact_url_password};
use super::constants::APP_NAME;

/// Label width for aligned output
const W: usize = 14;

/// Print the startup banner with the resolved wiring
pub fn print_banner(config: &AppConfig) {
    println!();
    println!(
        "  \x1b[1m\x1b[36m{}\x1b[0m \x1b[90mv{}\x1b[0m",
        APP_NAME,
        env!("CARGO_PKG_VERSION")
    );
    println!();

    let queue = match config.queue.backend {
        QueueBackendKind::Redis => format!(
            "{} \x1b[90m({})\x1b[0m",
            config.queue.topic,
            redact_url_password(&config.queue.redis_url)
        ),
        QueueBackendKind::Memory => format!("{} \x1b[90m(in-memory)\x1b[0m", config.queue.topic),
    };
    println!("  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}", "Queue:", queue);
    println!(
        "  \x1b[90m➜  {:<W$} {} as {}\x1b[0m",
        "Group:", config.queue.group_id, config.queue.consumer_name
    );

    let storage = match config.storage.default_type {
        StorageType::Minio => format!(
            "minio {}/{}",
            config.storage.minio.endpoint.as_deref().unwrap_or("-"),
            config.storage.minio.bucket
        ),
        StorageType::Local => format!("local {}", config.storage.local_path.display()),
    };
    println!("  \x1b[33m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}", "Storage:", storage);
    println!(
        "  \x1b[35m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}",
        "Database:",
        redact_url_password(&config.database.url)
    );

    let retention = if config.retention.file_retention_days == 0 {
        "disabled".to_string()
    } else {
        format!("{} days", config.retention.file_retention_days)
    };
    println!("  \x1b[90m➜  {:<W$} {}\x1b[0m", "Retention:", retention);
    if config.storage.delete_after_processing {
        println!("  \x1b[90m➜  {:<W$} on\x1b[0m", "Delete blobs:");
    }
    println!();
}
