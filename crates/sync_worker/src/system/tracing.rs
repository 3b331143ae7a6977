use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE: &str = "sync_worker.log";
const DEFAULT_FILTER: &str = "info,sqlx=warn,sea_orm=warn,lapin=warn";

/// Инициализация системы трассировки (tracing)
///
/// Логи пишутся в:
/// - stdout (с цветами)
/// - `<log_dir>/sync_worker.log` (без цветов)
pub fn initialize(log_dir: &Path) -> anyhow::Result<()> {
    println!("========================================");
    println!("  LOGGING SYSTEM INITIALIZATION");
    println!("========================================");

    if let Err(e) = std::fs::create_dir_all(log_dir) {
        println!("✗ ERROR: Cannot create log directory: {}", e);
        println!("  Path: {}", log_dir.display());
        println!("========================================\n");
        return Err(anyhow::anyhow!("Cannot create log directory: {}", e));
    }

    let log_file_path = log_dir.join(LOG_FILE);
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file_path)
    {
        Ok(f) => f,
        Err(e) => {
            println!("✗ ERROR: Cannot open log file: {}", e);
            println!("  Error kind: {:?}", e.kind());
            println!("  Path: {}", log_file_path.display());
            println!("========================================\n");
            return Err(anyhow::anyhow!("Cannot open log file: {}", e));
        }
    };
    println!("✓ Log file: {}", log_file_path.display());

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into());
    println!("✓ Log level: {}", log_level);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(log_level))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Arc::new(log_file))
                .with_ansi(false),
        )
        .try_init()?;

    println!("========================================\n");

    Ok(())
}
