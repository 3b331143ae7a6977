use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use contracts::system::queue::RoutingKey;
use contracts::usecases::u504_import_from_wildberries::{ImportMethod, ImportRequest};
use serde::Serialize;
use std::path::PathBuf;

use sync_worker::shared::config;
use sync_worker::system::initialization::AppContext;
use sync_worker::system::queue::{ServeScope, Supervisor};

/// Синхронизация каталога Wildberries через очереди RabbitMQ
#[derive(Parser)]
#[command(name = "sync-worker", version)]
struct Cli {
    /// Путь к config.toml (по умолчанию рядом с исполняемым файлом)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Непрерывный воркер до Ctrl+C
    Serve {
        /// products | stocks | orders | all
        #[arg(long, default_value = "all")]
        queue: String,
    },
    /// Один проход по трём рабочим очередям
    Sweep {
        #[arg(long)]
        max_per_queue: Option<usize>,
    },
    /// Обработать одну очередь
    Run {
        #[arg(long)]
        queue: String,
        #[arg(long)]
        max: Option<usize>,
    },
    /// Импорт каталога напрямую, без брокера
    Import(ImportArgs),
    /// Поставить задачу в очередь
    #[command(subcommand)]
    Publish(PublishCommand),
    /// Глубина рабочих очередей
    Stats,
}

#[derive(Args)]
struct ImportArgs {
    #[arg(long)]
    batch_size: Option<u32>,
    #[arg(long, default_value = "batch")]
    method: ImportMethod,
}

#[derive(Subcommand)]
enum PublishCommand {
    Products {
        #[arg(long = "main-id", required = true)]
        main_ids: Vec<String>,
        #[arg(long)]
        vendor: Option<String>,
    },
    Stocks {
        #[arg(long = "vendor-code", required = true)]
        vendor_codes: Vec<String>,
    },
    Orders {
        /// YYYY-MM-DD, по умолчанию вчера
        #[arg(long)]
        date_from: Option<NaiveDate>,
        #[arg(long, default_value_t = 0)]
        flag: i32,
    },
    Import(ImportArgs),
    UpdateStocks,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, source) = config::load_config(cli.config.as_deref())?;
    sync_worker::system::tracing::initialize(&config::log_dir(&config))?;
    match &source {
        config::ConfigSource::Embedded { missing: Some(_) } => {
            tracing::warn!("Using {}", source)
        }
        _ => tracing::info!("Configuration loaded from {}", source),
    }

    let ctx = AppContext::initialize(config).await?;

    match cli.command {
        Command::Serve { queue } => serve(&ctx, &queue).await,
        Command::Sweep { max_per_queue } => {
            let max = max_per_queue.or(Some(ctx.config.worker.max_messages_per_run));
            let worker = ctx.worker().await?;
            let report = worker.run_all(max).await;
            worker.close().await;
            print_json(&report?)
        }
        Command::Run { queue, max } => {
            let key = parse_queue(&queue)?;
            let worker = ctx.worker().await?;
            let report = worker.run(key.queue_name(), max).await;
            worker.close().await;
            print_json(&report?)
        }
        Command::Import(args) => {
            let request = import_request(&ctx, &args);
            let importer = ctx.importer(ctx.wildberries_client()?);
            let outcome = importer.run(&request).await;
            print_json(&outcome)?;
            if !outcome.success {
                anyhow::bail!(outcome.message());
            }
            Ok(())
        }
        Command::Publish(command) => publish(&ctx, command).await,
        Command::Stats => {
            let manager = ctx.connect_broker().await?;
            let stats = manager.queue_stats().await;
            manager.close().await;
            print_json(&stats)
        }
    }
}

async fn serve(ctx: &AppContext, queue: &str) -> anyhow::Result<()> {
    let scope = if queue == "all" {
        ServeScope::All
    } else {
        ServeScope::Queue(parse_queue(queue)?)
    };

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => {
                tracing::error!("Cannot listen for Ctrl+C: {}", e);
                futures::future::pending::<()>().await;
            }
        }
    };

    Supervisor::new(ctx.config.worker.clone(), scope)
        .run(|| ctx.worker(), shutdown)
        .await;
    Ok(())
}

async fn publish(ctx: &AppContext, command: PublishCommand) -> anyhow::Result<()> {
    let (publisher, manager) = ctx.publisher().await?;

    let published = match command {
        PublishCommand::Products { main_ids, vendor } => {
            publisher.publish_products_task(main_ids, vendor).await
        }
        PublishCommand::Stocks { vendor_codes } => {
            publisher.publish_stocks_task(vendor_codes).await
        }
        PublishCommand::Orders { date_from, flag } => {
            publisher.publish_orders_task(date_from, flag).await
        }
        PublishCommand::Import(args) => {
            let request = import_request(ctx, &args);
            publisher
                .publish_import_task(Some(request.batch_size), request.method)
                .await
        }
        PublishCommand::UpdateStocks => publisher.publish_update_stocks_task().await,
    };

    manager.close().await;
    print_json(&serde_json::json!({ "published": published }))?;
    if !published {
        anyhow::bail!("Task was not published");
    }
    Ok(())
}

fn import_request(ctx: &AppContext, args: &ImportArgs) -> ImportRequest {
    ImportRequest {
        batch_size: args.batch_size.unwrap_or(ctx.config.import.batch_size),
        method: args.method,
    }
}

fn parse_queue(value: &str) -> anyhow::Result<RoutingKey> {
    match RoutingKey::parse(value) {
        Some(key) if key != RoutingKey::DeadLetter => Ok(key),
        _ => anyhow::bail!("unknown queue: {} (expected products, stocks or orders)", value),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
