//! # StoreWatch — storefront background engine
//!
//! Abandoned-cart reminders, low-stock alerts and WhatsApp delivery.
//!
//! Usage:
//!   storewatch run                          # Daemon: batch loop + queue worker
//!   storewatch once all                     # One pass of every batch job (cron)
//!   storewatch once recover                 # One pass of a single job
//!   storewatch alerts                       # Pending low-stock alerts
//!   storewatch resolve-alert <id> --notes "Restocked"
//!   storewatch notify-order --phone +244900000000 --order KZ-1001 --total 12500
//!   storewatch queue-stats

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use storewatch_core::StoreWatchConfig;
use storewatch_core::config::expand_path;
use storewatch_core::traits::{JobQueue, SystemClock};
use storewatch_scheduler::{BatchJob, DispatchOutcome, Engine, EngineDb, EngineParts, SqliteJobQueue};

#[derive(Parser)]
#[command(
    name = "storewatch",
    version,
    about = "🛒 StoreWatch — cart recovery, stock alerts and notification dispatch"
)]
struct Cli {
    /// Config file (default: ~/.storewatch/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the engine database path
    #[arg(long)]
    db_path: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines (for log shippers)
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the batch loop and the queue worker until Ctrl-C
    Run,
    /// Run one batch job once and print its summary as JSON
    Once {
        #[arg(value_enum)]
        job: OnceJob,
    },
    /// Resolve a low-stock alert by hand
    ResolveAlert {
        id: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List pending low-stock alerts
    Alerts,
    /// Send an order confirmation over WhatsApp
    NotifyOrder {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        order: String,
        #[arg(long)]
        total: f64,
    },
    /// Job counts in the delivery queue
    QueueStats,
}

#[derive(Clone, Copy, ValueEnum)]
enum OnceJob {
    Recover,
    Expire,
    Stock,
    AutoResolve,
    Queue,
    All,
}

impl OnceJob {
    fn batch(self) -> Option<BatchJob> {
        match self {
            Self::Recover => Some(BatchJob::Recover),
            Self::Expire => Some(BatchJob::Expire),
            Self::Stock => Some(BatchJob::Stock),
            Self::AutoResolve => Some(BatchJob::AutoResolve),
            Self::Queue => Some(BatchJob::Queue),
            Self::All => None,
        }
    }
}

fn load_config(cli: &Cli) -> Result<StoreWatchConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreWatchConfig::load_from(&expand_path(path))?,
        None => StoreWatchConfig::load()?,
    };
    config.apply_env_overrides();
    if let Some(db_path) = &cli.db_path {
        config.database_path = db_path.clone();
    }
    Ok(config)
}

/// Build every collaborator once. Missing channel credentials or an
/// unreachable queue degrade the engine instead of stopping it.
fn build_engine(config: &StoreWatchConfig) -> Result<Engine> {
    let db_path = config.resolved_database_path();
    let db = Arc::new(
        EngineDb::open(&db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?,
    );

    let mailer = match storewatch_channels::mailer_from_config(config) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!("📧 Email disabled: {e}");
            None
        }
    };
    let chat_provider = match storewatch_channels::chat_provider_from_config(config) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("💬 WhatsApp disabled: {e}");
            None
        }
    };

    let queue: Option<Arc<dyn JobQueue>> = if config.queue.enabled {
        let path = queue_path(config);
        match SqliteJobQueue::open(&path) {
            Ok(q) => {
                tracing::info!("📬 Queue database: {}", path.display());
                Some(Arc::new(q))
            }
            Err(e) => {
                tracing::warn!("⚠️ Queue unreachable ({e}), chat messages will be sent directly");
                None
            }
        }
    } else {
        None
    };

    Ok(Engine::new(
        config,
        EngineParts {
            db,
            mailer,
            chat_provider,
            queue,
            clock: Arc::new(SystemClock),
        },
    ))
}

fn queue_path(config: &StoreWatchConfig) -> PathBuf {
    match &config.queue.database_path {
        Some(p) => expand_path(p),
        None => config.resolved_database_path().with_file_name("queue.db"),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "storewatch=debug,storewatch_scheduler=debug,storewatch_channels=debug"
    } else {
        "storewatch=info,storewatch_scheduler=info,storewatch_channels=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config = load_config(&cli)?;
    let engine = build_engine(&config)?;

    if let Command::Run = cli.command {
        let engine = Arc::new(engine);
        tracing::info!("🛒 StoreWatch started");

        let batch = tokio::spawn(storewatch_scheduler::spawn_engine(
            engine.clone(),
            config.schedule.interval_secs,
            config.schedule.run_on_start,
        ));
        let worker = engine.worker().map(|w| {
            tokio::spawn(w.run(config.queue.poll_interval_secs))
        });

        tokio::signal::ctrl_c().await?;
        tracing::info!("👋 Shutting down");
        batch.abort();
        if let Some(worker) = worker {
            worker.abort();
        }
        engine.shutdown().await;
        return Ok(());
    }

    let result = run_command(&engine, cli.command).await;
    engine.shutdown().await;
    result
}

/// One-shot commands. The caller flushes audit writes afterwards.
async fn run_command(engine: &Engine, command: Command) -> Result<()> {
    match command {
        // Long-running; handled in main.
        Command::Run => {}
        Command::Once { job } => {
            let summary = match job.batch() {
                Some(batch) => engine.run_job(batch).await?,
                None => engine.run_all().await,
            };
            print_json(&summary)?;
        }
        Command::ResolveAlert { id, notes } => {
            let alert = engine.stock.resolve_low_stock_alert(&id, notes.as_deref())?;
            print_json(&alert)?;
        }
        Command::Alerts => {
            let alerts = engine.stock.list_pending_alerts()?;
            if alerts.is_empty() {
                println!("✅ No pending low-stock alerts");
            } else {
                for a in &alerts {
                    println!(
                        "⚠️  {}  {}  stock {}/{}  since {}",
                        a.id,
                        a.product_name,
                        a.current_stock,
                        a.minimum_stock,
                        a.created_at.format("%Y-%m-%d %H:%M UTC")
                    );
                }
            }
        }
        Command::NotifyOrder {
            phone,
            order,
            total,
        } => match engine.notify_order(&phone, &order, total).await? {
            DispatchOutcome::Queued { job_id } => println!("📥 Queued as job {job_id}"),
            DispatchOutcome::Sent(receipt) => {
                println!("📤 Sent ({}, {})", receipt.id, receipt.status)
            }
        },
        Command::QueueStats => {
            let stats = engine.queue_stats().await?;
            print_json(&stats)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_config() -> StoreWatchConfig {
        StoreWatchConfig {
            database_path: ":memory:".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_whatsapp_credentials_degrade_startup() {
        let mut config = in_memory_config();
        config.whatsapp.enabled = true;

        let engine = build_engine(&config).unwrap();
        let err = engine
            .notify_order("+244900000000", "KZ-1001", 12_500.0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(engine.worker().is_none());
    }

    #[tokio::test]
    async fn test_missing_email_credentials_degrade_startup() {
        let engine = build_engine(&in_memory_config()).unwrap();
        assert!(engine.stock.list_pending_alerts().unwrap().is_empty());
        engine.shutdown().await;
    }
}
