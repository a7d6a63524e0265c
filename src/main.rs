use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod db;
mod dedup;
mod error;
mod export;
mod feed;
mod ingest;
mod models;
mod services;

use config::{Config, LoggingConfig};
use db::Repository;
use error::{AppError, Result};
use export::{render_statistics, CsvExporter};
use ingest::Coordinator;
use models::ArticleFilter;

#[derive(Parser)]
#[command(
    name = "collector",
    version,
    about = "Collects entertainment news into a deduplicated archive"
)]
struct Cli {
    /// Path to the config TOML file (created with defaults if missing)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep running, collecting every `schedule.interval_minutes`
    #[arg(long)]
    schedule: bool,

    /// Export archived articles to CSV
    #[arg(long)]
    export: bool,

    /// Print archive statistics and the last run
    #[arg(long)]
    stats: bool,

    /// Restrict the export to one source (e.g. Deadline, Variety)
    #[arg(long)]
    source: Option<String>,

    /// Export without article text
    #[arg(long)]
    summary: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let _log_guard = init_logging(&config.logging)?;

    let repository = open_repository(&config).await?;

    if cli.stats {
        let stats = repository.stats().await?;
        let last_run = repository.last_run().await?;
        println!("{}", render_statistics(&stats, last_run.as_ref()));
    } else if cli.export {
        export_articles(&config, &repository, cli.source, cli.summary).await?;
    } else if cli.schedule {
        let coordinator = Coordinator::new(&config, repository)?;
        run_scheduled(&coordinator, config.schedule.interval_minutes, shutdown_signal()).await;
    } else {
        let coordinator = Coordinator::new(&config, repository)?;
        let stats = coordinator.run_until(stopped(shutdown_signal())).await?;
        println!(
            "Collected {} new, {} duplicates, {} near-duplicates ({} skipped, {} failed)",
            stats.new,
            stats.duplicates,
            stats.near_duplicates,
            stats.skipped(),
            stats.failed
        );
    }

    Ok(())
}

const LOG_FILE: &str = "collector.log";

/// stderr always; `<directory>/collector.log` as well when configured. The
/// returned guard flushes the file writer when dropped.
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)?;
            let appender = tracing_appender::rolling::never(directory, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Flips to `true` on the first Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            let _ = tx.send(true);
        }
    });
    rx
}

/// Completes once shutdown has been requested.
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        // The signal task is gone, so no request can arrive.
        std::future::pending::<()>().await;
    }
}

async fn open_repository(config: &Config) -> Result<Repository> {
    let path = Path::new(&config.database.path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Repository::new(&config.database.path).await
}

async fn export_articles(
    config: &Config,
    repository: &Repository,
    source: Option<String>,
    summary: bool,
) -> Result<()> {
    let articles = repository
        .list_articles(ArticleFilter {
            source: source.clone(),
            ..Default::default()
        })
        .await?;

    tracing::info!(count = articles.len(), "Exporting articles");
    let exporter = CsvExporter::new(&config.export.directory)?;
    let written = if summary {
        exporter.export_summary(&articles, source.as_deref())?
    } else {
        exporter.export_articles(&articles, source.as_deref())?
    };

    match written {
        Some(path) => {
            let stats = repository.stats().await?;
            let last_run = repository.last_run().await?;
            let report = exporter.export_statistics(&stats, last_run.as_ref())?;
            println!("Exported {} articles to {}", articles.len(), path.display());
            println!("Statistics written to {}", report.display());
        }
        None => println!("No articles found to export"),
    }
    Ok(())
}

/// Collect now, then every `interval_minutes` until Ctrl-C, which also
/// interrupts a run in progress. A run that finds the archive locked, or
/// fails outright, is logged and the schedule goes on.
async fn run_scheduled(
    coordinator: &Coordinator,
    interval_minutes: u64,
    shutdown: watch::Receiver<bool>,
) {
    let period = Duration::from_secs(interval_minutes.max(1) * 60);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(interval_minutes, "Scheduled collection started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stopped(shutdown.clone()) => break,
        }

        match coordinator.run_until(stopped(shutdown.clone())).await {
            Ok(_) => {}
            Err(AppError::Interrupted) => break,
            Err(AppError::StoreLocked(holder)) => {
                tracing::warn!(%holder, "Archive locked, skipping this run");
            }
            Err(e) => tracing::error!(error = %e, "Collection run failed"),
        }
    }

    tracing::info!("Stopping scheduled collection");
}
