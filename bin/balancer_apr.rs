use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use balancer_apr::{api::server, AprService, CronScheduler, Database, Etl, Settings};

#[derive(Debug, Parser)]
#[clap(version)]
struct Opts {
    /// Log at debug level
    #[clap(short, long, global = true)]
    verbose: bool,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full ETL once and exit
    Etl,
    /// Serve the HTTP API and run the ETL periodically
    Serve,
    /// Apply the database schema and exit
    Migrate,
}

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    SimpleLogger::new()
        .with_level(if opts.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init()
        .unwrap();

    let settings = Arc::new(
        Settings::new()
            .context("Failed to load config.yaml. Please ensure it exists and is valid")?,
    );

    let db = Database::new(settings.clone())
        .await
        .context("Failed to initialize database connection")?;

    match opts.command {
        Command::Migrate => {
            info!("Schema is up to date");
            Ok(())
        },
        Command::Etl => Etl::new(&db, &settings)?.run().await,
        Command::Serve => serve(settings, db).await,
    }
}

async fn serve(settings: Arc<Settings>, db: Database) -> anyhow::Result<()> {
    let cancellation_token = CancellationToken::new();

    let etl = Arc::new(Etl::new(&db, &settings)?);
    let cron_scheduler = CronScheduler::new(etl, settings.etl.interval_secs);

    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    let service = Arc::new(AprService::new(db.postgres.clone(), &settings.api));
    let api_token = cancellation_token.child_token();
    let bind = settings.api.bind.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = server::serve(service, &bind, api_token).await {
            error!("API server failed: {:#}", e);
        }
    });

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Service running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    cancellation_token.cancel();

    info!("Waiting for API server to stop...");
    let _ = api_handle.await;

    info!("Waiting for cron scheduler to stop...");
    let _ = cron_handle.await;

    info!("Shutdown complete");
    Ok(())
}
