//! buffer-send - Background daemon for scheduled publishing
//!
//! Sweeps the post store at a fixed interval and publishes every post that
//! is due, plus every failed post whose retry backoff has elapsed.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use libsocialbuffer::logging::{LogFormat, LoggingConfig};
use libsocialbuffer::{BufferError, BufferService, Config};
use tokio::time::{sleep, Duration};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "buffer-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled publishing")]
#[command(long_about = "\
buffer-send - Background daemon for scheduled publishing

DESCRIPTION:
    buffer-send sweeps the SocialBuffer post store at a fixed interval.
    Scheduled posts whose time has come are claimed and published to
    every target account; failed posts are tried again once their retry
    backoff has elapsed. Several daemons may share one database: a post
    is only ever claimed by one of them.

USAGE:
    # Run in foreground (logs to stderr)
    buffer-send

    # Sweep every 30 seconds
    buffer-send --poll-interval 30

    # Sweep once, print the report as JSON and exit
    buffer-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current sweep)

CONFIGURATION:
    Configuration file: $SOCIALBUFFER_CONFIG or ~/.config/socialbuffer/config.toml
    Database location: ~/.local/share/socialbuffer/posts.db

    [scheduling]
    poll_interval_secs = 60   # seconds between sweeps
    batch_size = 50           # posts per sweep
    max_retries = 3           # attempts before a post fails for good

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime or configuration error
    3 - Invalid input
")]
struct Cli {
    /// Seconds between sweeps (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_name = "FORMAT", default_value = "text", env = "SOCIALBUFFER_LOG_FORMAT")]
    log_format: LogFormat,

    /// Sweep once, print the report and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    LoggingConfig::new(cli.log_format, "info".to_string(), cli.verbose).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<BufferError>()
                .map(BufferError::exit_code)
                .unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let service = BufferService::from_config(config)
        .await
        .context("Failed to start the publishing service")?;

    info!("buffer-send daemon starting");

    let poll_interval = cli
        .poll_interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| service.scheduler().poll_interval());
    info!(
        poll_interval_secs = poll_interval.as_secs(),
        success_policy = ?service.config().publishing.success_policy,
        max_retries = service.config().scheduling.max_retries,
        "Scheduler configured"
    );

    if cli.once {
        let report = service.scheduler().sweep(Utc::now()).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        info!("buffer-send: swept once, exiting");
    } else {
        let shutdown = Arc::new(AtomicBool::new(false));
        setup_signal_handlers(Arc::clone(&shutdown))?;
        run_daemon_loop(&service, poll_interval, shutdown).await;
    }

    info!("buffer-send daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Signal setup failed")?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });
    Ok(())
}

async fn run_daemon_loop(service: &BufferService, poll_interval: Duration, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        if let Err(e) = service.scheduler().sweep(Utc::now()).await {
            error!(error = %e, "Sweep failed");
        }

        // Sleep until the next sweep, checking for shutdown every second
        for _ in 0..poll_interval.as_secs().max(1) {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}
