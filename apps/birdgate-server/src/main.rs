//! Birdgate Server - standalone daemon that watches configured RTSP audio
//! streams, gates windows by cheap spectral energy, and forwards promising
//! windows to BirdNET for classification.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use birdgate_core::classifier::create_classifier;
use birdgate_core::config::Config;
use birdgate_core::log::create_window_log;
use birdgate_core::pipeline::StreamPipeline;
use birdgate_core::window::AudioWindow;
use clap::Parser;
use tokio::signal;
use tokio::sync::{mpsc, watch};

/// Birdgate Server - audio gating and filtering for BirdNET.
#[derive(Parser, Debug)]
#[command(name = "birdgate-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, value_name = "FILE", env = "BIRDGATE_CONFIG")]
    config: PathBuf,

    /// Enable verbose (debug) logging.
    #[arg(short, long)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace). Overrides `--verbose`.
    #[arg(short, long, env = "BIRDGATE_LOG_LEVEL")]
    log_level: Option<log::LevelFilter>,

    /// Site identifier, overriding the value in the config file.
    #[arg(long, env = "BIRDGATE_SITE_ID")]
    site_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args
        .log_level
        .unwrap_or(if args.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info });
    env_logger::Builder::new()
        .filter_level(log_level)
        .filter_module("reqwest", log::LevelFilter::Warn)
        .format_timestamp_millis()
        .init();

    log::info!("Birdgate Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match Config::load(&args.config) {
        Ok(config) => {
            log::info!("loaded configuration from {}", args.config.display());
            config
        }
        Err(e) => {
            log::error!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Some(site_id) = args.site_id {
        config.site_id = site_id;
    }

    if let Err(e) = run(config).await {
        log::error!("Birdgate error: {e}");
        std::process::exit(1);
    }

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);
    let classifier: Arc<dyn birdgate_core::classifier::Classifier> =
        Arc::from(create_classifier(&config.birdnet));
    let window_log: Arc<dyn birdgate_core::log::WindowLog> =
        Arc::from(create_window_log(&config.storage, &config.site_id).context("failed to open window log")?);

    log::info!(
        "starting Birdgate with {} stream(s) for site '{}'",
        config.streams.len(),
        config.site_id
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::with_capacity(config.streams.len() * 2);

    for stream_config in &config.streams {
        let stream_config = Arc::new(stream_config.clone());
        let (tx, mut rx) = mpsc::channel::<AudioWindow>(4);

        workers.push(tokio::spawn(birdgate_decoder::run(
            Arc::clone(&stream_config),
            config.reconnect_delay_seconds,
            config.max_reconnect_delay_seconds,
            tx,
            shutdown_rx.clone(),
        )));

        let pipeline = StreamPipeline::new(
            &stream_config,
            &config,
            Arc::clone(&classifier),
            Arc::clone(&window_log),
        );
        workers.push(tokio::spawn(async move {
            while let Some(window) = rx.recv().await {
                pipeline.process(window).await;
            }
        }));
    }

    shutdown_signal().await;
    log::info!("shutdown signal received, stopping streams...");
    let _ = shutdown_tx.send(true);

    let join_all = async {
        for worker in workers {
            if let Err(e) = worker.await {
                log::error!("stream worker task panicked: {e}");
            }
        }
    };
    if tokio::time::timeout(std::time::Duration::from_secs(10), join_all).await.is_err() {
        log::warn!("stream workers did not shut down within 10s");
    }

    log::info!("Birdgate stopped");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
