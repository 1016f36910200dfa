//! `sdrelay-worker` -- Stable Diffusion job relay.
//!
//! Reads job messages (one JSON object per line) from stdin, runs each
//! against the Stable Diffusion backend, and streams progress and results
//! to the main server over a persistent WebSocket.
//!
//! See [`WorkerConfig::from_env`] for the environment variables.

use std::sync::Arc;

use sdrelay_callback::manager::ChannelManager;
use sdrelay_sdapi::api::SdApi;
use sdrelay_worker::config::WorkerConfig;
use sdrelay_worker::consumer::QueueConsumer;
use sdrelay_worker::logging;
use sdrelay_worker::processor::TaskProcessor;
use sdrelay_worker::source;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();
    let log_format = config
        .as_ref()
        .map(|c| c.log_format)
        .unwrap_or_default();
    let log_dir = config.as_ref().ok().and_then(|c| c.log_dir.clone());

    let _log_guard = match logging::init(log_format, log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            // No files were opened; fall back to console output to report it.
            let _console = logging::init(log_format, None);
            tracing::error!(error = %e, dir = ?log_dir, "Cannot create log directory");
            std::process::exit(1);
        }
    };

    let config = config.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        sd_url = %config.sd_base_url(),
        callback_url = %config.callback_url(),
        encoding = %config.frame_encoding,
        max_in_flight = config.max_in_flight,
        log_dir = ?config.log_dir,
        "Starting sdrelay-worker",
    );

    let channel = Arc::new(ChannelManager::new(config.channel_config()));
    spawn_event_logger(&channel);

    let backend = Arc::new(SdApi::new(config.sd_base_url()));
    let processor = TaskProcessor::new(backend, Arc::clone(&channel), config.progress_interval);
    let consumer = Arc::new(QueueConsumer::new(processor, config.app_key.clone()));

    let cancel = CancellationToken::new();
    tokio::spawn(watch_signals(cancel.clone()));

    let messages = source::spawn_stdin_reader();
    consumer.run(messages, config.max_in_flight, cancel).await;

    channel.shutdown().await;
    tracing::info!("sdrelay-worker stopped");
}

/// Log channel lifecycle events at debug level.
fn spawn_event_logger(channel: &ChannelManager) {
    let mut events = channel.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!(?event, "Callback channel event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Callback channel events dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Cancel `cancel` on SIGINT or SIGTERM.
async fn watch_signals(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }

    cancel.cancel();
}
