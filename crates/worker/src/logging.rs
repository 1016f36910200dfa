//! Logging setup for the worker binary.
//!
//! Console output always goes to stdout, pretty or JSON, filtered by
//! `RUST_LOG`. When a log directory is configured, warnings and errors are
//! also appended to two plain-text files in it:
//!
//! - `consumer.log`: job handling and backend calls
//! - `socket.log`: the callback channel
//!
//! Files are never rotated or truncated.

use std::fs;
use std::io;
use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LogFormat;

/// Job handling log file name.
pub const CONSUMER_LOG: &str = "consumer.log";
/// Callback channel log file name.
pub const SOCKET_LOG: &str = "socket.log";

const DEFAULT_FILTER: &str = "sdrelay_worker=info,sdrelay_callback=info,sdrelay_sdapi=info";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the file writers alive. Dropping it flushes and closes them.
pub struct LogGuard {
    _file_guards: Vec<WorkerGuard>,
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if `log_dir` cannot be created. Nothing is installed
/// in that case.
pub fn init(format: LogFormat, log_dir: Option<&Path>) -> io::Result<LogGuard> {
    let mut layers: Vec<BoxedLayer> = vec![console_layer(format)];
    let mut guards = Vec::new();

    if let Some(dir) = log_dir {
        fs::create_dir_all(dir)?;
        for (file, targets) in [(CONSUMER_LOG, consumer_targets()), (SOCKET_LOG, socket_targets())] {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file));
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(targets)
                    .boxed(),
            );
            guards.push(guard);
        }
    }

    tracing_subscriber::registry().with(layers).init();

    Ok(LogGuard {
        _file_guards: guards,
    })
}

fn console_layer(format: LogFormat) -> BoxedLayer {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer().with_filter(filter).boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_filter(filter)
            .boxed(),
    }
}

fn consumer_targets() -> Targets {
    Targets::new()
        .with_target("sdrelay_worker", Level::WARN)
        .with_target("sdrelay_sdapi", Level::WARN)
        .with_target("sdrelay_core", Level::WARN)
}

fn socket_targets() -> Targets {
    Targets::new().with_target("sdrelay_callback", Level::WARN)
}
