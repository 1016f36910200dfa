//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use sdrelay_callback::frame::FrameEncoding;
use sdrelay_callback::manager::ChannelConfig;
use sdrelay_core::crypto;

/// Path of the callback endpoint on the main server.
pub const CALLBACK_PATH: &str = "sd-callback";

const DEFAULT_SD_HOST: &str = "http://127.0.0.1";
const DEFAULT_SD_PORT: u16 = 7860;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_IN_FLIGHT: usize = 1;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Everything the worker needs at startup.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base64 AES key used to encrypt task ids. Validated on load.
    pub app_key: String,
    /// Backend scheme and host, e.g. `http://127.0.0.1`.
    pub sd_host: String,
    pub sd_port: u16,
    /// Main server scheme and host, e.g. `ws://main.internal`.
    pub main_ws_host: String,
    pub main_port: u16,
    /// Callback channel read deadline, extended by every ping.
    pub read_timeout: Duration,
    /// Time between progress polls.
    pub progress_interval: Duration,
    pub frame_encoding: FrameEncoding,
    /// Jobs processed concurrently.
    pub max_in_flight: usize,
    pub log_format: LogFormat,
    /// Directory for the warning and error log files. Console only when unset.
    pub log_dir: Option<PathBuf>,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                      | Required | Default             |
    /// |------------------------------|----------|---------------------|
    /// | `APP_KEY`                    | yes      | --                  |
    /// | `SD_HOST`                    | no       | `http://127.0.0.1`  |
    /// | `SD_PORT`                    | no       | `7860`              |
    /// | `MAIN_WS_HOST`               | yes      | --                  |
    /// | `MAIN_PORT`                  | yes      | --                  |
    /// | `CALLBACK_READ_TIMEOUT_SECS` | no       | `60`                |
    /// | `PROGRESS_INTERVAL_MS`       | no       | `1000`              |
    /// | `CALLBACK_FRAME_ENCODING`    | no       | `quoted`            |
    /// | `MAX_IN_FLIGHT`              | no       | `1`                 |
    /// | `LOG_FORMAT`                 | no       | `pretty`            |
    /// | `LOG_DIR`                    | no       | unset (no files)    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

        let app_key = required("APP_KEY")?;
        crypto::validate_key(&app_key).map_err(|e| ConfigError::Invalid {
            name: "APP_KEY",
            reason: e.to_string(),
        })?;

        let sd_host = var("SD_HOST").unwrap_or_else(|| DEFAULT_SD_HOST.into());
        let sd_port = parse_or(var("SD_PORT"), "SD_PORT", DEFAULT_SD_PORT)?;

        let main_ws_host = required("MAIN_WS_HOST")?;
        let main_port = parse_var(&required("MAIN_PORT")?, "MAIN_PORT")?;

        let read_timeout_secs = parse_or(
            var("CALLBACK_READ_TIMEOUT_SECS"),
            "CALLBACK_READ_TIMEOUT_SECS",
            DEFAULT_READ_TIMEOUT_SECS,
        )?;
        let progress_interval_ms = parse_or(
            var("PROGRESS_INTERVAL_MS"),
            "PROGRESS_INTERVAL_MS",
            DEFAULT_PROGRESS_INTERVAL_MS,
        )?;
        if progress_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "PROGRESS_INTERVAL_MS",
                reason: "must be greater than zero".into(),
            });
        }

        let frame_encoding = parse_or(
            var("CALLBACK_FRAME_ENCODING"),
            "CALLBACK_FRAME_ENCODING",
            FrameEncoding::default(),
        )?;

        let max_in_flight = parse_or(var("MAX_IN_FLIGHT"), "MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT)?;
        if max_in_flight == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_IN_FLIGHT",
                reason: "must be at least 1".into(),
            });
        }

        let log_format = match var("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    reason: format!("expected 'pretty' or 'json', got '{other}'"),
                })
            }
        };

        let log_dir = var("LOG_DIR").map(|dir| PathBuf::from(dir.trim()));

        Ok(Self {
            app_key,
            sd_host,
            sd_port,
            main_ws_host,
            main_port,
            read_timeout: Duration::from_secs(read_timeout_secs),
            progress_interval: Duration::from_millis(progress_interval_ms),
            frame_encoding,
            max_in_flight,
            log_format,
            log_dir,
        })
    }

    /// Backend base URL, e.g. `http://127.0.0.1:7860`.
    pub fn sd_base_url(&self) -> String {
        format!("{}:{}", self.sd_host.trim_end_matches('/'), self.sd_port)
    }

    /// Callback endpoint URL, e.g. `ws://main.internal:8080/sd-callback`.
    pub fn callback_url(&self) -> String {
        format!(
            "{}:{}/{CALLBACK_PATH}",
            self.main_ws_host.trim_end_matches('/'),
            self.main_port
        )
    }

    /// Callback channel settings derived from this configuration.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig::new(self.callback_url())
            .with_read_timeout(self.read_timeout)
            .with_encoding(self.frame_encoding)
    }
}

fn parse_var<T>(raw: &str, name: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn parse_or<T>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => parse_var(&raw, name),
        None => Ok(default),
    }
}

/// Startup configuration errors. The worker refuses to start on any of
/// these.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}
