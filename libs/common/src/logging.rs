//! Logging for fieldlink services
//!
//! Console output plus an optional daily-rolling file, both written as
//! `timestamp [LEVEL] message`. The filter can be replaced at runtime.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::{Error, Result};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter producing `2025-12-02T00:50:44.809Z [INFO] message`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.3fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// File writer guards live as long as the process
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

type EnvFilterReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;
static LOG_FILTER_HANDLE: OnceLock<EnvFilterReloadHandle> = OnceLock::new();
static CURRENT_LOG_LEVEL: OnceLock<Mutex<String>> = OnceLock::new();

/// Logger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Service name, used as the log file prefix
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Filter directive, e.g. `info` or `info,fieldlink_core=debug`
    #[serde(default = "default_level")]
    pub level: String,

    /// Write a daily-rolling file next to console output
    #[serde(default = "default_enable_file")]
    pub enable_file: bool,

    /// JSON lines in the log file
    #[serde(default)]
    pub enable_json: bool,
}

fn default_service_name() -> String {
    "linksrv".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_level() -> String {
    "info".to_string()
}

fn default_enable_file() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_dir: default_log_dir(),
            level: default_level(),
            enable_file: default_enable_file(),
            enable_json: false,
        }
    }
}

impl LogConfig {
    /// Effective filter; `RUST_LOG` wins over the configured level
    pub fn filter_spec(&self) -> String {
        std::env::var("RUST_LOG")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.level.clone())
    }

    /// Prefix of the rolling files: `{service}.log.YYYY-MM-DD`
    pub fn file_prefix(&self) -> String {
        format!("{}.log", self.service_name)
    }
}

/// Install the global subscriber
pub fn init_with_config(config: &LogConfig) -> Result<()> {
    let spec = config.filter_spec();
    let env_filter = EnvFilter::try_new(&spec)
        .map_err(|e| Error::Logging(format!("Invalid log filter '{}': {}", spec, e)))?;
    let (reload_filter, reload_handle) = reload::Layer::new(env_filter);

    let console_layer = fmt::layer()
        .with_ansi(true)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = if config.enable_file {
        std::fs::create_dir_all(&config.log_dir)?;
        let appender = rolling::daily(&config.log_dir, config.file_prefix());
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
        match guards.lock() {
            Ok(mut guards) => guards.push(guard),
            Err(poisoned) => poisoned.into_inner().push(guard),
        }

        Some(if config.enable_json {
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_target(true)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .event_format(BracketedLevelFormat)
                .boxed()
        })
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(reload_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    let _ = LOG_FILTER_HANDLE.set(reload_handle);
    let current = CURRENT_LOG_LEVEL.get_or_init(|| Mutex::new(String::new()));
    if let Ok(mut level) = current.lock() {
        *level = spec;
    }

    if config.enable_file {
        tracing::info!(
            "Logging: {} @ {}",
            config.service_name,
            config.log_dir.display()
        );
    }
    Ok(())
}

/// Replace the log filter at runtime
///
/// Accepts a level (`debug`) or a full directive (`info,fieldlink_core=trace`).
pub fn set_log_level(level: &str) -> Result<()> {
    let handle = LOG_FILTER_HANDLE
        .get()
        .ok_or_else(|| Error::Logging("Logging not initialized".to_string()))?;
    let filter = EnvFilter::try_new(level)
        .map_err(|e| Error::Logging(format!("Invalid log level '{}': {}", level, e)))?;
    handle
        .reload(filter)
        .map_err(|e| Error::Logging(format!("Failed to reload log filter: {}", e)))?;

    if let Some(current) = CURRENT_LOG_LEVEL.get() {
        if let Ok(mut guard) = current.lock() {
            *guard = level.to_string();
        }
    }
    tracing::info!("Log level changed to: {}", level);
    Ok(())
}

/// Current log filter, or `unknown` before initialisation
pub fn get_log_level() -> String {
    CURRENT_LOG_LEVEL
        .get()
        .and_then(|m| m.lock().ok())
        .map(|guard| guard.clone())
        .unwrap_or_else(|| "unknown".to_string())
}
