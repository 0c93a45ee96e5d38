//! Subscriber setup for applications embedding the caches.
//! The caches themselves only emit `tracing` events.

use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::settings::{LogFormat, LoggingConfig, Settings};

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    TRACE,
    DEBUG,
    INFO,
    WARN,
    ERROR,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match *self {
            LogLevel::TRACE => "TRACE",
            LogLevel::DEBUG => "DEBUG",
            LogLevel::INFO => "INFO",
            LogLevel::WARN => "WARN",
            LogLevel::ERROR => "ERROR",
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::TRACE => LevelFilter::TRACE,
            LogLevel::DEBUG => LevelFilter::DEBUG,
            LogLevel::INFO => LevelFilter::INFO,
            LogLevel::WARN => LevelFilter::WARN,
            LogLevel::ERROR => LevelFilter::ERROR,
        }
    }
}

/// Installs the global subscriber described by `settings.logging`;
/// `level_override` wins over the configured level.
/// Returns false when another subscriber was installed first.
pub fn run(settings: &Settings, level_override: Option<LogLevel>) -> bool {
    let level = match level_override {
        Some(level) => level.as_str().to_string(),
        None => settings.logging.level.clone(),
    };
    init_logging(&LoggingConfig::new(level, settings.logging.format.clone()))
}

/// `level` accepts plain levels as well as `EnvFilter` directives such as
/// `resource_cache=debug,reqwest=warn`.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_logging(cfg: &LoggingConfig) -> bool {
    let registry = tracing_subscriber::registry().with(env_filter(&cfg.level));

    let installed = match cfg.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_timer(UtcTime::rfc_3339())
                    .flatten_event(true) // CRI log parsers expect top-level fields
                    .with_ansi(false),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_timer(UtcTime::rfc_3339())
                    .with_target(true),
            )
            .try_init(),
    };
    installed.is_ok()
}
