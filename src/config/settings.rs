use std::time::Duration;

use serde::Deserialize;

use crate::utils::constants::{
    DEFAULT_LEAD_TIME_SECS, DEFAULT_METRICS_NAMESPACE, DEFAULT_RETRY_BASE_DELAY_MS,
    DEFAULT_RETRY_MAX_DELAY_MS,
};

/// ================================
/// Full cache configuration
/// ================================
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub token_cache: TokenCacheSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// ================================
/// Access token cache
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct TokenCacheSettings {
    /// refresh starts this many seconds before the token expires
    #[serde(default = "default_lead_time_seconds")]
    pub lead_time_seconds: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl TokenCacheSettings {
    pub fn new(lead_time: Duration, retry: RetryConfig) -> Self {
        Self { lead_time_seconds: lead_time.as_secs(), retry }
    }

    pub fn lead_time(&self) -> Duration {
        Duration::from_secs(self.lead_time_seconds)
    }
}

impl Default for TokenCacheSettings {
    fn default() -> Self {
        Self {
            lead_time_seconds: DEFAULT_LEAD_TIME_SECS,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// will be mutiply by 2 on every consecutive failure until max_delay_ms
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// invariant: >= base_delay_ms
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

/// ================================
/// Metrics
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default = "default_metrics_namespace")]
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { is_enabled: false, namespace: default_metrics_namespace() }
    }
}

/// ================================
/// Logging
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // allowed: trace, debug, info, warn, error
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl LoggingConfig {
    pub fn new(level: String, format: LogFormat) -> Self {
        Self { level, format }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new(default_log_level(), default_log_format())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

fn default_lead_time_seconds() -> u64 {
    DEFAULT_LEAD_TIME_SECS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_RETRY_MAX_DELAY_MS
}

fn default_metrics_namespace() -> String {
    DEFAULT_METRICS_NAMESPACE.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Compact
}
