use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info};

use crate::config::settings::{RetryConfig, Settings, TokenCacheSettings};
use crate::error::ResourceError;

/// Load and validate settings from a YAML file
pub async fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    let settings = parse_settings(&raw)?;
    info!("settings loaded from {}", path.display());
    Ok(settings)
}

/// Parse and validate settings from a YAML document
pub fn parse_settings(raw: &str) -> Result<Settings> {
    let settings: Settings =
        serde_yaml::from_str(raw).map_err(|e| anyhow!("Invalid settings format: {}", e))?;

    validate_settings(&settings).map_err(|errors| {
        ResourceError::configuration(errors.join("; "))
    })?;
    Ok(settings)
}

/// Returns Ok(()) or Err(Vec<String>) containing all issues.
pub fn validate_settings(settings: &Settings) -> Result<(), Vec<String>> {
    let mut errors: Vec<String> = Vec::new();

    validate_token_cache(&settings.token_cache, &mut errors);

    if settings.metrics.is_enabled && settings.metrics.namespace.trim().is_empty() {
        errors.push("metrics.namespace must not be empty when metrics are enabled".to_string());
    }

    match settings.logging.level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => errors.push(format!(
            "logging.level '{}' is invalid; allowed: trace, debug, info, warn, error",
            other
        )),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        for e in &errors {
            error!("settings validation: {}", e);
        }
        Err(errors)
    }
}

fn validate_token_cache(token_cache: &TokenCacheSettings, errors: &mut Vec<String>) {
    if token_cache.lead_time_seconds == 0 {
        errors.push("token_cache.lead_time_seconds must be > 0".to_string());
    }
    validate_retry(&token_cache.retry, errors);
}

fn validate_retry(retry: &RetryConfig, errors: &mut Vec<String>) {
    if retry.base_delay_ms == 0 {
        errors.push("token_cache.retry.base_delay_ms must be > 0".to_string());
    }
    if retry.max_delay_ms < retry.base_delay_ms {
        errors.push(format!(
            "token_cache.retry.max_delay_ms ({}) must be >= base_delay_ms ({})",
            retry.max_delay_ms, retry.base_delay_ms
        ));
    }
}
