use anyhow::{Context, Result};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tracing::info;

use crate::config::settings::MetricsConfig;

pub const OUTCOME_HIT: &str = "hit";
pub const OUTCOME_MISS: &str = "miss";
pub const OUTCOME_JOINED: &str = "joined";

/// Prometheus collectors shared by the caches of one application.
///
/// Each instance owns its registry; nothing is registered process-wide.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Keyed cache metrics
    pub resource_requests: IntCounterVec,
    pub resource_fetches: IntCounterVec,
    pub resource_fetch_failures: IntCounterVec,
    pub resource_fetch_duration: HistogramVec,

    // Token cache metrics
    pub token_refreshes: IntCounterVec,
    pub token_refresh_failures: IntCounterVec,
    pub token_refresh_consecutive_failures: IntGaugeVec,
}

impl Metrics {
    pub fn new(namespace: &str) -> Result<Arc<Self>> {
        let registry = Registry::new_custom(Some(namespace.to_owned()), None)
            .context("failed to create metrics registry")?;

        let metrics = Self {
            resource_requests: IntCounterVec::new(Opts::new("resource_requests_total", "Resource requests by outcome"), &["cache", "outcome"])?,
            resource_fetches: IntCounterVec::new(Opts::new("resource_fetches_total", "Underlying fetch invocations"), &["cache"])?,
            resource_fetch_failures: IntCounterVec::new(Opts::new("resource_fetch_failures_total", "Fetch failures by kind"), &["cache", "kind"])?,
            resource_fetch_duration: HistogramVec::new(HistogramOpts::new("resource_fetch_duration_seconds", "Fetch duration seconds").buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]), &["cache"])?,

            token_refreshes: IntCounterVec::new(Opts::new("token_refreshes_total", "Background token refresh attempts"), &["cache"])?,
            token_refresh_failures: IntCounterVec::new(Opts::new("token_refresh_failures_total", "Background token refresh failures"), &["cache"])?,
            token_refresh_consecutive_failures: IntGaugeVec::new(Opts::new("token_refresh_consecutive_failures", "Background refresh failures since the last success"), &["cache"])?,

            registry,
        };

        // Register all metrics in the registry
        let reg = &metrics.registry;
        reg.register(Box::new(metrics.resource_requests.clone()))?;
        reg.register(Box::new(metrics.resource_fetches.clone()))?;
        reg.register(Box::new(metrics.resource_fetch_failures.clone()))?;
        reg.register(Box::new(metrics.resource_fetch_duration.clone()))?;
        reg.register(Box::new(metrics.token_refreshes.clone()))?;
        reg.register(Box::new(metrics.token_refresh_failures.clone()))?;
        reg.register(Box::new(metrics.token_refresh_consecutive_failures.clone()))?;

        info!(namespace, "metrics registry initialized");
        Ok(Arc::new(metrics))
    }

    /// Builds a registry when metrics are enabled in the settings.
    pub fn from_config(config: &MetricsConfig) -> Result<Option<Arc<Self>>> {
        match config.is_enabled {
            true => Self::new(&config.namespace).map(Some),
            false => Ok(None),
        }
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode metrics")?;
        String::from_utf8(buffer).context("metrics are not valid utf-8")
    }
}
