//! Shared constants and invariants

pub const DEFAULT_LEAD_TIME_SECS: u64 = 60;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_METRICS_NAMESPACE: &str = "resource_cache";

// Longer token lifetimes are clamped (one year)
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 365 * 24 * 60 * 60;

// Cache names used as metric labels
pub const DEFAULT_RESOURCE_CACHE_NAME: &str = "resource";
pub const DEFAULT_TOKEN_CACHE_NAME: &str = "access_token";

// Token endpoint response fields
pub const DEFAULT_TOKEN_FIELD: &str = "access_token";
pub const DEFAULT_EXPIRES_IN_FIELD: &str = "expires_in";
