use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::utils::constants::MAX_TOKEN_LIFETIME_SECS;

pub fn now_i64() -> i64 {
    Utc::now().timestamp()
}

/// Maps a UNIX expiry timestamp onto the monotonic clock.
/// Timestamps in the past map to "now".
pub fn instant_from_unix(exp_unix_ts: i64) -> Instant {
    let remaining = exp_unix_ts.saturating_sub(now_i64()).max(0) as u64;
    instant_after(Duration::from_secs(remaining))
}

/// `now + lifetime`, with lifetimes capped at `MAX_TOKEN_LIFETIME_SECS`.
/// Lifetimes come from remote endpoints and must never overflow the clock.
pub fn instant_after(lifetime: Duration) -> Instant {
    let now = Instant::now();
    let lifetime = lifetime.min(Duration::from_secs(MAX_TOKEN_LIFETIME_SECS));
    now.checked_add(lifetime).unwrap_or(now)
}

/// Time left until `at`, zero once it has passed.
pub fn remaining(at: Instant) -> Duration {
    at.saturating_duration_since(Instant::now())
}
