use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use tokio::time::Instant;

use crate::helpers::time::{instant_after, instant_from_unix, remaining};
use crate::resource::Resource;

/// Short-lived bearer token and the instant it stops being accepted.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct JwtClaims {
    exp: i64,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: Instant) -> Self {
        Self { value: value.into(), expires_at }
    }

    /// Lifetimes above one year are clamped.
    pub fn expiring_in(value: impl Into<String>, lifetime: Duration) -> Self {
        Self::new(value, instant_after(lifetime))
    }

    pub fn from_unix_expiry(value: impl Into<String>, exp_unix_ts: i64) -> Self {
        Self::new(value, instant_from_unix(exp_unix_ts))
    }

    /// Reads the expiry from the `exp` claim of a JWT. The signature is not verified.
    pub fn from_jwt(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let payload = value
            .split('.')
            .nth(1)
            .ok_or_else(|| anyhow!("token is not a JWT: missing payload segment"))?;
        let decoded = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .context("JWT payload is not valid base64url")?;
        let claims: JwtClaims =
            serde_json::from_slice(&decoded).context("JWT payload has no numeric 'exp' claim")?;
        Ok(Self::from_unix_expiry(value, claims.exp))
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn expires_in(&self) -> Duration {
        remaining(self.expires_at)
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Sensitive resource valid until the token's hard expiry.
    pub fn into_resource(self) -> Resource<AccessToken> {
        let expires_at = self.expires_at;
        Resource::expiring(self, expires_at, true)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"****")
            .field("expires_in", &self.expires_in())
            .finish()
    }
}
