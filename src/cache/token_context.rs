use std::time::Duration;

use tokio::time::Instant;

use anyhow::{bail, Result};

use crate::cache::token::AccessToken;
use crate::parameter::ParameterSet;
use crate::resource::{Resource, Validity};
use crate::sources::fetch::ResourceFetcher;

/// Token held by an access token cache together with its refresh instant.
#[derive(Debug, Clone)]
pub struct TokenContext {
    pub token: AccessToken,
    /// background refresh fires at this instant
    pub refresh_at: Instant,
}

impl TokenContext {
    pub fn new(token: AccessToken, refresh_at: Instant) -> Self {
        Self { token, refresh_at }
    }

    /// Context of a resource produced by [`RefreshWindow`]: its validity
    /// boundary is the refresh instant.
    pub fn from_resource(resource: &Resource<AccessToken>) -> Self {
        let token = resource.value().clone();
        let refresh_at = resource.expires_at().unwrap_or(token.expires_at());
        Self::new(token, refresh_at)
    }

    /// Check if token should be refreshed
    pub fn should_refresh(&self) -> bool {
        Instant::now() >= self.refresh_at
    }

    /// Check if token is expired and must not be served
    pub fn should_remove(&self) -> bool {
        self.token.is_expired()
    }
}

/// `expires_at - lead_time`; when the token does not outlive the lead time,
/// half of its remaining lifetime so a refresh never fires in a tight loop.
pub fn refresh_instant(now: Instant, expires_at: Instant, lead_time: Duration) -> Instant {
    let lifetime = expires_at.saturating_duration_since(now);
    if lifetime > lead_time {
        expires_at - lead_time
    } else {
        now + lifetime / 2
    }
}

/// Serves a token resource only until its refresh instant, so a refresh
/// through the keyed cache reaches the fetcher instead of the cached token.
pub fn until_refresh(resource: &Resource<AccessToken>, lead_time: Duration) -> Resource<AccessToken> {
    let refresh_at = refresh_instant(Instant::now(), resource.value().expires_at(), lead_time);
    resource.revalidated(Validity::ExpiresAt(refresh_at))
}

/// Fetcher decorator that shortens the validity of fetched tokens to their
/// refresh instant and rejects tokens that are already expired.
pub struct RefreshWindow<F> {
    fetcher: F,
    lead_time: Duration,
}

impl<F> RefreshWindow<F> {
    pub fn new(fetcher: F, lead_time: Duration) -> Self {
        Self { fetcher, lead_time }
    }

    pub fn lead_time(&self) -> Duration {
        self.lead_time
    }

    pub fn inner(&self) -> &F {
        &self.fetcher
    }
}

impl<F> ResourceFetcher<AccessToken> for RefreshWindow<F>
where
    F: ResourceFetcher<AccessToken>,
{
    async fn fetch(&self, parameters: &ParameterSet) -> Result<Resource<AccessToken>> {
        let resource = self.fetcher.fetch(parameters).await?;
        if resource.value().is_expired() {
            bail!("fetched token is already expired");
        }
        Ok(until_refresh(&resource, self.lead_time))
    }
}
