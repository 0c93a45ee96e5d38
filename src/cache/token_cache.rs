use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::cache::resource_cache::ResourceCache;
use crate::cache::token::AccessToken;
use crate::cache::token_context::{RefreshWindow, TokenContext};
use crate::config::settings::TokenCacheSettings;
use crate::error::{ResourceError, Result};
use crate::helpers::time::instant_after;
use crate::observability::metrics::Metrics;
use crate::parameter::ParameterSet;
use crate::resilience::retry::RetrySettings;
use crate::sources::fetch::ResourceFetcher;
use crate::utils::constants::DEFAULT_TOKEN_CACHE_NAME;

/// Access token cache with proactive background refresh.
///
/// Readers call [`get`](Self::get). Once a token has been fetched they are
/// served from memory while a single background timer re-fetches the token
/// `lead_time` before it expires. A failed refresh keeps the old token and is
/// retried with exponential backoff; readers only see a failure when the held
/// token has expired and their own synchronous fetch fails as well.
///
/// Fetches go through a [`ResourceCache`], so a background refresh and a
/// reader's fallback fetch running at the same time share one fetch.
///
/// Clones share the same state. The background timer stops once the last
/// clone is dropped.
pub struct AccessTokenCache<F> {
    inner: Arc<Inner<F>>,
}

impl<F> Clone for AccessTokenCache<F> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

struct Inner<F> {
    name: String,
    cache: ResourceCache<AccessToken, RefreshWindow<F>>,
    parameters: ParameterSet,
    retry: RetrySettings,
    /// token, refresh instant and timer are only mutated under this lock
    state: Mutex<TokenState>,
    current: watch::Sender<Option<AccessToken>>,
    next_timer_id: AtomicU64,
    metrics: Option<Arc<Metrics>>,
}

struct TokenState {
    context: Option<TokenContext>,
    timer: Option<RefreshTimer>,
    refresh_enabled: bool,
    consecutive_failures: u32,
    last_error: Option<ResourceError>,
}

/// Handle of the single outstanding background refresh.
/// Dropping it cancels the timer unless it has already fired.
struct RefreshTimer {
    id: u64,
    fires_at: Instant,
    _cancel: oneshot::Sender<()>,
}

pub struct AccessTokenCacheBuilder<F> {
    fetcher: F,
    parameters: ParameterSet,
    settings: TokenCacheSettings,
    name: String,
    metrics: Option<Arc<Metrics>>,
}

impl<F> AccessTokenCacheBuilder<F>
where
    F: ResourceFetcher<AccessToken> + 'static,
{
    pub fn settings(mut self, settings: &TokenCacheSettings) -> Self {
        self.settings = settings.clone();
        self
    }

    /// Name used in logs and as the `cache` metric label.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> AccessTokenCache<F> {
        let mut cache = ResourceCache::new(RefreshWindow::new(self.fetcher, self.settings.lead_time()))
            .with_name(self.name.clone());
        if let Some(metrics) = &self.metrics {
            cache = cache.with_metrics(metrics.clone());
        }
        let (current, _) = watch::channel(None);

        AccessTokenCache {
            inner: Arc::new(Inner {
                name: self.name,
                cache,
                parameters: self.parameters,
                retry: RetrySettings::from(&self.settings.retry),
                state: Mutex::new(TokenState {
                    context: None,
                    timer: None,
                    refresh_enabled: true,
                    consecutive_failures: 0,
                    last_error: None,
                }),
                current,
                next_timer_id: AtomicU64::new(0),
                metrics: self.metrics,
            }),
        }
    }
}

impl<F> AccessTokenCache<F>
where
    F: ResourceFetcher<AccessToken> + 'static,
{
    /// Cache for the token described by `parameters`, background refresh enabled.
    pub fn new(fetcher: F, parameters: ParameterSet, settings: &TokenCacheSettings) -> Self {
        Self::builder(fetcher, parameters).settings(settings).build()
    }

    pub fn builder(fetcher: F, parameters: ParameterSet) -> AccessTokenCacheBuilder<F> {
        AccessTokenCacheBuilder {
            fetcher,
            parameters,
            settings: TokenCacheSettings::default(),
            name: DEFAULT_TOKEN_CACHE_NAME.to_string(),
            metrics: None,
        }
    }

    /// Current token. Returns immediately while the held token has not expired;
    /// otherwise fetches one synchronously and arms the background refresh.
    pub async fn get(&self) -> Result<AccessToken> {
        let mut state = self.inner.state.lock().await;
        if let Some(context) = &state.context {
            if !context.should_remove() {
                return Ok(context.token.clone());
            }
            warn!(cache = %self.inner.name, "held token expired before it was refreshed, fetching synchronously");
        }
        self.inner.fetch_now(&mut state).await
    }

    /// Latest unexpired token without waiting on locks or the network.
    pub fn current(&self) -> Option<AccessToken> {
        self.inner
            .current
            .borrow()
            .as_ref()
            .filter(|token| !token.is_expired())
            .cloned()
    }

    /// Receives every token installed by a fetch or a refresh.
    pub fn subscribe(&self) -> watch::Receiver<Option<AccessToken>> {
        self.inner.current.subscribe()
    }

    /// Enables background refresh and arms the timer for the held token.
    pub async fn start(&self) {
        let mut state = self.inner.state.lock().await;
        state.refresh_enabled = true;
        if state.timer.is_some() {
            return;
        }
        if let Some(refresh_at) = state
            .context
            .as_ref()
            .filter(|context| !context.should_remove())
            .map(|context| context.refresh_at)
        {
            self.inner.arm(&mut state, refresh_at);
        }
        info!(cache = %self.inner.name, "background refresh started");
    }

    /// Disables background refresh and cancels the outstanding timer. A refresh
    /// already fetching completes, but its token is discarded. Readers keep
    /// working through synchronous fetches.
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        state.refresh_enabled = false;
        state.timer = None;
        info!(cache = %self.inner.name, "background refresh stopped");
    }

    pub async fn is_refresh_scheduled(&self) -> bool {
        self.inner.state.lock().await.timer.is_some()
    }

    pub async fn next_refresh_at(&self) -> Option<Instant> {
        self.inner.state.lock().await.timer.as_ref().map(|timer| timer.fires_at)
    }

    /// Error of the most recent failed background refresh, cleared by the next
    /// successful fetch.
    pub async fn last_refresh_error(&self) -> Option<ResourceError> {
        self.inner.state.lock().await.last_error.clone()
    }

    pub async fn consecutive_refresh_failures(&self) -> u32 {
        self.inner.state.lock().await.consecutive_failures
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.inner.parameters
    }
}

impl<F> Inner<F>
where
    F: ResourceFetcher<AccessToken> + 'static,
{
    async fn fetch_now(self: &Arc<Self>, state: &mut TokenState) -> Result<AccessToken> {
        let resource = self.cache.request(&self.parameters).await?;
        let context = TokenContext::from_resource(&resource);
        let token = context.token.clone();
        self.install(state, context);
        Ok(token)
    }

    fn install(self: &Arc<Self>, state: &mut TokenState, context: TokenContext) {
        let refresh_at = context.refresh_at;
        self.current.send_replace(Some(context.token.clone()));
        state.context = Some(context);
        state.consecutive_failures = 0;
        state.last_error = None;
        self.set_failures_gauge(0);
        self.arm(state, refresh_at);
    }

    /// Replaces the outstanding timer, if any, with one firing at `at`.
    fn arm(self: &Arc<Self>, state: &mut TokenState, at: Instant) {
        if !state.refresh_enabled {
            return;
        }
        let id = self.next_timer_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = oneshot::channel();
        tokio::spawn(run_timer(Arc::downgrade(self), id, at, cancelled));
        state.timer = Some(RefreshTimer { id, fires_at: at, _cancel: cancel });
        debug!(cache = %self.name, timer = id, "refresh scheduled in {:?}", at.saturating_duration_since(Instant::now()));
    }

    async fn refresh(self: &Arc<Self>, timer_id: u64) {
        if let Some(metrics) = &self.metrics {
            metrics.token_refreshes.with_label_values(&[self.name.as_str()]).inc();
        }
        let outcome = self.cache.request(&self.parameters).await;

        let mut state = self.state.lock().await;
        if state.timer.as_ref().map(|timer| timer.id) != Some(timer_id) {
            debug!(cache = %self.name, timer = timer_id, "timer was cancelled while refreshing, discarding result");
            return;
        }
        state.timer = None;

        match outcome {
            Ok(resource) => {
                info!(cache = %self.name, "token refreshed in background");
                self.install(&mut state, TokenContext::from_resource(&resource));
            }
            Err(err) => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                state.last_error = Some(err.clone());
                if let Some(metrics) = &self.metrics {
                    metrics.token_refresh_failures.with_label_values(&[self.name.as_str()]).inc();
                }
                self.set_failures_gauge(state.consecutive_failures);

                let token_usable = state
                    .context
                    .as_ref()
                    .is_some_and(|context| !context.should_remove());
                if err.is_configuration() || !token_usable {
                    warn!(cache = %self.name, "background refresh failed, next read fetches synchronously: {}", err);
                    return;
                }
                let delay = self.retry.delay_for_attempt(state.consecutive_failures);
                warn!(
                    cache = %self.name,
                    failures = state.consecutive_failures,
                    "background refresh failed, keeping current token and retrying in {:?}: {}",
                    delay,
                    err
                );
                self.arm(&mut state, instant_after(delay));
            }
        }
    }

    fn set_failures_gauge(&self, failures: u32) {
        if let Some(metrics) = &self.metrics {
            metrics
                .token_refresh_consecutive_failures
                .with_label_values(&[self.name.as_str()])
                .set(i64::from(failures));
        }
    }
}

async fn run_timer<F>(inner: Weak<Inner<F>>, id: u64, at: Instant, cancelled: oneshot::Receiver<()>)
where
    F: ResourceFetcher<AccessToken> + 'static,
{
    tokio::select! {
        _ = sleep_until(at) => {}
        _ = cancelled => return,
    }
    // cache dropped while sleeping
    let Some(inner) = inner.upgrade() else {
        return;
    };
    inner.refresh(id).await;
}
