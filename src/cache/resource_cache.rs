use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ResourceError, Result};
use crate::observability::metrics::{Metrics, OUTCOME_HIT, OUTCOME_JOINED, OUTCOME_MISS};
use crate::parameter::ParameterSet;
use crate::resource::Resource;
use crate::sources::fetch::ResourceFetcher;
use crate::utils::constants::DEFAULT_RESOURCE_CACHE_NAME;

type SharedFetch<T> = Shared<BoxFuture<'static, Result<Resource<T>>>>;

/// Per-key cache entry.
enum Slot<T> {
    /// Most recent successfully fetched resource. May have become invalid since.
    Ready(Resource<T>),
    /// A fetch round is running; callers join it by awaiting the shared future.
    InFlight { round: u64, fetch: SharedFetch<T> },
}

/// Keyed cache with single-flight fetches.
///
/// Decorates any [`ResourceFetcher`] and memoizes its resources by
/// [`ParameterSet`]:
/// - a cached resource is served while its own `is_valid()` holds, otherwise
///   the next request refetches it;
/// - concurrent requests for a key share one fetch round and all observe the
///   same outcome;
/// - failures reach every caller of the round but are never cached.
///
/// The table lock is only held for map operations, never across a fetch, so
/// distinct keys are fetched in parallel.
pub struct ResourceCache<T, F> {
    name: String,
    fetcher: Arc<F>,
    entries: RwLock<HashMap<ParameterSet, Slot<T>>>,
    next_round: AtomicU64,
    metrics: Option<Arc<Metrics>>,
}

impl<T, F> ResourceCache<T, F>
where
    T: Send + Sync + 'static,
    F: ResourceFetcher<T> + 'static,
{
    pub fn new(fetcher: F) -> Self {
        Self {
            name: DEFAULT_RESOURCE_CACHE_NAME.to_string(),
            fetcher: Arc::new(fetcher),
            entries: RwLock::new(HashMap::new()),
            next_round: AtomicU64::new(0),
            metrics: None,
        }
    }

    /// Name used in logs and as the `cache` metric label.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Returns the cached resource for `parameters` or fetches it exactly once
    /// for every caller currently waiting on this key.
    pub async fn request(&self, parameters: &ParameterSet) -> Result<Resource<T>> {
        // fast path: valid value or a running round to join
        let joined = {
            let entries = self.entries.read().await;
            match entries.get(parameters) {
                Some(Slot::Ready(resource)) if resource.is_valid() => {
                    self.record_request(OUTCOME_HIT);
                    debug!(cache = %self.name, "cache hit for {}", parameters);
                    return Ok(resource.clone());
                }
                Some(Slot::InFlight { round, fetch }) if fetch.peek().is_none() => {
                    Some((*round, fetch.clone()))
                }
                _ => None,
            }
        };

        let (round, fetch) = match joined {
            Some((round, fetch)) => {
                self.record_request(OUTCOME_JOINED);
                debug!(cache = %self.name, round, "joined in-flight fetch for {}", parameters);
                (round, fetch)
            }
            None => {
                let mut entries = self.entries.write().await;
                // finished round whose callers were all cancelled before settling
                if let Some(resource) = unsettled_success(entries.get(parameters)) {
                    self.record_request(OUTCOME_HIT);
                    entries.insert(parameters.clone(), Slot::Ready(resource.clone()));
                    return Ok(resource);
                }
                match entries.get(parameters) {
                    Some(Slot::Ready(resource)) if resource.is_valid() => {
                        self.record_request(OUTCOME_HIT);
                        return Ok(resource.clone());
                    }
                    Some(Slot::InFlight { round, fetch }) if fetch.peek().is_none() => {
                        self.record_request(OUTCOME_JOINED);
                        (*round, fetch.clone())
                    }
                    // absent, invalid, or a finished round that failed
                    _ => {
                        self.record_request(OUTCOME_MISS);
                        let round = self.next_round.fetch_add(1, Ordering::Relaxed);
                        let fetch = self.start_round(parameters.clone());
                        entries.insert(
                            parameters.clone(),
                            Slot::InFlight { round, fetch: fetch.clone() },
                        );
                        (round, fetch)
                    }
                }
            }
        };

        let outcome = fetch.await;
        self.settle(parameters, round, &outcome).await;
        outcome
    }

    /// Number of keys with a cached value or an in-flight fetch.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn start_round(&self, parameters: ParameterSet) -> SharedFetch<T> {
        let fetcher = self.fetcher.clone();
        let metrics = self.metrics.clone();
        let name = self.name.clone();
        async move {
            info!(cache = %name, "fetching resource for {}", parameters);
            let start = Instant::now();
            if let Some(metrics) = &metrics {
                metrics.resource_fetches.with_label_values(&[name.as_str()]).inc();
            }
            // a panicking fetcher fails the round instead of poisoning the key
            let outcome = match AssertUnwindSafe(async { fetcher.fetch(&parameters).await })
                .catch_unwind()
                .await
            {
                Ok(result) => result.map_err(|err| classify(err, &parameters)),
                Err(payload) => Err(ResourceError::fetch(
                    parameters.to_string(),
                    anyhow!("fetcher panicked: {}", panic_message(payload.as_ref())),
                )),
            };
            if let Some(metrics) = &metrics {
                metrics
                    .resource_fetch_duration
                    .with_label_values(&[name.as_str()])
                    .observe(start.elapsed().as_secs_f64());
                if let Err(err) = &outcome {
                    metrics
                        .resource_fetch_failures
                        .with_label_values(&[name.as_str(), err.kind()])
                        .inc();
                }
            }
            if let Err(err) = &outcome {
                warn!(cache = %name, "fetch failed: {}", err);
            }
            outcome
        }
        .boxed()
        .shared()
    }

    /// Replaces the in-flight marker of `round` with its outcome. Every caller
    /// of the round settles; only the first still finds its own marker.
    async fn settle(&self, parameters: &ParameterSet, round: u64, outcome: &Result<Resource<T>>) {
        let mut entries = self.entries.write().await;
        let ours = matches!(
            entries.get(parameters),
            Some(Slot::InFlight { round: current, .. }) if *current == round
        );
        if !ours {
            return;
        }
        match outcome {
            Ok(resource) => {
                entries.insert(parameters.clone(), Slot::Ready(resource.clone()));
            }
            Err(_) => {
                entries.remove(parameters);
            }
        }
    }

    fn record_request(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics
                .resource_requests
                .with_label_values(&[self.name.as_str(), outcome])
                .inc();
        }
    }
}

fn unsettled_success<T>(slot: Option<&Slot<T>>) -> Option<Resource<T>> {
    match slot {
        Some(Slot::InFlight { fetch, .. }) => match fetch.peek() {
            Some(Ok(resource)) if resource.is_valid() => Some(resource.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Configuration errors raised by a fetcher keep their kind; everything else
/// becomes a fetch failure tagged with the redacted parameter set.
fn classify(err: anyhow::Error, parameters: &ParameterSet) -> ResourceError {
    match err.downcast::<ResourceError>() {
        Ok(err) => err,
        Err(err) => ResourceError::fetch(parameters.to_string(), err),
    }
}

/// A cache is itself a fetcher, so caching composes with anything that
/// accepts one.
impl<T, F> ResourceFetcher<T> for ResourceCache<T, F>
where
    T: Send + Sync + 'static,
    F: ResourceFetcher<T> + 'static,
{
    async fn fetch(&self, parameters: &ParameterSet) -> anyhow::Result<Resource<T>> {
        Ok(self.request(parameters).await?)
    }
}
