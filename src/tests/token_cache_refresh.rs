#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Semaphore;
    use tokio::time::{sleep_until, timeout, Instant};

    use crate::cache::token::AccessToken;
    use crate::cache::token_cache::AccessTokenCache;
    use crate::config::settings::{RetryConfig, TokenCacheSettings};
    use crate::observability::metrics::Metrics;
    use crate::parameter::ParameterSet;
    use crate::sources::fetch::fetch_fn;
    use crate::tests::common::{secret_params, ScriptedTokenFetcher};

    const SECOND: Duration = Duration::from_secs(1);

    fn settings(lead_time_secs: u64) -> TokenCacheSettings {
        TokenCacheSettings::new(
            Duration::from_secs(lead_time_secs),
            RetryConfig { base_delay_ms: 1000, max_delay_ms: 4000 },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_token_in_background_before_expiry() {
        let fetcher = ScriptedTokenFetcher::new(vec![Ok(("abc", 60)), Ok(("def", 60))]);
        let cache = AccessTokenCache::new(fetcher.clone(), secret_params("x"), &settings(10));
        let start = Instant::now();

        // cold fetch
        assert_eq!(cache.get().await.unwrap().value(), "abc");
        assert_eq!(cache.next_refresh_at().await, Some(start + 50 * SECOND));

        sleep_until(start + 49 * SECOND).await;
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.get().await.unwrap().value(), "abc");

        sleep_until(start + 55 * SECOND).await;
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(cache.get().await.unwrap().value(), "def");
        assert_eq!(cache.current().unwrap().value(), "def");
        assert_eq!(cache.next_refresh_at().await, Some(start + 100 * SECOND));
    }

    #[tokio::test(start_paused = true)]
    async fn readers_are_not_blocked_while_refresh_is_in_flight() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = {
            let calls = calls.clone();
            let gate = gate.clone();
            fetch_fn(move |_parameters: ParameterSet| {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                let gate = gate.clone();
                async move {
                    if call > 1 {
                        gate.acquire().await?.forget();
                        return Ok(AccessToken::expiring_in("def", 60 * SECOND).into_resource());
                    }
                    Ok::<_, anyhow::Error>(AccessToken::expiring_in("abc", 60 * SECOND).into_resource())
                }
            })
        };
        let cache = AccessTokenCache::new(fetcher, secret_params("x"), &settings(10));
        let start = Instant::now();
        cache.get().await.unwrap();

        // refresh fired at +50s and is stuck on the network
        sleep_until(start + 52 * SECOND).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let token = timeout(Duration::from_millis(1), cache.get())
            .await
            .expect("reader blocked behind background refresh")
            .unwrap();
        assert_eq!(token.value(), "abc");
        assert!(!token.is_expired());

        gate.add_permits(1);
        sleep_until(start + 53 * SECOND).await;
        assert_eq!(cache.get().await.unwrap().value(), "def");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reader_fetches_synchronously_when_refresh_is_stopped() {
        let fetcher = ScriptedTokenFetcher::new(vec![Ok(("abc", 60)), Ok(("def", 60))]);
        let cache = AccessTokenCache::new(fetcher.clone(), secret_params("x"), &settings(10));
        let start = Instant::now();

        cache.get().await.unwrap();
        assert!(cache.is_refresh_scheduled().await);
        cache.stop().await;
        assert!(!cache.is_refresh_scheduled().await);

        sleep_until(start + 55 * SECOND).await;
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.get().await.unwrap().value(), "abc");

        // past hard expiry: fallback fetch
        sleep_until(start + 61 * SECOND).await;
        assert!(cache.current().is_none());
        assert_eq!(cache.get().await.unwrap().value(), "def");
        assert_eq!(fetcher.calls(), 2);
        assert!(!cache.is_refresh_scheduled().await);
    }

    #[tokio::test(start_paused = true)]
    async fn start_rearms_the_refresh_timer() {
        let fetcher = ScriptedTokenFetcher::new(vec![Ok(("abc", 60)), Ok(("def", 60))]);
        let cache = AccessTokenCache::new(fetcher.clone(), secret_params("x"), &settings(10));
        let start = Instant::now();

        cache.get().await.unwrap();
        cache.stop().await;
        cache.start().await;
        assert_eq!(cache.next_refresh_at().await, Some(start + 50 * SECOND));

        sleep_until(start + 51 * SECOND).await;
        assert_eq!(cache.get().await.unwrap().value(), "def");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_token_and_retries_with_backoff() {
        let fetcher = ScriptedTokenFetcher::new(vec![
            Ok(("abc", 60)),
            Err("provider outage"),
            Err("provider outage"),
            Ok(("ghi", 60)),
        ]);
        let metrics = Metrics::new("token_retry").unwrap();
        let cache = AccessTokenCache::builder(fetcher.clone(), secret_params("x"))
            .settings(&settings(10))
            .name("warehouse")
            .metrics(metrics.clone())
            .build();
        let start = Instant::now();
        cache.get().await.unwrap();

        // failures at +50s and +51s, next retry at +53s
        sleep_until(start + 52 * SECOND).await;
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(cache.get().await.unwrap().value(), "abc");
        assert_eq!(cache.consecutive_refresh_failures().await, 2);
        let err = cache.last_refresh_error().await.expect("refresh error recorded");
        assert!(err.to_string().contains("provider outage"));
        assert_eq!(cache.next_refresh_at().await, Some(start + 53 * SECOND));
        assert_eq!(
            metrics.token_refresh_consecutive_failures.with_label_values(&["warehouse"]).get(),
            2
        );

        sleep_until(start + 54 * SECOND).await;
        assert_eq!(fetcher.calls(), 4);
        assert_eq!(cache.get().await.unwrap().value(), "ghi");
        assert!(cache.last_refresh_error().await.is_none());
        assert_eq!(cache.consecutive_refresh_failures().await, 0);
        assert_eq!(metrics.token_refreshes.with_label_values(&["warehouse"]).get(), 3);
        assert_eq!(metrics.token_refresh_failures.with_label_values(&["warehouse"]).get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_surfaces_only_after_token_expired() {
        let fetcher = ScriptedTokenFetcher::new(vec![Ok(("abc", 60))]);
        let cache = AccessTokenCache::new(fetcher.clone(), secret_params("x"), &settings(10));
        let start = Instant::now();
        cache.get().await.unwrap();

        sleep_until(start + 58 * SECOND).await;
        assert_eq!(cache.get().await.unwrap().value(), "abc");

        // retries at +50, +51, +53, +57 and +61; the last one finds the token expired
        sleep_until(start + 62 * SECOND).await;
        assert_eq!(fetcher.calls(), 6);
        assert!(!cache.is_refresh_scheduled().await);

        let err = cache.get().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(fetcher.calls(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_cold_readers_share_one_fetch() {
        let fetcher = ScriptedTokenFetcher::new(vec![Ok(("abc", 60)), Ok(("def", 60))]);
        let cache = AccessTokenCache::new(fetcher.clone(), secret_params("x"), &settings(10));

        let other = cache.clone();
        let (a, b) = tokio::join!(cache.get(), other.get());
        assert_eq!(a.unwrap().value(), "abc");
        assert_eq!(b.unwrap().value(), "abc");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_cache_cancels_the_timer() {
        let fetcher = ScriptedTokenFetcher::new(vec![Ok(("abc", 60)), Ok(("def", 60))]);
        let cache = AccessTokenCache::new(fetcher.clone(), secret_params("x"), &settings(10));
        let start = Instant::now();
        cache.get().await.unwrap();
        drop(cache);

        sleep_until(start + 70 * SECOND).await;
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_refreshed_tokens() {
        let fetcher = ScriptedTokenFetcher::new(vec![Ok(("abc", 60)), Ok(("def", 60))]);
        let cache = AccessTokenCache::new(fetcher, secret_params("x"), &settings(10));
        let mut updates = cache.subscribe();

        cache.get().await.unwrap();
        updates.changed().await.unwrap();
        assert_eq!(updates.borrow_and_update().as_ref().unwrap().value(), "abc");

        updates.changed().await.unwrap();
        assert_eq!(updates.borrow_and_update().as_ref().unwrap().value(), "def");
    }

    #[tokio::test(start_paused = true)]
    async fn short_lived_token_refreshes_at_half_lifetime() {
        let fetcher = ScriptedTokenFetcher::new(vec![Ok(("short", 8)), Ok(("next", 8))]);
        let cache = AccessTokenCache::new(fetcher.clone(), secret_params("x"), &settings(10));
        let start = Instant::now();

        cache.get().await.unwrap();
        assert_eq!(cache.next_refresh_at().await, Some(start + 4 * SECOND));

        sleep_until(start + 5 * SECOND).await;
        assert_eq!(cache.get().await.unwrap().value(), "next");
    }

    #[tokio::test(start_paused = true)]
    async fn already_expired_token_is_a_fetch_failure() {
        let fetcher = ScriptedTokenFetcher::new(vec![Ok(("stale", 0))]);
        let cache = AccessTokenCache::new(fetcher, secret_params("x"), &settings(10));

        let err = cache.get().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("already expired"), "{err}");
        assert!(!cache.is_refresh_scheduled().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_a_refresh_already_in_flight() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = {
            let calls = calls.clone();
            let gate = gate.clone();
            fetch_fn(move |_parameters: ParameterSet| {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                let gate = gate.clone();
                async move {
                    if call > 1 {
                        gate.acquire().await?.forget();
                        return Ok(AccessToken::expiring_in("def", 60 * SECOND).into_resource());
                    }
                    Ok::<_, anyhow::Error>(AccessToken::expiring_in("abc", 60 * SECOND).into_resource())
                }
            })
        };
        let cache = AccessTokenCache::new(fetcher, secret_params("x"), &settings(10));
        let mut updates = cache.subscribe();
        let start = Instant::now();
        cache.get().await.unwrap();
        updates.borrow_and_update();

        sleep_until(start + 52 * SECOND).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        cache.stop().await;

        gate.add_permits(1);
        sleep_until(start + 53 * SECOND).await;
        assert_eq!(cache.current().unwrap().value(), "abc");
        assert_eq!(cache.get().await.unwrap().value(), "abc");
        assert!(!cache.is_refresh_scheduled().await);
        assert!(!updates.has_changed().unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_refresh_is_retried_like_a_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = {
            let calls = calls.clone();
            fetch_fn(move |_parameters: ParameterSet| {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    match call {
                        1 => Ok::<_, anyhow::Error>(AccessToken::expiring_in("abc", 60 * SECOND).into_resource()),
                        2 => panic!("token decoder bug"),
                        _ => Ok(AccessToken::expiring_in("ghi", 60 * SECOND).into_resource()),
                    }
                }
            })
        };
        let cache = AccessTokenCache::new(fetcher, secret_params("x"), &settings(10));
        let start = Instant::now();
        cache.get().await.unwrap();

        // refresh at +50s panics, retry scheduled one second later
        sleep_until(start + 50 * SECOND + SECOND / 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get().await.unwrap().value(), "abc");
        assert_eq!(cache.consecutive_refresh_failures().await, 1);
        let err = cache.last_refresh_error().await.expect("panic recorded as refresh error");
        assert!(err.to_string().contains("token decoder bug"), "{err}");
        assert_eq!(cache.next_refresh_at().await, Some(start + 51 * SECOND));

        sleep_until(start + 52 * SECOND).await;
        assert_eq!(cache.get().await.unwrap().value(), "ghi");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
