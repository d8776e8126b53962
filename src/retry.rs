//! Caller-driven retry for cache fetches
//!
//! The cache never retries on its own. Callers that want a retry policy
//! re-issue explicit revalidations through [`revalidate_with_retry`], or wrap
//! any async operation with [`with_retry`].

use crate::cache::KeyedAsyncCache;
use crate::error::FetchError;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff settings
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,

    pub initial_backoff: Duration,

    pub max_backoff: Duration,

    /// Growth factor between attempts
    pub multiplier: f64,

    /// Stretch each delay by up to 25%
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Short delays, for interactive reloads
    pub fn quick() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Delay before retry number `attempt` (zero based)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let exp = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let mut secs = exp.min(self.max_backoff.as_secs_f64());
        if self.jitter {
            secs *= 1.0 + jitter_fraction() * 0.25;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Value in `[0, 1)` taken from the clock's sub-second nanos
fn jitter_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos % 1000) / 1000.0
}

/// Whether a failed attempt is worth repeating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    /// Retry no sooner than the given delay (e.g. HTTP 429)
    RetryAfter(Duration),
    NoRetry,
}

/// Errors that know whether they are transient
pub trait RetryableError {
    fn retry_decision(&self) -> RetryDecision;
}

/// Run `operation` until it succeeds, fails permanently, or runs out of attempts
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + Display,
{
    let mut attempt = 0;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let backoff = match err.retry_decision() {
            RetryDecision::NoRetry => {
                debug!(operation = operation_name, attempt, "Not retrying: {}", err);
                return Err(err);
            }
            _ if attempt >= config.max_retries => {
                warn!(
                    operation = operation_name,
                    attempts = attempt + 1,
                    "Giving up: {}",
                    err
                );
                return Err(err);
            }
            RetryDecision::RetryAfter(delay) => delay.min(config.max_backoff),
            RetryDecision::Retry => config.backoff_duration(attempt),
        };

        warn!(
            operation = operation_name,
            attempt = attempt + 1,
            backoff_ms = backoff.as_millis() as u64,
            "Retrying after error: {}",
            err
        );
        sleep(backoff).await;
        attempt += 1;
    }
}

/// Revalidate `key` until the entry holds no error or the policy gives up
///
/// Each attempt is an ordinary [`KeyedAsyncCache::revalidate`], so it joins
/// any request already in flight and subscribers observe every outcome.
pub async fn revalidate_with_retry<K, T>(
    cache: &KeyedAsyncCache<K, T>,
    key: &K,
    config: &RetryConfig,
) -> Result<(), FetchError>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: PartialEq + Send + Sync + 'static,
{
    with_retry(config, "revalidate", || {
        let pending = cache.revalidate(key);
        async move {
            pending.await;
            match cache.snapshot(key).error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{fetcher_fn, CacheConfig, CacheKey, ResourceCache};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_duration() {
        let config = RetryConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            jitter: false,
            ..Default::default()
        };

        assert_eq!(config.backoff_duration(0), Duration::from_secs(1));
        assert_eq!(config.backoff_duration(1), Duration::from_secs(2));
        assert_eq!(config.backoff_duration(3), Duration::from_secs(8));
        assert_eq!(config.backoff_duration(5), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let config = RetryConfig {
            initial_backoff: Duration::from_secs(1),
            jitter: true,
            ..Default::default()
        };

        let backoff = config.backoff_duration(0);
        assert!(backoff >= Duration::from_secs(1));
        assert!(backoff <= Duration::from_millis(1250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_on_parse_error() {
        let mut attempts = 0;
        let result: Result<(), FetchError> = with_retry(&RetryConfig::quick(), "test", || {
            attempts += 1;
            async { Err(FetchError::Parse("bad json".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revalidate_with_retry_recovers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fetcher = fetcher_fn(move |_key: CacheKey| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(FetchError::Network("connection refused".into()))
                } else {
                    Ok(vec![n])
                }
            }
        });

        let cache: ResourceCache<Vec<usize>> = ResourceCache::new(CacheConfig::default());
        let key = CacheKey::new("/api/files");
        let _sub = cache.subscribe(key.clone(), fetcher, |_| {});

        let result = revalidate_with_retry(&cache, &key, &RetryConfig::quick()).await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.snapshot(&key).data.as_deref(), Some(&vec![2]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_revalidate_with_retry_gives_up() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fetcher = fetcher_fn(move |_key: CacheKey| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<Vec<usize>, _>(FetchError::Network("down".into())) }
        });

        let cache: ResourceCache<Vec<usize>> = ResourceCache::new(CacheConfig::default());
        let key = CacheKey::new("/api/users");
        let _sub = cache.subscribe(key.clone(), fetcher, |_| {});

        let config = RetryConfig {
            max_retries: 2,
            ..RetryConfig::quick()
        };
        let result = revalidate_with_retry(&cache, &key, &config).await;

        assert_eq!(result, Err(FetchError::Network("down".into())));
        // initial subscribe fetch is joined by the first attempt, then two retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
