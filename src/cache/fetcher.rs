//! Pluggable fetch functions

use crate::error::FetchError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Loads the value for a key
///
/// Implemented by the HTTP client for any JSON body, and by plain closures
/// through [`fetcher_fn`].
#[async_trait]
pub trait Fetcher<K, T>: Send + Sync {
    async fn fetch(&self, key: &K) -> Result<T, FetchError>;
}

/// Shared handle to a fetcher, as stored by the cache
pub type SharedFetcher<K, T> = Arc<dyn Fetcher<K, T>>;

/// Adapter turning an async closure into a [`Fetcher`]
pub struct FnFetcher<F>(F);

#[async_trait]
impl<K, T, F, Fut> Fetcher<K, T> for FnFetcher<F>
where
    K: Clone + Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, FetchError>> + Send,
{
    async fn fetch(&self, key: &K) -> Result<T, FetchError> {
        (self.0)(key.clone()).await
    }
}

/// Wrap an async closure as a shared fetcher
pub fn fetcher_fn<K, T, F, Fut>(f: F) -> SharedFetcher<K, T>
where
    K: Clone + Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    Arc::new(FnFetcher(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;

    #[tokio::test]
    async fn test_closure_fetcher() {
        let fetcher = fetcher_fn(|key: CacheKey| async move { Ok(key.as_str().len()) });
        assert_eq!(fetcher.fetch(&CacheKey::new("/api/files")).await, Ok(10));
    }

    #[tokio::test]
    async fn test_closure_fetcher_error() {
        let fetcher: SharedFetcher<CacheKey, ()> =
            fetcher_fn(|_key: CacheKey| async { Err(FetchError::Other("nope".into())) });
        assert_eq!(
            fetcher.fetch(&CacheKey::new("/x")).await,
            Err(FetchError::Other("nope".into()))
        );
    }
}
