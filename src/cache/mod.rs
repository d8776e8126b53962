//! Client-side resource cache
//!
//! Keyed cache of async fetch results with request coalescing,
//! stale-while-revalidate reads and subscriber notification.
//!
//! # Lifecycle of an entry
//!
//! 1. Created by the first [`KeyedAsyncCache::subscribe`] for its key, which
//!    also starts the first fetch (`is_loading` until it settles).
//! 2. Resolved or errored. A failed fetch keeps earlier data.
//! 3. Revalidated on mount, on explicit calls, or by the
//!    [`RevalidationDriver`](crate::sync::RevalidationDriver) on interval,
//!    focus and reconnect. Requests in flight are joined, not duplicated.
//! 4. Evicted once it has had no subscribers for the grace period.
//!
//! # Example
//!
//! ```no_run
//! use speechsync::cache::{fetcher_fn, CacheConfig, CacheKey, ResourceCache};
//!
//! # async fn demo() {
//! let cache: ResourceCache<Vec<String>> = ResourceCache::new(CacheConfig::default());
//! let fetcher = fetcher_fn(|key: CacheKey| async move { Ok(vec![key.to_string()]) });
//!
//! let _sub = cache.subscribe(CacheKey::new("/api/files"), fetcher, |snapshot| {
//!     println!("loading={} data={:?}", snapshot.is_loading, snapshot.data);
//! });
//! cache.revalidate(&CacheKey::new("/api/files")).await;
//! # }
//! ```

mod fetcher;
mod key;
mod keyed;
mod snapshot;

pub use fetcher::{fetcher_fn, Fetcher, FnFetcher, SharedFetcher};
pub use key::CacheKey;
pub use keyed::{CacheConfig, KeyedAsyncCache, ResourceCache, Subscription, DEFAULT_GC_GRACE_PERIOD};
pub use snapshot::CacheSnapshot;
