//! Keyed async cache with request coalescing

use super::fetcher::SharedFetcher;
use super::snapshot::CacheSnapshot;
use super::CacheKey;
use crate::error::FetchError;
use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Default time an unobserved entry survives before eviction
pub const DEFAULT_GC_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Cache behavior settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an entry without subscribers is kept, so that a quick
    /// unsubscribe/resubscribe does not refetch
    pub gc_grace_period: Duration,

    /// Revalidate an entry that already holds data when a new subscriber attaches
    pub revalidate_on_mount: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            gc_grace_period: DEFAULT_GC_GRACE_PERIOD,
            revalidate_on_mount: true,
        }
    }
}

impl CacheConfig {
    pub fn with_gc_grace_period(mut self, grace: Duration) -> Self {
        self.gc_grace_period = grace;
        self
    }

    pub fn with_revalidate_on_mount(mut self, enabled: bool) -> Self {
        self.revalidate_on_mount = enabled;
        self
    }
}

type Listener<T> = Arc<dyn Fn(&CacheSnapshot<T>) + Send + Sync>;

/// A fetch that any number of callers can await; settles the entry when done
type Request = Shared<BoxFuture<'static, ()>>;

struct InFlight {
    seq: u64,
    request: Request,
    /// Task driving the request; absent when no runtime was available
    task: Option<AbortHandle>,
}

struct Entry<K, T> {
    data: Option<Arc<T>>,
    error: Option<FetchError>,
    last_fetched_at: Option<DateTime<Utc>>,
    in_flight: Option<InFlight>,
    fetcher: Option<SharedFetcher<K, T>>,
    /// Registration order is notification order
    subscribers: Vec<(u64, Listener<T>)>,
    /// Results of requests older than this are dropped
    accept_from: u64,
    applied_seq: u64,
    idle_since: Option<Instant>,
    /// Last state handed to subscribers
    published: CacheSnapshot<T>,
    /// Bumped on every publish; delivery never goes backwards
    version: u64,
    delivered: Arc<AtomicU64>,
}

impl<K, T> Entry<K, T> {
    fn new(accept_from: u64) -> Self {
        Self {
            data: None,
            error: None,
            last_fetched_at: None,
            in_flight: None,
            fetcher: None,
            subscribers: Vec::new(),
            accept_from,
            applied_seq: 0,
            idle_since: None,
            published: CacheSnapshot::default(),
            version: 0,
            delivered: Arc::new(AtomicU64::new(0)),
        }
    }

    fn snapshot(&self) -> CacheSnapshot<T> {
        CacheSnapshot {
            data: self.data.clone(),
            error: self.error.clone(),
            is_loading: self.data.is_none() && self.in_flight.is_some(),
            is_validating: self.in_flight.is_some(),
            last_fetched_at: self.last_fetched_at,
        }
    }

    /// Record the current state and return who must hear about it, if anything changed
    fn publish(&mut self) -> Option<Notification<T>> {
        let current = self.snapshot();
        if current.same_state(&self.published) {
            return None;
        }
        self.published = current.clone();
        self.version += 1;
        if self.subscribers.is_empty() {
            return None;
        }
        Some(Notification {
            listeners: self.subscribers.iter().map(|(_, l)| l.clone()).collect(),
            snapshot: current,
            version: self.version,
            delivered: self.delivered.clone(),
        })
    }

    fn is_collectable(&self, grace: Duration, now: Instant) -> bool {
        self.subscribers.is_empty()
            && self
                .idle_since
                .is_some_and(|since| now.saturating_duration_since(since) >= grace)
    }

    fn abort(mut self) {
        if let Some(task) = self.in_flight.take().and_then(|f| f.task) {
            task.abort();
        }
    }
}

/// Listener calls collected under the lock, delivered after releasing it
///
/// Two notifications for one entry may race to delivery. The older one is
/// dropped if the newer already went out.
struct Notification<T> {
    listeners: Vec<Listener<T>>,
    snapshot: CacheSnapshot<T>,
    version: u64,
    delivered: Arc<AtomicU64>,
}

impl<T> Notification<T> {
    fn deliver(self) {
        if self.delivered.fetch_max(self.version, Ordering::SeqCst) >= self.version {
            trace!(version = self.version, "Dropping outdated notification");
            return;
        }
        for listener in &self.listeners {
            listener(&self.snapshot);
        }
    }
}

fn deliver<T>(notification: Option<Notification<T>>) {
    if let Some(notification) = notification {
        notification.deliver();
    }
}

struct CacheState<K, T> {
    entries: HashMap<K, Entry<K, T>>,
    next_seq: u64,
    next_subscriber: u64,
    disposed: bool,
}

struct CacheInner<K, T> {
    config: CacheConfig,
    state: Mutex<CacheState<K, T>>,
}

impl<K, T> CacheInner<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: PartialEq + Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, CacheState<K, T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a request for `key` and mark it in flight
    ///
    /// Returns `None` when the entry is gone or has no fetcher (created by
    /// [`KeyedAsyncCache::mutate`] alone).
    fn start_fetch(self: &Arc<Self>, state: &mut CacheState<K, T>, key: &K) -> Option<Request> {
        state.next_seq += 1;
        let seq = state.next_seq;
        let entry = state.entries.get_mut(key)?;
        let fetcher = entry.fetcher.clone()?;

        let weak = Arc::downgrade(self);
        let fetch_key = key.clone();
        let request = async move {
            let result = match AssertUnwindSafe(fetcher.fetch(&fetch_key))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(key = ?fetch_key, seq, %message, "Fetcher panicked");
                    Err(FetchError::Other(format!("Fetcher panicked: {}", message)))
                }
            };
            if let Some(inner) = weak.upgrade() {
                inner.settle(&fetch_key, seq, result);
            }
        }
        .boxed()
        .shared();

        let task = match Handle::try_current() {
            Ok(handle) => Some(handle.spawn(request.clone()).abort_handle()),
            Err(_) => {
                warn!(?key, "No tokio runtime; fetch only progresses while awaited");
                None
            }
        };

        trace!(?key, seq, "Fetch started");
        entry.in_flight = Some(InFlight {
            seq,
            request: request.clone(),
            task,
        });
        Some(request)
    }

    /// Apply the outcome of request `seq` unless a newer one already won
    fn settle(&self, key: &K, seq: u64, result: Result<T, FetchError>) {
        let notification = {
            let mut state = self.lock();
            let Some(entry) = state.entries.get_mut(key) else {
                debug!(?key, seq, "Entry evicted before fetch settled");
                return;
            };

            if entry.in_flight.as_ref().is_some_and(|f| f.seq == seq) {
                entry.in_flight = None;
            }

            if seq < entry.accept_from || seq <= entry.applied_seq {
                debug!(?key, seq, "Discarding superseded fetch result");
            } else {
                entry.applied_seq = seq;
                match result {
                    Ok(value) => {
                        if entry.data.as_deref() != Some(&value) {
                            entry.data = Some(Arc::new(value));
                        }
                        entry.error = None;
                        entry.last_fetched_at = Some(Utc::now());
                        debug!(?key, seq, "Fetch resolved");
                    }
                    Err(err) => {
                        warn!(?key, seq, error = %err, "Fetch failed");
                        entry.error = Some(err);
                    }
                }
            }

            entry.publish()
        };

        deliver(notification);
    }

    fn remove_subscriber(self: &Arc<Self>, key: &K, id: u64) {
        let became_idle = {
            let mut state = self.lock();
            let Some(entry) = state.entries.get_mut(key) else {
                return;
            };
            entry.subscribers.retain(|(sid, _)| *sid != id);
            if entry.subscribers.is_empty() {
                entry.idle_since = Some(Instant::now());
                true
            } else {
                false
            }
        };

        if became_idle {
            trace!(?key, "Last subscriber left");
            self.schedule_collection(key.clone());
        }
    }

    fn schedule_collection(self: &Arc<Self>, key: K) {
        let Ok(handle) = Handle::try_current() else {
            debug!(?key, "No tokio runtime; entry waits for an explicit collect_garbage");
            return;
        };
        let grace = self.config.gc_grace_period;
        let weak = Arc::downgrade(self);
        handle.spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(inner) = weak.upgrade() {
                inner.collect_key(&key);
            }
        });
    }

    fn collect_key(&self, key: &K) -> bool {
        let mut state = self.lock();
        let now = Instant::now();
        let expired = state
            .entries
            .get(key)
            .is_some_and(|e| e.is_collectable(self.config.gc_grace_period, now));
        if expired {
            if let Some(entry) = state.entries.remove(key) {
                entry.abort();
            }
            debug!(?key, "Evicted idle cache entry");
        }
        expired
    }
}

/// Cache of async fetch results, keyed by `K`
///
/// Cloning is cheap and yields another handle to the same cache. Separate
/// [`KeyedAsyncCache::new`] calls never share state.
///
/// - Entries are created and fetched on first subscription.
/// - Concurrent subscribe/revalidate calls for a key share one request.
/// - Failures are recorded in the entry; previous data is kept.
/// - Entries without subscribers are evicted after the grace period.
///
/// Operations that start requests spawn them on the current tokio runtime.
pub struct KeyedAsyncCache<K, T> {
    inner: Arc<CacheInner<K, T>>,
}

/// Cache keyed by endpoint path
pub type ResourceCache<T> = KeyedAsyncCache<CacheKey, T>;

impl<K, T> Clone for KeyedAsyncCache<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, T> KeyedAsyncCache<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: PartialEq + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                state: Mutex::new(CacheState {
                    entries: HashMap::new(),
                    next_seq: 0,
                    next_subscriber: 0,
                    disposed: false,
                }),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Register interest in `key`
    ///
    /// Creates the entry and starts a fetch when the key is new. An existing
    /// in-flight request is joined rather than duplicated. `listener` is
    /// called with every subsequent state change, in registration order with
    /// the key's other subscribers. The fetcher replaces any fetcher the
    /// entry was registered with before.
    pub fn subscribe<F>(&self, key: K, fetcher: SharedFetcher<K, T>, listener: F) -> Subscription
    where
        F: Fn(&CacheSnapshot<T>) + Send + Sync + 'static,
    {
        let (id, notification) = {
            let mut state = self.inner.lock();
            if state.disposed {
                warn!(?key, "Subscribe on a disposed cache ignored");
                return Subscription::inert();
            }

            state.next_subscriber += 1;
            let id = state.next_subscriber;
            let accept_from = state.next_seq + 1;

            let mut created = false;
            let entry = state.entries.entry(key.clone()).or_insert_with(|| {
                created = true;
                Entry::new(accept_from)
            });
            entry.fetcher = Some(fetcher);
            entry.subscribers.push((id, Arc::new(listener)));
            entry.idle_since = None;

            let needs_fetch = entry.in_flight.is_none()
                && (created
                    || entry.last_fetched_at.is_none()
                    || self.inner.config.revalidate_on_mount);

            if created {
                debug!(?key, "Cache entry created");
            }
            if needs_fetch {
                self.inner.start_fetch(&mut state, &key);
            }

            let notification = state.entries.get_mut(&key).and_then(Entry::publish);
            (id, notification)
        };

        deliver(notification);

        let weak: Weak<CacheInner<K, T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_subscriber(&key, id);
            }
        })
    }

    /// Current state of `key`; an unknown key yields an empty snapshot
    pub fn snapshot(&self, key: &K) -> CacheSnapshot<T> {
        self.inner
            .lock()
            .entries
            .get(key)
            .map(Entry::snapshot)
            .unwrap_or_default()
    }

    /// Re-fetch `key`, joining the in-flight request if there is one
    ///
    /// The request starts before this returns; the future only waits for it
    /// to settle. Outcomes land in the entry, never in the future. Unknown
    /// keys resolve immediately.
    pub fn revalidate(&self, key: &K) -> BoxFuture<'static, ()> {
        let (request, notification) = {
            let mut state = self.inner.lock();
            if state.disposed {
                return future::ready(()).boxed();
            }
            let existing = match state.entries.get(key) {
                Some(entry) => entry.in_flight.as_ref().map(|f| f.request.clone()),
                None => {
                    trace!(?key, "Revalidate on unknown key ignored");
                    return future::ready(()).boxed();
                }
            };
            let request = match existing {
                Some(request) => {
                    trace!(?key, "Joining in-flight request");
                    Some(request)
                }
                None => self.inner.start_fetch(&mut state, key),
            };
            let notification = state.entries.get_mut(key).and_then(Entry::publish);
            (request, notification)
        };

        deliver(notification);
        await_request(request)
    }

    /// Start a new request even if one is in flight
    ///
    /// Results of every request started earlier for this key are dropped, so
    /// data fetched before the invalidation can never overwrite what comes
    /// after it.
    pub fn invalidate(&self, key: &K) -> BoxFuture<'static, ()> {
        let (request, notification) = {
            let mut state = self.inner.lock();
            if state.disposed || !state.entries.contains_key(key) {
                return future::ready(()).boxed();
            }
            let request = self.inner.start_fetch(&mut state, key);
            let notification = state.entries.get_mut(key).and_then(|entry| {
                if let Some(seq) = entry.in_flight.as_ref().map(|f| f.seq) {
                    entry.accept_from = seq;
                }
                entry.publish()
            });
            (request, notification)
        };

        debug!(?key, "Entry invalidated");
        deliver(notification);
        await_request(request)
    }

    /// Replace the cached value locally, without a network call
    ///
    /// Requests started before the mutation are superseded by it. Mutating an
    /// unknown key creates an unobserved entry that is collected like any other.
    ///
    /// `updater` runs without the cache lock held. If the entry changes while
    /// it runs (a fetch settles, another mutation lands) it is called again
    /// with the newer value, so no concurrent write is silently lost.
    pub fn mutate<F>(&self, key: &K, mut updater: F)
    where
        F: FnMut(Option<&T>) -> T,
    {
        let mut attempt = 0u32;
        let (notification, unobserved) = loop {
            let (current, seen_seq) = {
                let state = self.inner.lock();
                if state.disposed {
                    return;
                }
                match state.entries.get(key) {
                    Some(entry) => (entry.data.clone(), Some(entry.applied_seq)),
                    None => (None, None),
                }
            };

            let value = Arc::new(updater(current.as_deref()));
            attempt += 1;

            let mut state = self.inner.lock();
            if state.disposed {
                return;
            }
            let latest_seq = state.entries.get(key).map(|e| e.applied_seq);
            if latest_seq != seen_seq {
                trace!(?key, attempt, "Entry changed during mutate; recomputing");
                continue;
            }

            state.next_seq += 1;
            let seq = state.next_seq;
            let entry = state.entries.entry(key.clone()).or_insert_with(|| Entry::new(seq));
            entry.data = Some(value);
            entry.accept_from = seq;
            entry.applied_seq = seq;
            let unobserved = entry.subscribers.is_empty() && entry.idle_since.is_none();
            if unobserved {
                entry.idle_since = Some(Instant::now());
            }
            break (entry.publish(), unobserved);
        };

        trace!(?key, attempt, "Entry mutated");
        deliver(notification);
        if unobserved {
            self.inner.schedule_collection(key.clone());
        }
    }

    /// Revalidate every entry that has at least one subscriber
    ///
    /// Resolves to the number of entries revalidated once all have settled.
    pub fn revalidate_active(&self) -> BoxFuture<'static, usize> {
        let keys: Vec<K> = self
            .inner
            .lock()
            .entries
            .iter()
            .filter(|(_, e)| !e.subscribers.is_empty())
            .map(|(k, _)| k.clone())
            .collect();

        let pending: Vec<_> = keys.iter().map(|key| self.revalidate(key)).collect();
        let count = pending.len();
        async move {
            future::join_all(pending).await;
            count
        }
        .boxed()
    }

    /// Evict every entry that has been unobserved for the grace period
    pub fn collect_garbage(&self) -> usize {
        let mut state = self.inner.lock();
        let grace = self.inner.config.gc_grace_period;
        let now = Instant::now();

        let expired: Vec<K> = state
            .entries
            .iter()
            .filter(|(_, e)| e.is_collectable(grace, now))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = state.entries.remove(key) {
                entry.abort();
            }
        }

        if !expired.is_empty() {
            debug!(evicted = expired.len(), "Garbage collection pass");
        }
        expired.len()
    }

    /// Drop every entry and abort in-flight work; later calls become no-ops
    pub fn dispose(&self) {
        let mut state = self.inner.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        let count = state.entries.len();
        for (_, entry) in state.entries.drain() {
            entry.abort();
        }
        info!(entries = count, "Cache disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscriber_count(&self, key: &K) -> usize {
        self.inner
            .lock()
            .entries
            .get(key)
            .map_or(0, |e| e.subscribers.len())
    }
}

impl<K, T> Debug for KeyedAsyncCache<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: PartialEq + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("KeyedAsyncCache")
            .field("entries", &state.entries.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn await_request(request: Option<Request>) -> BoxFuture<'static, ()> {
    match request {
        Some(request) => request.boxed(),
        None => future::ready(()).boxed(),
    }
}

/// Handle returned by [`KeyedAsyncCache::subscribe`]
///
/// Dropping it, or calling [`Subscription::unsubscribe`], removes the
/// subscriber. When it was the last one the entry becomes eligible for
/// eviction after the grace period.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(dispose: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    fn inert() -> Self {
        Self { dispose: None }
    }

    pub fn is_active(&self) -> bool {
        self.dispose.is_some()
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
