//! Point-in-time view of a cache entry

use crate::error::FetchError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// What a subscriber sees of one cache entry
///
/// `data` and `error` can both be set: a failed revalidation keeps the last
/// good value around.
pub struct CacheSnapshot<T> {
    pub data: Option<Arc<T>>,
    pub error: Option<FetchError>,
    /// No data yet and a request is in flight
    pub is_loading: bool,
    /// A request is in flight, with or without data
    pub is_validating: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl<T> CacheSnapshot<T> {
    /// Whether a subscriber would render the two snapshots differently
    ///
    /// Data is compared by identity; the cache keeps the previous `Arc` when a
    /// fetch returns an equal value. `last_fetched_at` is not observable.
    pub fn same_state(&self, other: &Self) -> bool {
        let same_data = match (&self.data, &other.data) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_data
            && self.error == other.error
            && self.is_loading == other.is_loading
            && self.is_validating == other.is_validating
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

impl<T> Default for CacheSnapshot<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: false,
            is_validating: false,
            last_fetched_at: None,
        }
    }
}

impl<T> Clone for CacheSnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            error: self.error.clone(),
            is_loading: self.is_loading,
            is_validating: self.is_validating,
            last_fetched_at: self.last_fetched_at,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for CacheSnapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSnapshot")
            .field("data", &self.data)
            .field("error", &self.error)
            .field("is_loading", &self.is_loading)
            .field("is_validating", &self.is_validating)
            .field("last_fetched_at", &self.last_fetched_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        let snap: CacheSnapshot<Vec<u8>> = CacheSnapshot::default();
        assert!(!snap.has_data());
        assert!(!snap.is_loading);
        assert!(snap.error.is_none());
    }

    #[test]
    fn test_same_state_uses_identity() {
        let data = Arc::new(vec![1, 2, 3]);
        let a = CacheSnapshot {
            data: Some(data.clone()),
            ..Default::default()
        };
        let b = CacheSnapshot {
            data: Some(data),
            last_fetched_at: Some(Utc::now()),
            ..Default::default()
        };
        let c = CacheSnapshot {
            data: Some(Arc::new(vec![1, 2, 3])),
            ..Default::default()
        };

        assert!(a.same_state(&b));
        assert!(!a.same_state(&c));
    }

    #[test]
    fn test_error_changes_state() {
        let a: CacheSnapshot<()> = CacheSnapshot::default();
        let b = CacheSnapshot {
            error: Some(FetchError::Network("down".into())),
            ..Default::default()
        };
        assert!(!a.same_state(&b));
    }
}
