//! Render-ready state of a cached collection

use crate::cache::CacheSnapshot;
use crate::error::FetchError;
use std::sync::Arc;

/// What a list of `R` should currently show
#[derive(Debug, Clone, PartialEq)]
pub enum ListView<R> {
    /// Nothing to show yet, first request in flight
    Loading,
    /// Rows to render, possibly stale while a revalidation runs or after it failed
    Rows(Arc<Vec<R>>),
    /// The fetch failed and there is nothing cached
    Failed(FetchError),
    /// The collection is empty
    Empty,
}

impl<R> ListView<R> {
    /// Derive the view; cached rows win over an error
    pub fn from_snapshot(snapshot: &CacheSnapshot<Vec<R>>) -> Self {
        match (&snapshot.data, &snapshot.error) {
            (Some(rows), _) if !rows.is_empty() => ListView::Rows(rows.clone()),
            (None, _) if snapshot.is_loading => ListView::Loading,
            (None, Some(error)) => ListView::Failed(error.clone()),
            _ => ListView::Empty,
        }
    }

    /// Status line for everything but [`ListView::Rows`]
    ///
    /// `noun` is the plural the list holds, e.g. "files".
    pub fn message(&self, noun: &str) -> Option<String> {
        match self {
            ListView::Loading => Some(format!("Loading {}...", noun)),
            ListView::Failed(_) => Some(format!("Failed to load {}.", noun)),
            ListView::Empty => Some(format!("No {} found.", noun)),
            ListView::Rows(_) => None,
        }
    }

    pub fn rows(&self) -> &[R] {
        match self {
            ListView::Rows(rows) => rows.as_slice(),
            _ => &[],
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, ListView::Loading)
    }
}
