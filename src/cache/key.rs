//! Cache keys

use std::fmt;

/// Identifies one logical remote resource
///
/// A request path, optionally followed by a query string. Parameters are
/// percent-encoded and sorted by name, so the same parameter set always
/// produces the same key regardless of the order it was given in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Build a key from a path and query parameters
    pub fn with_params(path: &str, params: &[(&str, &str)]) -> Self {
        if params.is_empty() {
            return Self::new(path);
        }

        let mut pairs: Vec<(&str, &str)> = params.to_vec();
        pairs.sort();

        let query = pairs
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&");

        Self(format!("{}?{}", path, query))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path component, without the query string
    pub fn path(&self) -> &str {
        self.0.split_once('?').map_or(&self.0, |(path, _)| path)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for CacheKey {
    fn from(path: String) -> Self {
        Self(path)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
