//! Client configuration file handling
//!
//! Loads and manages ~/.config/speechsync/config.yaml. Every field has a
//! default, so an empty or missing file yields a working local setup.

use crate::cache::CacheConfig;
use crate::dispatch::OnError;
use crate::sync::TriggerConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides `base_url`
pub const ENV_BASE_URL: &str = "SPEECHSYNC_BASE_URL";
/// Overrides `token`
pub const ENV_TOKEN: &str = "SPEECHSYNC_TOKEN";

/// Cache and revalidation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// How long an unobserved entry survives, in milliseconds
    #[serde(default = "default_gc_grace_period_ms")]
    pub gc_grace_period_ms: u64,

    /// Interval polling in milliseconds; off when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,

    #[serde(default = "default_true")]
    pub revalidate_on_mount: bool,

    #[serde(default = "default_true")]
    pub revalidate_on_focus: bool,

    #[serde(default = "default_true")]
    pub revalidate_on_reconnect: bool,
}

fn default_gc_grace_period_ms() -> u64 {
    crate::cache::DEFAULT_GC_GRACE_PERIOD.as_millis() as u64
}

fn default_true() -> bool {
    true
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            gc_grace_period_ms: default_gc_grace_period_ms(),
            poll_interval_ms: None,
            revalidate_on_mount: true,
            revalidate_on_focus: true,
            revalidate_on_reconnect: true,
        }
    }
}

/// Speech submission settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// What happens to failed submissions (ignore, log, surface)
    #[serde(default)]
    pub on_error: OnError,
}

/// speechsync client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Backend origin; API paths are joined onto it
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub dispatch: DispatchSettings,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Poll every `interval`, rounded up to whole milliseconds
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.cache.poll_interval_ms = Some(millis_rounded_up(interval));
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.dispatch.on_error = on_error;
        self
    }

    /// Load from the default path, environment overrides applied
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::SpeechSyncError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading speechsync configuration");

        let content = fs::read_to_string(path)?;
        // an empty file deserializes to null
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&content)?
        };

        tracing::debug!(
            base_url = %config.base_url,
            poll_interval_ms = ?config.cache.poll_interval_ms,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving speechsync configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/speechsync/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("speechsync");
        path.push("config.yaml");
        path
    }

    /// Apply SPEECHSYNC_BASE_URL / SPEECHSYNC_TOKEN from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|v| !v.is_empty()) {
            tracing::debug!(%base_url, "base_url overridden from environment");
            self.base_url = base_url;
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|v| !v.is_empty()) {
            self.token = Some(token);
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.cache.poll_interval_ms.map(Duration::from_millis)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::default()
            .with_gc_grace_period(Duration::from_millis(self.cache.gc_grace_period_ms))
            .with_revalidate_on_mount(self.cache.revalidate_on_mount)
    }

    pub fn trigger_config(&self) -> TriggerConfig {
        TriggerConfig {
            poll_interval: self.poll_interval(),
            revalidate_on_focus: self.cache.revalidate_on_focus,
            revalidate_on_reconnect: self.cache.revalidate_on_reconnect,
        }
    }
}

fn millis_rounded_up(interval: Duration) -> u64 {
    let millis = interval.as_millis() + u128::from(interval.subsec_nanos() % 1_000_000 != 0);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            request_timeout_secs: default_request_timeout_secs(),
            cache: CacheSettings::default(),
            dispatch: DispatchSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert!(config.token.is_none());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.poll_interval(), None);
        assert_eq!(config.dispatch.on_error, OnError::Ignore);
        assert_eq!(
            config.cache_config().gc_grace_period,
            crate::cache::DEFAULT_GC_GRACE_PERIOD
        );
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "base_url: https://tts.example.com\ncache:\n  poll_interval_ms: 10000\n";
        let config: ClientConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.base_url, "https://tts.example.com");
        assert_eq!(config.poll_interval(), Some(Duration::from_secs(10)));
        assert!(config.cache.revalidate_on_focus);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        let config = ClientConfig::new("https://tts.example.com")
            .with_token("secret")
            .with_poll_interval(Duration::from_secs(15))
            .with_on_error(OnError::Surface);
        config.save(path).unwrap();

        let loaded = ClientConfig::load(path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_empty_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let loaded = ClientConfig::load(temp_file.path()).unwrap();
        assert_eq!(loaded, ClientConfig::default());
    }

    #[test]
    fn test_load_missing_file() {
        let result = ClientConfig::load("/nonexistent/speechsync/config.yaml");
        assert!(matches!(result, Err(crate::SpeechSyncError::Config(_))));
    }

    #[test]
    fn test_default_path() {
        let path = ClientConfig::default_path();
        assert!(path.ends_with("speechsync/config.yaml"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_BASE_URL, "http://10.0.0.2:8000"),
            (ENV_TOKEN, "from-env"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config.apply_env_from(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.base_url, "http://10.0.0.2:8000");
        assert_eq!(config.token.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_empty_env_value_is_ignored() {
        let mut config = ClientConfig::new("https://tts.example.com");
        config.apply_env_from(|_| Some(String::new()));
        assert_eq!(config.base_url, "https://tts.example.com");
        assert!(config.token.is_none());
    }

    #[test]
    fn test_sub_second_poll_interval_is_kept() {
        let config = ClientConfig::default().with_poll_interval(Duration::from_millis(500));
        assert_eq!(config.poll_interval(), Some(Duration::from_millis(500)));
        assert!(crate::config::validate_config(&config).is_ok());

        let config = ClientConfig::default().with_poll_interval(Duration::from_millis(1500));
        assert_eq!(config.cache.poll_interval_ms, Some(1500));

        let config = ClientConfig::default().with_poll_interval(Duration::from_micros(1));
        assert_eq!(config.poll_interval(), Some(Duration::from_millis(1)));
        assert!(crate::config::validate_config(&config).is_ok());
    }

    #[test]
    fn test_trigger_config() {
        let mut config = ClientConfig::default().with_poll_interval(Duration::from_secs(5));
        config.cache.revalidate_on_focus = false;

        let triggers = config.trigger_config();
        assert_eq!(triggers.poll_interval, Some(Duration::from_secs(5)));
        assert!(!triggers.revalidate_on_focus);
        assert!(triggers.revalidate_on_reconnect);
    }
}
