//! Configuration validation
//!
//! Checks a [`ClientConfig`] before a client is built from it:
//! - `base_url` is an http(s) origin without a trailing `/api`
//! - timeouts and intervals are non-zero
//! - the token, when present, is not blank

use super::client_config::ClientConfig;
use crate::SpeechSyncError;

/// Validation error details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub context: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref ctx) = self.context {
            write!(f, "[{}] {}: {}", ctx, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a client configuration, collecting every problem
pub fn validate_config(config: &ClientConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if let Err(e) = validate_base_url(&config.base_url) {
        errors.push(e);
    }

    if let Some(ref token) = config.token {
        if token.trim().is_empty() {
            errors.push(ValidationError::new("token", "Token cannot be blank"));
        }
    }

    if config.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "request_timeout_secs",
            "Timeout must be greater than 0",
        ));
    }

    if config.cache.poll_interval_ms == Some(0) {
        errors.push(
            ValidationError::new(
                "poll_interval_ms",
                "Interval must be greater than 0; omit it to disable polling",
            )
            .with_context("cache"),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_base_url(url: &str) -> std::result::Result<(), ValidationError> {
    let Some(rest) = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
    else {
        return Err(ValidationError::new(
            "base_url",
            format!("Must start with http:// or https://: {}", url),
        ));
    };

    if rest.is_empty() || rest.starts_with('/') {
        return Err(ValidationError::new(
            "base_url",
            format!("Missing host: {}", url),
        ));
    }

    if url.trim_end_matches('/').ends_with("/api") {
        return Err(ValidationError::new(
            "base_url",
            "Should be the backend origin; /api is added per request",
        ));
    }

    Ok(())
}

/// Validate configuration and return a crate Result
pub fn validate_config_result(config: &ClientConfig) -> crate::Result<()> {
    validate_config(config).map_err(SpeechSyncError::Validation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ClientConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_base_urls() {
        for url in ["localhost:8000", "ftp://host", "http://", "https:///api"] {
            let config = ClientConfig::new(url);
            assert!(validate_config(&config).is_err(), "{} accepted", url);
        }
    }

    #[test]
    fn test_api_suffix_rejected() {
        let config = ClientConfig::new("https://tts.example.com/api/");
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "base_url");
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = ClientConfig::new("nope").with_token("  ");
        config.request_timeout_secs = 0;
        config.cache.poll_interval_ms = Some(0);

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["base_url", "token", "request_timeout_secs", "poll_interval_ms"]
        );
        assert_eq!(
            errors[3].to_string(),
            "[cache] poll_interval_ms: Interval must be greater than 0; omit it to disable polling"
        );
    }

    #[test]
    fn test_result_wraps_errors() {
        let config = ClientConfig::new("nope");
        let err = validate_config_result(&config).unwrap_err();
        assert!(matches!(err, SpeechSyncError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().starts_with("Invalid configuration: base_url"));
    }
}
