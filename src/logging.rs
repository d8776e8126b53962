//! Logging configuration using tracing
//!
//! The library only emits events; installing a subscriber is left to the
//! embedding application, which can call [`init`] for the default setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when RUST_LOG is unset
pub const DEFAULT_FILTER: &str = "warn";

/// Initialize the tracing subscriber
///
/// Filtering follows RUST_LOG and falls back to [`DEFAULT_FILTER`]. Output
/// goes to stderr.
///
/// # Example RUST_LOG values
/// - `RUST_LOG=speechsync=debug` - cache fetches, settles and GC
/// - `RUST_LOG=speechsync::sync=trace` - every driver tick
/// - `RUST_LOG=speechsync::dispatch=warn` - failed submissions under `OnError::Log`
///
/// # Errors
/// Returns an error if a global subscriber is already installed
pub fn init() -> crate::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| {
            crate::SpeechSyncError::Other(format!("Failed to initialize tracing: {}", e))
        })?;

    Ok(())
}

/// Initialize logging for tests (no-op if already initialized)
pub fn init_test() {
    let _ = init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_fails_second_time() {
        init_test();
        assert!(init().is_err());
    }

    #[test]
    fn test_init_test_is_idempotent() {
        init_test();
        init_test();
        tracing::debug!(key = "/api/files", "structured event after init");
    }
}
