//! Configuration system
//!
//! Loads ~/.config/speechsync/config.yaml with support for:
//! - Backend origin and bearer token (overridable from the environment)
//! - Cache grace period and revalidation triggers
//! - The error policy for speech submissions

mod client_config;
pub mod validation;

pub use client_config::{CacheSettings, ClientConfig, DispatchSettings, ENV_BASE_URL, ENV_TOKEN};
pub use validation::{validate_config, validate_config_result, ValidationError};
