//! speechsync - client runtime for a text-to-speech web backend
//!
//! Submits text for synthesis without waiting on it, and keeps the generated
//! files and the user list fresh through a keyed stale-while-revalidate cache.
//!
//! # Architecture
//!
//! - **cache**: Keyed async cache (coalescing, change notification, GC)
//! - **dispatch**: Fire-and-forget requests with an explicit error policy
//! - **web**: reqwest client for the backend endpoints
//! - **sync**: Revalidation driver (interval, focus, reconnect)
//! - **view**: Loading / rows / failed / empty state of a cached list
//! - **client**: `SpeechClient`, the application context tying it together
//! - **config**: YAML configuration and validation
//!
//! Wire types live in the `speech-api` crate.

// Core modules
pub mod cache;
pub mod config;
pub mod error;
pub mod retry;

// Components
pub mod client;
pub mod dispatch;
pub mod logging;
pub mod sync;
pub mod view;
pub mod web;

// Re-exports
pub use client::SpeechClient;
pub use error::{DispatchError, FetchError, Result, SpeechSyncError};
pub use speech_api::{FileEntry, SpeechRequest, UserModel};
