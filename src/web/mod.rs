//! Web API client for the speech backend
//!
//! Provides access to the backend endpoints:
//! - /api/speech - speech synthesis submission
//! - /api/files - generated audio files
//! - /api/users, /api/users/me - users

mod client;

pub use client::*;
