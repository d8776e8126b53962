//! Wire types for the text-to-speech backend
//!
//! Request and response shapes of the backend HTTP API, plus the endpoint
//! paths the client talks to.
//!
//! # Example
//!
//! ```
//! use speech_api::{FileEntry, SpeechRequest};
//!
//! let body = serde_json::to_string(&SpeechRequest::new("hello"))?;
//! assert_eq!(body, r#"{"input":"hello"}"#);
//!
//! let files: Vec<FileEntry> = serde_json::from_str(
//!     r#"[{"timestamp":"2025-04-03-14:03","file_path":"user_files/u1/2025-04-03-14:03/final.mp3","dir_name":"2025-04-03-14:03"}]"#,
//! )?;
//! assert_eq!(files[0].dir_name, "2025-04-03-14:03");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Endpoint paths exposed by the backend
pub mod paths {
    /// Speech synthesis submission (POST, response ignored by the client)
    pub const SPEECH: &str = "/api/speech";

    /// Generated audio files of the current user (GET)
    pub const FILES: &str = "/api/files";

    /// Everyone who has signed in to the app (GET)
    pub const USERS: &str = "/api/users";

    /// The calling user (GET)
    pub const CURRENT_USER: &str = "/api/users/me";

    /// MP4 rendition of a generated file, converted on demand by the backend
    pub fn file_video(dir_name: &str) -> String {
        format!("{}/{}/mp4", FILES, dir_name)
    }
}

/// Format of [`FileEntry::timestamp`] and of the per-submission directory name
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H:%M";

/// Errors produced when interpreting wire values
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid timestamp '{value}': {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Result type for wire-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// Body of `POST /api/speech`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub input: String,
}

impl SpeechRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// One generated `final.mp3`, as listed by `GET /api/files`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Submission time, formatted with [`TIMESTAMP_FORMAT`]
    pub timestamp: String,

    /// Server-relative URL of the audio file
    pub file_path: String,

    /// Name of the per-submission directory holding the file
    pub dir_name: String,
}

impl FileEntry {
    /// Parse the submission timestamp
    pub fn parsed_timestamp(&self) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).map_err(|source| {
            Error::InvalidTimestamp {
                value: self.timestamp.clone(),
                source,
            }
        })
    }

    /// Path of the MP4 rendition of this file
    pub fn video_path(&self) -> String {
        paths::file_video(&self.dir_name)
    }

    /// File name shown for the download link
    pub fn file_name(&self) -> &str {
        self.file_path
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.file_path)
    }
}

/// Email address attached to a user account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    #[serde(default)]
    pub id: Option<String>,
    pub email_address: String,
}

/// Subset of the identity provider's user record, as listed by `GET /api/users`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserModel {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email_addresses: Option<Vec<EmailAddress>>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

impl UserModel {
    /// Human readable name: full name, then username, then first email, then id
    pub fn display_name(&self) -> String {
        let full: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect();
        if !full.is_empty() {
            return full.join(" ");
        }
        if let Some(username) = self.username.as_deref().filter(|s| !s.is_empty()) {
            return username.to_string();
        }
        if let Some(email) = self.primary_email() {
            return email.to_string();
        }
        self.id.clone().unwrap_or_else(|| "unknown".to_string())
    }

    /// First listed email address, if any
    pub fn primary_email(&self) -> Option<&str> {
        self.email_addresses
            .as_ref()
            .and_then(|emails| emails.first())
            .map(|e| e.email_address.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speech_request_body() {
        let json = serde_json::to_value(SpeechRequest::new("hello")).unwrap();
        assert_eq!(json, serde_json::json!({ "input": "hello" }));
    }

    #[test]
    fn test_file_entry_timestamp() {
        let entry = FileEntry {
            timestamp: "2025-04-03-14:03".to_string(),
            file_path: "user_files/u1/2025-04-03-14:03/final.mp3".to_string(),
            dir_name: "2025-04-03-14:03".to_string(),
        };

        let ts = entry.parsed_timestamp().unwrap();
        assert_eq!(ts.format("%H:%M").to_string(), "14:03");
        assert_eq!(entry.file_name(), "final.mp3");
        assert_eq!(entry.video_path(), "/api/files/2025-04-03-14:03/mp4");
    }

    #[test]
    fn test_file_entry_bad_timestamp() {
        let entry = FileEntry {
            timestamp: "yesterday".to_string(),
            file_path: "final.mp3".to_string(),
            dir_name: "x".to_string(),
        };

        assert!(matches!(
            entry.parsed_timestamp(),
            Err(Error::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_user_model_nullable_fields() {
        let json = r#"{"id":"user_1","username":null,"first_name":"Ada","email_addresses":[{"id":"e1","email_address":"ada@example.com"}]}"#;
        let user: UserModel = serde_json::from_str(json).unwrap();

        assert_eq!(user.username, None);
        assert_eq!(user.last_name, None);
        assert_eq!(user.display_name(), "Ada");
        assert_eq!(user.primary_email(), Some("ada@example.com"));
    }

    #[test]
    fn test_display_name_fallbacks() {
        let user = UserModel {
            id: Some("user_2".to_string()),
            ..Default::default()
        };
        assert_eq!(user.display_name(), "user_2");

        let user = UserModel {
            username: Some("grace".to_string()),
            ..Default::default()
        };
        assert_eq!(user.display_name(), "grace");
    }
}
