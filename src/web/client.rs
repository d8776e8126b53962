//! HTTP client for the speech backend

use crate::cache::{CacheKey, Fetcher};
use crate::config::ClientConfig;
use crate::dispatch::{Method, OutboundRequest, Transport};
use crate::error::{DispatchError, FetchError};
use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use speech_api::{paths, FileEntry, UserModel};
use std::time::Duration;

/// Error response body, when the backend sends one
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(alias = "message")]
    error: String,
}

/// Backend API client
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl ApiClient {
    /// Create a client for `base_url` with a request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("speechsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            client,
        })
    }

    /// Create a client from config
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let client = Self::new(&config.base_url, config.request_timeout())?;
        Ok(match &config.token {
            Some(token) => client.with_token(token),
            None => client,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for an API path
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// GET `path` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> std::result::Result<T, FetchError> {
        tracing::debug!(path, "GET");

        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| {
                    status
                        .canonical_reason()
                        .unwrap_or("Unknown error")
                        .to_string()
                });
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Generated audio files of the current user
    pub async fn fetch_files(&self) -> std::result::Result<Vec<FileEntry>, FetchError> {
        self.get_json(paths::FILES).await
    }

    /// Users known to the backend
    pub async fn fetch_users(&self) -> std::result::Result<Vec<UserModel>, FetchError> {
        self.get_json(paths::USERS).await
    }

    /// The user the token belongs to
    pub async fn fetch_current_user(&self) -> std::result::Result<UserModel, FetchError> {
        self.get_json(paths::CURRENT_USER).await
    }

    /// URL of the MP4 rendition of a generated file
    pub fn video_url(&self, dir_name: &str) -> String {
        self.url(&paths::file_video(dir_name))
    }

    /// URL the backend serves a listed `file_path` from
    pub fn file_url(&self, file_path: &str) -> String {
        self.url(file_path.trim_start_matches("./"))
    }
}

#[async_trait]
impl<T> Fetcher<CacheKey, T> for ApiClient
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    async fn fetch(&self, key: &CacheKey) -> std::result::Result<T, FetchError> {
        self.get_json(key.as_str()).await
    }
}

#[async_trait]
impl Transport for ApiClient {
    async fn send(&self, request: OutboundRequest) -> std::result::Result<(), DispatchError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.request(method, &request.path);
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DispatchError::Network(e.to_string()))?;

        // body is never read
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ApiClient {
        ApiClient::new("https://tts.example.com/", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(client().base_url(), "https://tts.example.com");
        assert_eq!(client().url("/api/files"), "https://tts.example.com/api/files");
    }

    #[test]
    fn test_video_url() {
        assert_eq!(
            client().video_url("2025-04-03-14:03"),
            "https://tts.example.com/api/files/2025-04-03-14:03/mp4"
        );
    }

    #[test]
    fn test_file_url() {
        let client = client();
        let expected = "https://tts.example.com/user_files/u1/2025-04-03-14:03/final.mp3";
        assert_eq!(client.file_url("user_files/u1/2025-04-03-14:03/final.mp3"), expected);
        assert_eq!(client.file_url("./user_files/u1/2025-04-03-14:03/final.mp3"), expected);
    }

    #[test]
    fn test_from_config_carries_token() {
        let config = ClientConfig::new("http://localhost:9000").with_token("abc");
        let client = ApiClient::from_config(&config).unwrap();
        assert_eq!(client.token.as_deref(), Some("abc"));
        assert_eq!(client.base_url(), "http://localhost:9000");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        // port 9 (discard) is closed on loopback
        let client = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = client.fetch_files().await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_)), "got {:?}", err);

        let err = Transport::send(&client, OutboundRequest::speech("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Network(_)));
    }
}
