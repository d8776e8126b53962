//! Fire-and-forget dispatch
//!
//! One-way requests whose outcome the caller never waits for. The backend
//! turns a submitted text into an audio file long after the HTTP call, and
//! the file shows up through the polled `/api/files` collection, so the
//! submit path only needs to get the request on the wire.
//!
//! What happens to a failure is an explicit [`OnError`] choice. The default,
//! [`OnError::Ignore`], makes transport errors unobservable. Nothing
//! correlates a submission with the file it eventually produces.

use crate::error::DispatchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Capacity of the failure broadcast channel
pub const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// HTTP method of an outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request built, dispatched and forgotten
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: Method,
    pub path: String,
    /// JSON body, if any
    pub body: Option<Value>,
}

impl OutboundRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    /// Request with a JSON body serialized from `body`
    pub fn json<B: Serialize>(
        method: Method,
        path: impl Into<String>,
        body: &B,
    ) -> Result<Self, DispatchError> {
        let body = serde_json::to_value(body).map_err(|e| DispatchError::Encode(e.to_string()))?;
        Ok(Self {
            method,
            path: path.into(),
            body: Some(body),
        })
    }

    /// `POST /api/speech` with `{ "input": text }`
    pub fn speech(input: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            path: speech_api::paths::SPEECH.to_string(),
            body: Some(json!({ "input": input.into() })),
        }
    }
}

/// Sends one request and reports only whether it went through
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<(), DispatchError>;
}

/// What to do when a dispatched request fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Drop the failure
    #[default]
    Ignore,
    /// Emit a warning through tracing
    Log,
    /// Broadcast a [`DispatchFailure`] to [`FireAndForgetDispatcher::failures`] receivers
    Surface,
}

/// A failed dispatch, as broadcast under [`OnError::Surface`]
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchFailure {
    pub method: Method,
    pub path: String,
    pub error: DispatchError,
    pub failed_at: DateTime<Utc>,
}

/// Issues one-way requests without awaiting them
#[derive(Clone)]
pub struct FireAndForgetDispatcher {
    transport: Arc<dyn Transport>,
    on_error: OnError,
    failures: broadcast::Sender<DispatchFailure>,
}

impl FireAndForgetDispatcher {
    pub fn new(transport: Arc<dyn Transport>, on_error: OnError) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Self {
            transport,
            on_error,
            failures,
        }
    }

    pub fn on_error(&self) -> OnError {
        self.on_error
    }

    /// Receiver for failures; only fed under [`OnError::Surface`]
    pub fn failures(&self) -> broadcast::Receiver<DispatchFailure> {
        self.failures.subscribe()
    }

    /// Start `request` on the current runtime and return immediately
    ///
    /// Exactly one request per call, never retried or deduplicated. Failures
    /// only go where [`OnError`] sends them. Without a tokio runtime the
    /// request is dropped.
    pub fn send(&self, request: OutboundRequest) {
        let Ok(handle) = Handle::try_current() else {
            debug!(method = %request.method, path = %request.path, "No tokio runtime; request dropped");
            return;
        };

        let transport = self.transport.clone();
        let on_error = self.on_error;
        let failures = self.failures.clone();

        trace!(method = %request.method, path = %request.path, "Dispatching");
        handle.spawn(async move {
            let method = request.method;
            let path = request.path.clone();

            let Err(error) = transport.send(request).await else {
                trace!(%method, %path, "Dispatch delivered");
                return;
            };

            match on_error {
                OnError::Ignore => {}
                OnError::Log => {
                    warn!(%method, %path, error = %error, "Fire-and-forget request failed");
                }
                OnError::Surface => {
                    // no receivers is fine
                    let _ = failures.send(DispatchFailure {
                        method,
                        path,
                        error,
                        failed_at: Utc::now(),
                    });
                }
            }
        });
    }
}

impl fmt::Debug for FireAndForgetDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FireAndForgetDispatcher")
            .field("on_error", &self.on_error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speech_api::SpeechRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct StubTransport {
        started: AtomicUsize,
        fail_with: Option<DispatchError>,
        /// Hold every request open until notified
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn send(&self, _request: OutboundRequest) -> Result<(), DispatchError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }
    }

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        for _ in 0..1000 {
            if counter.load(Ordering::SeqCst) == expected {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {} transport calls", expected);
    }

    #[test]
    fn test_speech_request_shape() {
        let request = OutboundRequest::speech("hello");
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, "/api/speech");
        assert_eq!(
            request.body,
            Some(serde_json::to_value(SpeechRequest::new("hello")).unwrap())
        );
    }

    #[test]
    fn test_on_error_serde() {
        assert_eq!(serde_json::to_string(&OnError::Surface).unwrap(), "\"surface\"");
        assert_eq!(OnError::default(), OnError::Ignore);
    }

    #[tokio::test]
    async fn test_send_returns_before_transport_settles() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(StubTransport {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let dispatcher = FireAndForgetDispatcher::new(transport.clone(), OnError::Ignore);

        dispatcher.send(OutboundRequest::speech("hello"));
        // the caller's next statement runs before the request is even polled
        assert_eq!(transport.started.load(Ordering::SeqCst), 0);

        wait_for(&transport.started, 1).await;
        gate.notify_waiters();
    }

    #[tokio::test]
    async fn test_every_send_is_one_request() {
        let transport = Arc::new(StubTransport::default());
        let dispatcher = FireAndForgetDispatcher::new(transport.clone(), OnError::Ignore);

        for _ in 0..3 {
            dispatcher.send(OutboundRequest::speech("same text"));
        }

        wait_for(&transport.started, 3).await;
    }

    #[tokio::test]
    async fn test_ignored_failure_is_unobservable() {
        let transport = Arc::new(StubTransport {
            fail_with: Some(DispatchError::Network("connection refused".into())),
            ..Default::default()
        });
        let dispatcher = FireAndForgetDispatcher::new(transport.clone(), OnError::Ignore);
        let mut failures = dispatcher.failures();

        dispatcher.send(OutboundRequest::speech("hello"));
        wait_for(&transport.started, 1).await;
        tokio::task::yield_now().await;

        assert!(matches!(
            failures.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_logged_failure_is_not_broadcast() {
        crate::logging::init_test();
        let transport = Arc::new(StubTransport {
            fail_with: Some(DispatchError::Status(502)),
            ..Default::default()
        });
        let dispatcher = FireAndForgetDispatcher::new(transport.clone(), OnError::Log);
        let mut failures = dispatcher.failures();

        dispatcher.send(OutboundRequest::speech("hello"));
        wait_for(&transport.started, 1).await;
        tokio::task::yield_now().await;

        assert!(failures.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_surfaced_failure_is_broadcast() {
        let transport = Arc::new(StubTransport {
            fail_with: Some(DispatchError::Status(500)),
            ..Default::default()
        });
        let dispatcher = FireAndForgetDispatcher::new(transport, OnError::Surface);
        let mut failures = dispatcher.failures();

        dispatcher.send(OutboundRequest::speech("hello"));

        let failure = tokio::time::timeout(Duration::from_secs(1), failures.recv())
            .await
            .expect("failure not surfaced")
            .unwrap();
        assert_eq!(failure.path, "/api/speech");
        assert_eq!(failure.method, Method::Post);
        assert_eq!(failure.error, DispatchError::Status(500));
    }

    #[test]
    fn test_send_without_runtime_is_dropped() {
        let transport = Arc::new(StubTransport::default());
        let dispatcher = FireAndForgetDispatcher::new(transport.clone(), OnError::Surface);

        dispatcher.send(OutboundRequest::speech("hello"));

        assert_eq!(transport.started.load(Ordering::SeqCst), 0);
    }
}
