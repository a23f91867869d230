//! HTTP transport implementation.
//!
//! This module provides an HTTP-based transport for the sync engine.
//! The actual HTTP client is abstracted via a trait to allow different
//! implementations (reqwest, hyper, platform fetch, etc.).

use crate::error::{SyncError, SyncResult};
use crate::transport::{BatchSyncRequest, BatchSyncResponse, InMemoryVisitServer, ServerVisit, VisitTransport};
use parking_lot::RwLock;
use std::future::Future;
use tracing::{debug, warn};

/// Path of the batch sync endpoint, relative to the base URL.
pub const BATCH_SYNC_PATH: &str = "/visits/batch-sync";

/// An outgoing POST request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Returns the first header with the given name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response to an [`HttpRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

/// HTTP client abstraction.
///
/// `Err` means no response was received at all (DNS, connect, timeout).
pub trait HttpClient: Send + Sync + 'static {
    /// Sends a POST request.
    fn post(&self, request: HttpRequest) -> impl Future<Output = Result<HttpResponse, String>> + Send;
}

/// HTTP-based visit transport.
///
/// Uses JSON request/response bodies and bearer-token authentication.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the API (e.g., "https://api.example.com").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Bearer token sent with each request.
    token: RwLock<Option<String>>,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            token: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_bearer_token(self, token: impl Into<String>) -> Self {
        self.set_bearer_token(Some(token.into()));
        self
    }

    /// Replaces the bearer token, e.g. after a refresh.
    pub fn set_bearer_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn fail(&self, err: SyncError) -> SyncError {
        *self.last_error.write() = Some(err.to_string());
        err
    }

    fn build_request(&self, request: &BatchSyncRequest) -> SyncResult<HttpRequest> {
        let body = serde_json::to_vec(request)
            .map_err(|e| SyncError::Codec(format!("failed to encode request: {e}")))?;

        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        if let Some(token) = self.token.read().as_deref() {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }

        Ok(HttpRequest {
            url: format!("{}{}", self.base_url, BATCH_SYNC_PATH),
            headers,
            body,
        })
    }
}

impl<C: HttpClient> VisitTransport for HttpTransport<C> {
    async fn batch_sync(&self, request: &BatchSyncRequest) -> SyncResult<Vec<ServerVisit>> {
        let http_request = self.build_request(request)?;
        debug!(url = %http_request.url, records = request.visits.len(), "POST batch sync");

        let response = self
            .client
            .post(http_request)
            .await
            .map_err(|e| self.fail(SyncError::transport_retryable(e)))?;

        match response.status {
            200..=299 => {}
            401 | 403 => return Err(self.fail(SyncError::Unauthenticated)),
            500..=599 => {
                let message = String::from_utf8_lossy(&response.body).into_owned();
                return Err(self.fail(SyncError::ServerError(format!(
                    "{}: {message}",
                    response.status
                ))));
            }
            status => {
                warn!(status, "batch sync rejected");
                return Err(self.fail(SyncError::transport_fatal(format!("HTTP {status}"))));
            }
        }

        let decoded: BatchSyncResponse = serde_json::from_slice(&response.body).map_err(|e| {
            self.fail(SyncError::Codec(format!("failed to decode response: {e}")))
        })?;
        *self.last_error.write() = None;
        Ok(decoded.visits)
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync + 'static {
    /// Handles a POST to `path` and returns the response.
    fn handle_post(&self, path: &str, request: &HttpRequest) -> HttpResponse;
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        let path = request
            .url
            .find("/visits/")
            .map_or(request.url.as_str(), |i| &request.url[i..]);
        Ok(self.server.handle_post(path, &request))
    }
}

impl<S: LoopbackServer> LoopbackServer for std::sync::Arc<S> {
    fn handle_post(&self, path: &str, request: &HttpRequest) -> HttpResponse {
        (**self).handle_post(path, request)
    }
}

impl LoopbackServer for InMemoryVisitServer {
    fn handle_post(&self, path: &str, request: &HttpRequest) -> HttpResponse {
        let respond = |status: u16, body: Vec<u8>| HttpResponse { status, body };

        if path != BATCH_SYNC_PATH {
            return respond(404, b"not found".to_vec());
        }
        if request.header("Authorization").is_none() {
            return respond(401, b"missing bearer token".to_vec());
        }

        let batch: BatchSyncRequest = match serde_json::from_slice(&request.body) {
            Ok(batch) => batch,
            Err(e) => return respond(400, e.to_string().into_bytes()),
        };
        let response = BatchSyncResponse {
            visits: self.handle_batch(&batch),
        };
        match serde_json::to_vec(&response) {
            Ok(body) => respond(200, body),
            Err(e) => respond(500, e.to_string().into_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::VisitPayload;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use pourlog_core::DetectionMethod;

    struct TestClient {
        response: Mutex<Result<HttpResponse, String>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl TestClient {
        fn new(response: Result<HttpResponse, String>) -> Self {
            Self {
                response: Mutex::new(response),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpClient for std::sync::Arc<TestClient> {
        async fn post(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            self.seen.lock().push(request);
            self.response.lock().clone()
        }
    }

    fn request() -> BatchSyncRequest {
        BatchSyncRequest {
            visits: vec![VisitPayload {
                user_id: "u-1".into(),
                venue_id: "v-1".into(),
                arrival_time: Utc.with_ymd_and_hms(2024, 6, 1, 14, 30, 0).unwrap(),
                departure_time: None,
                duration_minutes: None,
                is_active: true,
                detection_method: DetectionMethod::Auto,
            }],
        }
    }

    fn status(code: u16) -> Result<HttpResponse, String> {
        Ok(HttpResponse {
            status: code,
            body: b"nope".to_vec(),
        })
    }

    #[test]
    fn transport_creation() {
        let client = std::sync::Arc::new(TestClient::new(status(200)));
        let transport = HttpTransport::new("https://api.example.com/", client);
        assert_eq!(transport.base_url(), "https://api.example.com");
        assert_eq!(transport.last_error(), None);
    }

    #[tokio::test]
    async fn sends_json_with_bearer_token() {
        let server = std::sync::Arc::new(InMemoryVisitServer::new());
        let transport = HttpTransport::new("https://api.example.com", LoopbackClient::new(server.clone()))
            .with_bearer_token("secret");

        let stored = transport.batch_sync(&request()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].visit.venue_id, "v-1");
        assert_eq!(server.visit_count(), 1);
    }

    #[tokio::test]
    async fn request_shape() {
        let client = std::sync::Arc::new(TestClient::new(status(500)));
        let transport =
            HttpTransport::new("https://api.example.com", client.clone()).with_bearer_token("t0k");
        let _ = transport.batch_sync(&request()).await;

        let seen = client.seen.lock();
        assert_eq!(seen[0].url, "https://api.example.com/visits/batch-sync");
        assert_eq!(seen[0].header("authorization"), Some("Bearer t0k"));
        let body: BatchSyncRequest = serde_json::from_slice(&seen[0].body).unwrap();
        assert_eq!(body, request());
    }

    #[tokio::test]
    async fn status_codes_map_to_errors() {
        for (code, retryable) in [(500, true), (503, true), (400, false), (422, false)] {
            let client = std::sync::Arc::new(TestClient::new(status(code)));
            let transport = HttpTransport::new("https://api.example.com", client);
            let err = transport.batch_sync(&request()).await.unwrap_err();
            assert_eq!(err.is_retryable(), retryable, "status {code}");
            assert!(transport.last_error().is_some());
        }

        let client = std::sync::Arc::new(TestClient::new(status(401)));
        let transport = HttpTransport::new("https://api.example.com", client);
        assert!(matches!(
            transport.batch_sync(&request()).await,
            Err(SyncError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn network_failure_is_retryable() {
        let client = std::sync::Arc::new(TestClient::new(Err("connection reset".into())));
        let transport = HttpTransport::new("https://api.example.com", client);
        let err = transport.batch_sync(&request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.last_error().as_deref(), Some("transport error: connection reset"));
    }

    #[tokio::test]
    async fn loopback_rejects_missing_token() {
        let transport = HttpTransport::new(
            "https://api.example.com",
            LoopbackClient::new(InMemoryVisitServer::new()),
        );
        assert!(matches!(
            transport.batch_sync(&request()).await,
            Err(SyncError::Unauthenticated)
        ));
    }
}
