//! HTTP transport implementation.
//!
//! The actual HTTP library is abstracted behind [`HttpClient`] so different
//! stacks (reqwest, ureq, a platform webview) can drive the same transport,
//! and tests can route requests in process via [`LoopbackClient`].
//!
//! Wire contract:
//! - Feed: GET `{shape.url}?table=..&source_id=..&offset=..` plus optional
//!   `handle`, `secret` and `live=true` once caught up; the response body
//!   is a JSON [`FeedBatch`].
//! - Writes: POST of a JSON [`ChangeSet`] to the apply-changes URL; any
//!   2xx status means the batch was durably accepted.

use crate::error::{SyncError, SyncResult};
use crate::transport::{ChangeSink, ShapeFeed};
use std::fmt::Write as _;
use std::sync::Arc;
use taskdeck_sync_protocol::{ChangeSet, FeedBatch, ShapeDescriptor, ShapeOffset};

/// A plain HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a 200 response with the given JSON body.
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implementations send JSON request bodies and must apply their own
/// bounded timeouts per call; the engine does not time requests out
/// itself.
pub trait HttpClient: Send + Sync {
    /// Sends a GET request.
    fn get(&self, url: &str) -> Result<HttpResponse, String>;

    /// Sends a POST request with a JSON body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// HTTP-based transport implementing both the feed and the sink.
pub struct HttpTransport<C: HttpClient> {
    apply_changes_url: String,
    client: C,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport posting change sets to `apply_changes_url`.
    pub fn new(apply_changes_url: impl Into<String>, client: C) -> Self {
        Self {
            apply_changes_url: apply_changes_url.into(),
            client,
        }
    }

    /// Returns the apply-changes URL.
    pub fn apply_changes_url(&self) -> &str {
        &self.apply_changes_url
    }

    fn feed_url(shape: &ShapeDescriptor, offset: &ShapeOffset, handle: Option<&str>) -> String {
        let mut url = format!(
            "{}?table={}&source_id={}&offset={}",
            shape.url, shape.table, shape.source_id, offset
        );
        if let Some(handle) = handle {
            let _ = write!(url, "&handle={handle}");
        }
        if let Some(secret) = &shape.secret {
            let _ = write!(url, "&secret={secret}");
        }
        if !offset.is_initial() {
            url.push_str("&live=true");
        }
        url
    }
}

impl<C: HttpClient> ShapeFeed for HttpTransport<C> {
    fn fetch(
        &self,
        shape: &ShapeDescriptor,
        offset: &ShapeOffset,
        handle: Option<&str>,
    ) -> SyncResult<FeedBatch> {
        let url = Self::feed_url(shape, offset, handle);
        let response = self
            .client
            .get(&url)
            .map_err(SyncError::transport_retryable)?;

        if !response.is_success() {
            return Err(SyncError::ServerRejected {
                status: response.status,
                message: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        serde_json::from_slice(&response.body)
            .map_err(|e| SyncError::Protocol(format!("invalid feed batch: {e}")))
    }
}

impl<C: HttpClient> ChangeSink for HttpTransport<C> {
    fn apply_changes(&self, changes: &ChangeSet) -> SyncResult<()> {
        let body = serde_json::to_vec(changes)
            .map_err(|e| SyncError::Protocol(format!("failed to encode change set: {e}")))?;

        let response = self
            .client
            .post(&self.apply_changes_url, body)
            .map_err(SyncError::transport_retryable)?;

        if !response.is_success() {
            return Err(SyncError::ServerRejected {
                status: response.status,
                message: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.client.is_healthy()
    }
}

/// Trait for in-process servers reachable through [`LoopbackClient`].
pub trait LoopbackHandler: Send + Sync {
    /// Handles a GET request.
    fn handle_get(&self, url: &str) -> Result<HttpResponse, String>;

    /// Handles a POST request.
    fn handle_post(&self, url: &str, body: &[u8]) -> Result<HttpResponse, String>;
}

impl<T: LoopbackHandler + ?Sized> LoopbackHandler for Arc<T> {
    fn handle_get(&self, url: &str) -> Result<HttpResponse, String> {
        (**self).handle_get(url)
    }

    fn handle_post(&self, url: &str, body: &[u8]) -> Result<HttpResponse, String> {
        (**self).handle_post(url, body)
    }
}

/// An HTTP client that routes requests directly to an in-process handler.
///
/// Useful for exercising the full transport stack without network
/// overhead.
pub struct LoopbackClient<S: LoopbackHandler> {
    server: S,
}

impl<S: LoopbackHandler> LoopbackClient<S> {
    /// Creates a loopback client connected to the given handler.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackHandler> HttpClient for LoopbackClient<S> {
    fn get(&self, url: &str) -> Result<HttpResponse, String> {
        self.server.handle_get(url)
    }

    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String> {
        self.server.handle_post(url, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use taskdeck_sync_protocol::RowChange;

    struct TestClient {
        response: Mutex<Option<HttpResponse>>,
        last_url: Mutex<Option<String>>,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                response: Mutex::new(None),
                last_url: Mutex::new(None),
            }
        }

        fn set_response(&self, response: HttpResponse) {
            *self.response.lock() = Some(response);
        }

        fn last_url(&self) -> Option<String> {
            self.last_url.lock().clone()
        }
    }

    impl HttpClient for TestClient {
        fn get(&self, url: &str) -> Result<HttpResponse, String> {
            *self.last_url.lock() = Some(url.to_string());
            self.response.lock().clone().ok_or_else(|| "no response set".into())
        }

        fn post(&self, url: &str, _body: Vec<u8>) -> Result<HttpResponse, String> {
            *self.last_url.lock() = Some(url.to_string());
            self.response.lock().clone().ok_or_else(|| "no response set".into())
        }
    }

    fn shape() -> ShapeDescriptor {
        ShapeDescriptor::new("tasks", "src-1", "https://feed.example.com/v1/shape")
            .with_secret("s3cret")
    }

    #[test]
    fn feed_url_carries_shape_parameters() {
        let client = TestClient::new();
        let batch = FeedBatch::idle(ShapeOffset::new("0_5"));
        client.set_response(HttpResponse::ok(serde_json::to_vec(&batch).unwrap()));

        let transport = HttpTransport::new("https://write.example.com/apply-changes", client);
        let fetched = transport
            .fetch(&shape(), &ShapeOffset::initial(), None)
            .unwrap();
        assert_eq!(fetched, batch);

        let url = transport.client.last_url().unwrap();
        assert!(url.starts_with("https://feed.example.com/v1/shape?"));
        assert!(url.contains("table=tasks"));
        assert!(url.contains("source_id=src-1"));
        assert!(url.contains("offset=-1"));
        assert!(url.contains("secret=s3cret"));
        assert!(!url.contains("live=true"));
    }

    #[test]
    fn caught_up_fetch_goes_live() {
        let client = TestClient::new();
        client.set_response(HttpResponse::ok(
            serde_json::to_vec(&FeedBatch::idle(ShapeOffset::new("0_6"))).unwrap(),
        ));

        let transport = HttpTransport::new("https://write.example.com/apply-changes", client);
        transport
            .fetch(&shape(), &ShapeOffset::new("0_5"), Some("h1"))
            .unwrap();

        let url = transport.client.last_url().unwrap();
        assert!(url.contains("live=true"));
        assert!(url.contains("handle=h1"));
    }

    #[test]
    fn feed_decodes_changes() {
        let client = TestClient::new();
        let batch = FeedBatch::new(
            vec![RowChange::insert("a", serde_json::json!({"id": "a"}))],
            ShapeOffset::new("1_0"),
            false,
        );
        client.set_response(HttpResponse::ok(serde_json::to_vec(&batch).unwrap()));

        let transport = HttpTransport::new("https://write.example.com/apply-changes", client);
        let fetched = transport
            .fetch(&shape(), &ShapeOffset::initial(), None)
            .unwrap();
        assert_eq!(fetched.changes.len(), 1);
        assert!(!fetched.up_to_date);
    }

    #[test]
    fn malformed_feed_body_is_protocol_error() {
        let client = TestClient::new();
        client.set_response(HttpResponse::ok(b"not json".to_vec()));

        let transport = HttpTransport::new("https://write.example.com/apply-changes", client);
        let result = transport.fetch(&shape(), &ShapeOffset::initial(), None);
        assert!(matches!(result, Err(SyncError::Protocol(_))));
    }

    #[test]
    fn apply_changes_accepts_any_2xx() {
        let client = TestClient::new();
        client.set_response(HttpResponse {
            status: 204,
            body: Vec::new(),
        });

        let transport = HttpTransport::new("https://write.example.com/apply-changes", client);
        assert!(transport.apply_changes(&ChangeSet::new()).is_ok());
        assert_eq!(
            transport.client.last_url().unwrap(),
            "https://write.example.com/apply-changes"
        );
    }

    #[test]
    fn apply_changes_rejects_non_2xx() {
        let client = TestClient::new();
        client.set_response(HttpResponse {
            status: 503,
            body: b"unavailable".to_vec(),
        });

        let transport = HttpTransport::new("https://write.example.com/apply-changes", client);
        let result = transport.apply_changes(&ChangeSet::new());
        match result {
            Err(SyncError::ServerRejected { status, message }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "unavailable");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
