//! Test utilities for asu-client
//!
//! Provides an in-process mock of the ASU build service and a server
//! wrapper that hands out a client pointed at it.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::config::{ClientConfig, ClientConfigBuilder};
use crate::AsuClient;

/// A test server that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: AsuClient,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Serve an axum Router and create a client for it
    ///
    /// The client polls every 10ms so build tests finish quickly.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use asu_client::testing::{MockBuildService, TestServer};
    ///
    /// let mock = MockBuildService::new().with_revision("24.10.0", "x86", "64", "r28427");
    /// let server = TestServer::start(mock.router()).await?;
    ///
    /// let revision = server.client.get_revision("24.10.0", "x86", "64").await?;
    /// ```
    pub async fn start(router: Router) -> std::io::Result<Self> {
        Self::start_with_config(router, |builder| builder).await
    }

    /// Serve a router with a customised client configuration
    pub async fn start_with_config<F>(router: Router, configure: F) -> std::io::Result<Self>
    where
        F: FnOnce(ClientConfigBuilder) -> ClientConfigBuilder,
    {
        // Bind to any available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        // Spawn the server
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        let builder = ClientConfig::builder(format!("http://{}/", addr))
            .request_timeout_ms(5_000)
            .connect_timeout_ms(2_000)
            .poll_interval_ms(10);
        let client =
            AsuClient::with_config(configure(builder).build()).map_err(std::io::Error::other)?;

        Ok(Self {
            addr,
            client,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the test server (with trailing slash)
    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Get a reference to the client
    pub fn client(&self) -> &AsuClient {
        &self.client
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Send shutdown signal if not already done
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Abort the task if still running
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Mock Build Service
// =============================================================================

/// Scriptable stand-in for the ASU REST API
///
/// Status polls answer 202 for the configured number of times, then the
/// final status and body. Every request is counted so tests can assert on
/// the exact traffic. Clones share state.
#[derive(Clone)]
pub struct MockBuildService {
    state: Arc<Mutex<MockState>>,
}

struct MockState {
    latest: Value,
    revisions: HashMap<(String, String, String), String>,
    submit_status: StatusCode,
    submit_body: Value,
    pending_polls: u32,
    final_status: StatusCode,
    final_body: Value,
    store: HashMap<(String, String), Vec<Bytes>>,

    submitted: Vec<Value>,
    revision_requests: u32,
    status_requests: u32,
    download_requests: u32,
}

impl Default for MockBuildService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBuildService {
    /// A service that queues every build as `H1` and finishes it at once
    /// with no images
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                latest: json!({ "latest": ["24.10.0", "23.05.5"] }),
                revisions: HashMap::new(),
                submit_status: StatusCode::ACCEPTED,
                submit_body: json!({ "request_hash": "H1", "detail": "queued" }),
                pending_polls: 0,
                final_status: StatusCode::OK,
                final_body: json!({ "imagebuilder_status": "done", "images": [] }),
                store: HashMap::new(),
                submitted: Vec::new(),
                revision_requests: 0,
                status_requests: 0,
                download_requests: 0,
            })),
        }
    }

    pub fn with_latest(self, body: Value) -> Self {
        self.lock().latest = body;
        self
    }

    /// Answer the revision endpoint for one version/target/sub_target
    pub fn with_revision(
        self,
        version: &str,
        target: &str,
        sub_target: &str,
        revision: &str,
    ) -> Self {
        self.lock().revisions.insert(
            (version.into(), target.into(), sub_target.into()),
            revision.into(),
        );
        self
    }

    /// Response to `POST api/v1/build`
    pub fn with_submit(self, status: u16, body: Value) -> Self {
        {
            let mut state = self.lock();
            state.submit_status = status_code(status);
            state.submit_body = body;
        }
        self
    }

    /// Number of status polls answered with 202 before the final reply
    pub fn with_pending_polls(self, count: u32) -> Self {
        self.lock().pending_polls = count;
        self
    }

    /// Terminal response of the status endpoint
    pub fn with_final(self, status: u16, body: Value) -> Self {
        {
            let mut state = self.lock();
            state.final_status = status_code(status);
            state.final_body = body;
        }
        self
    }

    /// Serve an object under `store/{request_hash}/{name}` in one piece
    pub fn with_artifact(self, request_hash: &str, name: &str, data: impl Into<Bytes>) -> Self {
        self.with_chunked_artifact(request_hash, name, vec![data.into()])
    }

    /// Serve an object as a chunked stream of the given pieces
    pub fn with_chunked_artifact(
        self,
        request_hash: &str,
        name: &str,
        chunks: Vec<Bytes>,
    ) -> Self {
        self.lock()
            .store
            .insert((request_hash.into(), name.into()), chunks);
        self
    }

    /// Bodies received by the submit endpoint, in order
    pub fn submitted(&self) -> Vec<Value> {
        self.lock().submitted.clone()
    }

    pub fn revision_requests(&self) -> u32 {
        self.lock().revision_requests
    }

    pub fn status_requests(&self) -> u32 {
        self.lock().status_requests
    }

    pub fn download_requests(&self) -> u32 {
        self.lock().download_requests
    }

    /// Router serving the ASU API paths
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/v1/latest", get(latest))
            .route(
                "/api/v1/revision/{version}/{target}/{sub_target}",
                get(revision),
            )
            .route("/api/v1/build", post(submit))
            .route("/api/v1/build/{request_hash}", get(status))
            .route("/store/{request_hash}/{file_name}", get(store))
            .with_state(self.clone())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn latest(State(mock): State<MockBuildService>) -> Json<Value> {
    Json(mock.lock().latest.clone())
}

async fn revision(
    State(mock): State<MockBuildService>,
    Path((version, target, sub_target)): Path<(String, String, String)>,
) -> Response {
    let mut state = mock.lock();
    state.revision_requests += 1;

    match state.revisions.get(&(version, target, sub_target)) {
        Some(revision) => Json(json!({ "revision": revision })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "Unsupported target" })),
        )
            .into_response(),
    }
}

async fn submit(State(mock): State<MockBuildService>, Json(body): Json<Value>) -> Response {
    let mut state = mock.lock();
    state.submitted.push(body);
    (state.submit_status, Json(state.submit_body.clone())).into_response()
}

async fn status(
    State(mock): State<MockBuildService>,
    Path(request_hash): Path<String>,
) -> Response {
    let mut state = mock.lock();
    state.status_requests += 1;

    if state.status_requests <= state.pending_polls {
        return (
            StatusCode::ACCEPTED,
            Json(json!({
                "request_hash": request_hash,
                "detail": "building",
                "queue_position": state.pending_polls - state.status_requests,
            })),
        )
            .into_response();
    }

    (state.final_status, Json(state.final_body.clone())).into_response()
}

async fn store(
    State(mock): State<MockBuildService>,
    Path((request_hash, file_name)): Path<(String, String)>,
) -> Response {
    let mut state = mock.lock();
    state.download_requests += 1;

    let Some(chunks) = state.store.get(&(request_hash, file_name)).cloned() else {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };

    let body = if chunks.len() <= 1 {
        Body::from(chunks.into_iter().next().unwrap_or_default())
    } else {
        let stream = futures::stream::iter(chunks.into_iter().map(Ok::<_, Infallible>));
        Body::from_stream(stream)
    };

    ([(header::CONTENT_TYPE, "application/octet-stream")], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_format() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let url = format!("http://{}/", addr);
        assert_eq!(url, "http://127.0.0.1:8080/");
    }

    #[test]
    fn test_mock_clones_share_state() {
        let mock = MockBuildService::new();
        let other = mock.clone().with_pending_polls(3);
        other.lock().status_requests = 2;
        assert_eq!(mock.lock().pending_polls, 3);
        assert_eq!(mock.status_requests(), 2);
    }
}
