//! Daemon Server Implementation
//!
//! The HTTP surface in front of the relay core:
//! - `POST /v1/chat/completions`, buffered or streamed
//! - `POST /v1/embeddings`, always buffered
//! - `GET /health`, with the fallback breaker state
//!
//! ```text
//!   client ──HTTP──▶ axum Router ──▶ Dispatcher ──race──▶ hosts
//!                        ▲                │
//!                        └── SSE body ◀───┘ (RelayStream + disconnect guard)
//! ```
//!
//! A client that goes away mid-race drops the handler future, which drops the
//! race. A client that goes away mid-stream drops the body, whose guard
//! cancels the relayed stream.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::{Context as _, Result};
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use relay_core::{
    CancelHandle, CancelOnDrop, DispatchResponse, Dispatcher, Endpoint, RelayConfig, RelayError,
    RelayStream,
};

/// Message returned to clients for every unhandled failure
const INTERNAL_ERROR_MESSAGE: &str = "An error occurred while processing your request";

// =============================================================================
// Errors
// =============================================================================

/// Failures surfaced to HTTP clients
#[derive(Debug, Error)]
pub enum ApiError {
    /// The relay could not produce a response
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Relay(RelayError::Cancelled) => {
                debug!("Request cancelled before a host answered");
            }
            ApiError::Relay(e) => error!(error = %e, "Request failed"),
        }

        let body = Json(json!({
            "error": {
                "message": INTERNAL_ERROR_MESSAGE,
                "type": "internal_error"
            }
        }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

// =============================================================================
// Router
// =============================================================================

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
}

/// Build the HTTP router over `dispatcher`
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/embeddings", post(embeddings))
        .route("/health", get(health))
        .with_state(AppState { dispatcher })
}

async fn chat_completions(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Response, ApiError> {
    let stream = payload
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let cancel = CancelHandle::new();
    let mut guard = CancelOnDrop::new(cancel.clone());

    let response = state
        .dispatcher
        .dispatch(Endpoint::ChatCompletions, payload, stream, cancel)
        .await?;

    match response {
        DispatchResponse::Complete(body) => {
            guard.disarm();
            Ok(Json(body).into_response())
        }
        DispatchResponse::Stream(relayed) => Ok(sse_response(relayed, guard)),
    }
}

async fn embeddings(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let body = state.dispatcher.embeddings(payload).await?;
    Ok(Json(body))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "fallback": state.dispatcher.breaker().snapshot(),
    }))
}

// =============================================================================
// Streaming body
// =============================================================================

/// Relayed stream that cancels itself if the client drops the body early
struct DisconnectGuarded {
    inner: RelayStream,
    guard: CancelOnDrop,
}

impl Stream for DisconnectGuarded {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.as_mut().get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(None) => {
                // Finished on its own; nothing left to cancel
                this.guard.disarm();
                Poll::Ready(None)
            }
            Poll::Ready(Some(item)) => Poll::Ready(Some(item.map_err(io::Error::other))),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn sse_response(relayed: RelayStream, guard: CancelOnDrop) -> Response {
    debug!(host = relayed.host_id(), "Relaying event stream");
    let body = Body::from_stream(DisconnectGuarded {
        inner: relayed,
        guard,
    });

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

// =============================================================================
// Server
// =============================================================================

/// The main daemon server
pub struct DaemonServer {
    listen_addr: String,
    dispatcher: Arc<Dispatcher>,
}

impl DaemonServer {
    /// Load the host and key pools named by `config`
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let dispatcher = Dispatcher::from_config(config).context("Failed to build dispatcher")?;
        Ok(Self {
            listen_addr: config.listen_addr.clone(),
            dispatcher: Arc::new(dispatcher),
        })
    }

    /// Serve until `shutdown` resolves, then let in-flight requests finish
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.listen_addr))?;
        info!(addr = %self.listen_addr, "Inference relay listening");

        axum::serve(listener, router(self.dispatcher))
            .with_graceful_shutdown(shutdown)
            .await
            .context("HTTP server failed")?;

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
