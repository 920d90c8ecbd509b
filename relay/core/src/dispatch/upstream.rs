//! Upstream Transport
//!
//! One outbound HTTP call, no retries. [`Attempt`](super::attempt::Attempt)
//! builds an [`OutboundCall`] per try and hands it to an [`Upstream`].
//!
//! Wire contract:
//!
//! ```text
//! POST {base_url}{endpoint}
//! Authorization: Bearer <token>
//! Content-Type: application/json
//! Accept: text/event-stream | application/json
//!
//! <payload, with "stream": true forced when streaming>
//! ```

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;

use crate::credentials::Credential;
use crate::error::{AttemptError, RelayError};

/// Raw upstream body for streaming responses
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RelayError>> + Send>>;

/// Longest error body excerpt kept in an [`AttemptError`]
const ERROR_BODY_LIMIT: usize = 512;

/// A fully built outbound request
#[derive(Clone, Debug)]
pub struct OutboundCall {
    /// Host id, for logs
    pub host_id: String,
    /// Absolute URL
    pub url: String,
    /// Bearer token
    pub credential: Credential,
    /// JSON body
    pub body: Value,
    /// Whether an event stream is expected
    pub stream: bool,
    /// Time allowed until the response head (and, for JSON, the body) arrives
    pub timeout: Duration,
}

impl OutboundCall {
    /// Accept header for this call's mode
    #[must_use]
    pub fn accept(&self) -> &'static str {
        if self.stream {
            "text/event-stream"
        } else {
            "application/json"
        }
    }
}

/// Successful upstream response
pub enum UpstreamResponse {
    /// Buffered JSON body
    Complete(Value),
    /// Live event stream
    Streaming(ByteStream),
}

impl UpstreamResponse {
    /// Short label for logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Complete(_) => "complete",
            Self::Streaming(_) => "streaming",
        }
    }
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(v) => f.debug_tuple("Complete").field(v).finish(),
            Self::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

/// Sends one call to one host
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Perform the call
    ///
    /// # Errors
    ///
    /// Non-success statuses map to [`AttemptError::Status`]; everything else
    /// to the transport or timeout variants.
    async fn send(&self, call: OutboundCall) -> Result<UpstreamResponse, AttemptError>;
}

/// reqwest-backed [`Upstream`]
#[derive(Clone, Debug, Default)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    /// Upstream over a default client
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upstream over a preconfigured client
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn exchange(&self, call: &OutboundCall) -> Result<UpstreamResponse, AttemptError> {
        let response = self
            .client
            .post(&call.url)
            .bearer_auth(call.credential.expose())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, call.accept())
            .json(&call.body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, call.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Status {
                status: status.as_u16(),
                message: truncate(&body, ERROR_BODY_LIMIT),
            });
        }

        if call.stream {
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| RelayError::Stream(e.to_string())));
            Ok(UpstreamResponse::Streaming(Box::pin(body)))
        } else {
            let value = response
                .json::<Value>()
                .await
                .map_err(|e| map_reqwest_error(e, call.timeout))?;
            Ok(UpstreamResponse::Complete(value))
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, call: OutboundCall) -> Result<UpstreamResponse, AttemptError> {
        // The timeout covers the response head only; a stream may outlive it
        match tokio::time::timeout(call.timeout, self.exchange(&call)).await {
            Ok(result) => result,
            Err(_) => Err(AttemptError::Timeout(call.timeout)),
        }
    }
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> AttemptError {
    if e.is_timeout() {
        return AttemptError::Timeout(timeout);
    }
    if let Some(status) = e.status() {
        return AttemptError::Status {
            status: status.as_u16(),
            message: e.to_string(),
        };
    }
    AttemptError::Transport(e.to_string())
}

fn truncate(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
