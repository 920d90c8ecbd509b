//! Stream Normalizer
//!
//! Sits between the winning upstream body and the caller. Upstream bodies are
//! server-sent events; every event block (terminated by a blank line, with
//! `\n`, `\r\n` or `\r` line endings) is one fragment and maps to exactly
//! one output frame:
//!
//! | Fragment                          | Output                              |
//! |-----------------------------------|-------------------------------------|
//! | `data: [DONE]`                    | `data: [DONE]\n\n`                  |
//! | `data: <provider chunk json>`     | `data: <canonical chunk json>\n\n`  |
//! | anything else                     | the fragment's bytes, unchanged     |
//!
//! Only the incomplete tail of the last upstream chunk is buffered, so output
//! keeps pace with input and order is preserved.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::WaitForCancellationFutureOwned;

use super::cancel::CancelHandle;
use crate::error::RelayError;

/// Terminal sentinel in upstream and canonical framing
pub const DONE_SENTINEL: &str = "[DONE]";

/// Object tag of canonical chunks
pub const CHUNK_OBJECT: &str = "chat.completion.chunk";


// ============================================================================
// Canonical chunk
// ============================================================================

/// Chunk schema emitted to callers regardless of upstream provider
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CanonicalChunk {
    /// Fresh random id per chunk
    pub id: String,
    /// Always [`CHUNK_OBJECT`]
    pub object: &'static str,
    /// Unix seconds at normalization time
    pub created: i64,
    /// Upstream model, or the fallback display name
    pub model: String,
    /// Exactly one choice
    pub choices: Vec<CanonicalChoice>,
    /// Always null
    pub usage: Option<Value>,
    /// Upstream fingerprint when present
    pub system_fingerprint: Option<String>,
}

/// The single choice of a [`CanonicalChunk`]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CanonicalChoice {
    /// Always 0
    pub index: u32,
    /// Text delta
    pub delta: CanonicalDelta,
    /// Always null
    pub logprobs: Option<Value>,
    /// Passed through from upstream
    pub finish_reason: Option<String>,
}

/// Delta payload
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CanonicalDelta {
    /// Text content; empty when upstream had none
    pub content: String,
}

impl CanonicalChunk {
    /// Build a canonical chunk from a provider chunk
    #[must_use]
    pub fn from_provider(chunk: &Value, fallback_model: &str) -> Self {
        let choice = chunk.pointer("/choices/0");
        let content = choice
            .and_then(|c| c.pointer("/delta/content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let finish_reason = choice
            .and_then(|c| c.get("finish_reason"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let model = chunk
            .get("model")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(fallback_model)
            .to_string();

        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            object: CHUNK_OBJECT,
            created: chrono::Utc::now().timestamp(),
            model,
            choices: vec![CanonicalChoice {
                index: 0,
                delta: CanonicalDelta { content },
                logprobs: None,
                finish_reason,
            }],
            usage: None,
            system_fingerprint: chunk
                .get("system_fingerprint")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

// ============================================================================
// Fragment normalization
// ============================================================================

/// Normalize one fragment
///
/// `fragment` is the raw event block including its trailing delimiter, if it
/// had one. The returned bytes are the frame to emit.
#[must_use]
pub fn normalize_fragment(fragment: &[u8], fallback_model: &str) -> Bytes {
    let Some(data) = event_data(fragment) else {
        return Bytes::copy_from_slice(fragment);
    };

    if data.trim() == DONE_SENTINEL {
        return Bytes::from_static(b"data: [DONE]\n\n");
    }

    let parsed = serde_json::from_str::<Value>(&data)
        .ok()
        .filter(Value::is_object)
        .map(|chunk| CanonicalChunk::from_provider(&chunk, fallback_model))
        .and_then(|chunk| serde_json::to_string(&chunk).ok());

    match parsed {
        Some(json) => Bytes::from(format!("data: {json}\n\n")),
        None => Bytes::copy_from_slice(fragment),
    }
}

/// Joined `data:` lines of an event block, if it has any
fn event_data(fragment: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(fragment).ok()?;
    let mut data: Option<String> = None;
    for line in text.split(['\r', '\n']) {
        let Some(rest) = line.strip_prefix("data:") else {
            continue;
        };
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        match data.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(rest);
            }
            None => data = Some(rest.to_string()),
        }
    }
    data
}

/// Line ending at `i`
enum LineEnd {
    None,
    Len(usize),
    /// A trailing `\r` that may still be joined by `\n`
    Undecided,
}

fn line_end_at(buf: &[u8], i: usize) -> LineEnd {
    match buf.get(i) {
        Some(b'\n') => LineEnd::Len(1),
        Some(b'\r') => match buf.get(i + 1) {
            Some(b'\n') => LineEnd::Len(2),
            Some(_) => LineEnd::Len(1),
            None => LineEnd::Undecided,
        },
        _ => LineEnd::None,
    }
}

/// End of the first complete event block in `buf`, past its blank line
fn fragment_end(buf: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i < buf.len() {
        match line_end_at(buf, i) {
            LineEnd::None => i += 1,
            LineEnd::Undecided => return None,
            LineEnd::Len(n) => match line_end_at(buf, i + n) {
                LineEnd::Len(m) => return Some(i + n + m),
                LineEnd::Undecided => return None,
                LineEnd::None => i += n,
            },
        }
    }
    None
}

// ============================================================================
// Stream adapter
// ============================================================================

/// Normalizing adapter over a raw upstream body
///
/// Ends without further output as soon as its [`CancelHandle`] fires; the
/// upstream body is dropped at that point.
pub struct NormalizedStream<S> {
    inner: Option<S>,
    buffer: BytesMut,
    fallback_model: String,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<S> NormalizedStream<S>
where
    S: Stream<Item = Result<Bytes, RelayError>> + Unpin,
{
    /// Wrap `inner`; `fallback_model` names chunks that carry no model
    pub fn new(inner: S, fallback_model: impl Into<String>, cancel: &CancelHandle) -> Self {
        Self {
            inner: Some(inner),
            buffer: BytesMut::new(),
            fallback_model: fallback_model.into(),
            cancelled: Box::pin(cancel.cancelled_owned()),
        }
    }

    /// Whether the upstream body has been released
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    fn release(&mut self) {
        self.inner = None;
        self.buffer.clear();
    }

    fn next_complete_fragment(&mut self) -> Option<Bytes> {
        let end = fragment_end(&self.buffer)?;
        let fragment = self.buffer.split_to(end).freeze();
        Some(normalize_fragment(&fragment, &self.fallback_model))
    }
}

impl<S> Stream for NormalizedStream<S>
where
    S: Stream<Item = Result<Bytes, RelayError>> + Unpin,
{
    type Item = Result<Bytes, RelayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.as_mut().get_mut();

        if this.cancelled.as_mut().poll(cx).is_ready() {
            if this.inner.is_some() {
                tracing::debug!("Relayed stream cancelled, releasing upstream body");
            }
            this.release();
            return Poll::Ready(None);
        }

        loop {
            if let Some(frame) = this.next_complete_fragment() {
                return Poll::Ready(Some(Ok(frame)));
            }

            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };

            match Pin::new(inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    tracing::warn!(error = %e, "Upstream stream failed");
                    this.release();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.inner = None;
                    if this.buffer.is_empty() {
                        return Poll::Ready(None);
                    }
                    let tail = this.buffer.split().freeze();
                    return Poll::Ready(Some(Ok(normalize_fragment(&tail, &this.fallback_model))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
