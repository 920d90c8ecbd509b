//! Dispatcher
//!
//! Entry point for the inbound surface. Draws a host set and a credential,
//! runs a [`Race`], and hands back either the buffered JSON body or a
//! normalized live stream with its cancel handle.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use tracing::Instrument;

use super::attempt::{Attempt, AttemptRequest};
use super::breaker::FallbackBreaker;
use super::cancel::CancelHandle;
use super::config::{Endpoint, RaceConfig, RetryPolicy};
use super::normalizer::NormalizedStream;
use super::race::{Race, RaceWinner};
use super::upstream::{ByteStream, HttpUpstream, Upstream, UpstreamResponse};
use crate::config::RelayConfig;
use crate::credentials::{CredentialProvider, KeyPool};
use crate::error::RelayError;
use crate::hosts::{HostPool, StaticHostPool};

/// Normalized stream handed to the caller
///
/// Yields `data: ...\n\n` frames. Cancelling its handle releases the upstream
/// body and ends the stream.
pub struct RelayStream {
    inner: NormalizedStream<ByteStream>,
    cancel: CancelHandle,
    host_id: String,
}

impl RelayStream {
    fn new(body: ByteStream, fallback_model: &str, cancel: CancelHandle, host_id: String) -> Self {
        Self {
            inner: NormalizedStream::new(body, fallback_model, &cancel),
            cancel,
            host_id,
        }
    }

    /// Hook for caller disconnect
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Host whose stream this is
    #[must_use]
    pub fn host_id(&self) -> &str {
        &self.host_id
    }
}

impl Stream for RelayStream {
    type Item = Result<Bytes, RelayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl std::fmt::Debug for RelayStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayStream")
            .field("host_id", &self.host_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Result of a dispatch
#[derive(Debug)]
pub enum DispatchResponse {
    /// Buffered JSON body
    Complete(Value),
    /// Live normalized stream
    Stream(RelayStream),
}

/// Races inbound requests across the host pool
pub struct Dispatcher {
    hosts: Arc<dyn HostPool>,
    credentials: Arc<dyn CredentialProvider>,
    breaker: Arc<FallbackBreaker>,
    attempt: Arc<Attempt>,
    race: RaceConfig,
}

impl Dispatcher {
    /// Assemble a dispatcher from its collaborators
    pub fn new(
        hosts: Arc<dyn HostPool>,
        credentials: Arc<dyn CredentialProvider>,
        upstream: Arc<dyn Upstream>,
        breaker: Arc<FallbackBreaker>,
        race: RaceConfig,
        retry: RetryPolicy,
    ) -> Self {
        let attempt = Arc::new(Attempt::new(upstream, Arc::clone(&breaker), retry));
        Self {
            hosts,
            credentials,
            breaker,
            attempt,
            race,
        }
    }

    /// Load the host and key files named by `config` and talk HTTP
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be loaded.
    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        let hosts = StaticHostPool::load(
            &config.hosts.file,
            &config.hosts.url_template,
            config.hosts.timeout,
        )?;
        if hosts.is_empty() {
            tracing::warn!(path = %config.hosts.file.display(), "Host pool is empty");
        }
        let keys = KeyPool::load(&config.keys_file)?;
        if keys.active_count() == 0 {
            tracing::warn!(path = %config.keys_file.display(), "No active API keys loaded");
        }

        Ok(Self::new(
            Arc::new(hosts),
            Arc::new(keys),
            Arc::new(HttpUpstream::new()),
            Arc::new(FallbackBreaker::new(config.fallback.clone())),
            config.race.clone(),
            config.retry.clone(),
        ))
    }

    /// The shared fallback breaker
    #[must_use]
    pub fn breaker(&self) -> &Arc<FallbackBreaker> {
        &self.breaker
    }

    /// `POST /v1/chat/completions`
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::dispatch`].
    pub async fn chat_completions(
        &self,
        payload: Value,
        stream: bool,
    ) -> Result<DispatchResponse, RelayError> {
        self.dispatch(Endpoint::ChatCompletions, payload, stream, CancelHandle::new())
            .await
    }

    /// `POST /v1/embeddings`, always buffered
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::dispatch`].
    pub async fn embeddings(&self, payload: Value) -> Result<Value, RelayError> {
        match self
            .dispatch(Endpoint::Embeddings, payload, false, CancelHandle::new())
            .await?
        {
            DispatchResponse::Complete(value) => Ok(value),
            DispatchResponse::Stream(_) => Err(RelayError::Stream(
                "embeddings upstream answered with a stream".into(),
            )),
        }
    }

    /// Race one request
    ///
    /// `cancel` aborts the race while it runs and, for streams, ends the
    /// returned [`RelayStream`] afterwards.
    ///
    /// # Errors
    ///
    /// Fails before racing when no hosts or credentials are available, and
    /// afterwards with [`RelayError::Cancelled`] or
    /// [`RelayError::AllHostsFailed`].
    pub async fn dispatch(
        &self,
        endpoint: Endpoint,
        payload: Value,
        stream: bool,
        cancel: CancelHandle,
    ) -> Result<DispatchResponse, RelayError> {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("dispatch", %request_id, %endpoint, stream);

        async move {
            let hosts = self.hosts.sample(self.race.hosts_per_round)?;
            let credential = self.credentials.next()?;
            tracing::debug!(hosts = hosts.len(), "Starting race");

            let request = AttemptRequest {
                endpoint,
                payload: Arc::new(payload),
                credential,
                stream,
            };
            let race = Race::new(
                Arc::clone(&self.attempt),
                Arc::clone(&self.hosts),
                self.race.clone(),
                request,
                cancel.clone(),
            );
            let RaceWinner { host, response, .. } = race.run(hosts).await?;

            Ok(match response {
                UpstreamResponse::Complete(value) => DispatchResponse::Complete(value),
                UpstreamResponse::Streaming(body) => DispatchResponse::Stream(RelayStream::new(
                    body,
                    &self.breaker.config().display_name,
                    cancel,
                    host.id,
                )),
            })
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("race", &self.race)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}
