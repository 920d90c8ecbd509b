//! Transport Attempt
//!
//! One host, one race, bounded retries. Each pass through the loop:
//!
//! 1. asks the breaker where to send (sampled host or secondary provider)
//! 2. builds a fresh [`OutboundCall`] for that route
//! 3. sends it and classifies the outcome
//!
//! A 429 from the sampled host with the breaker enabled trips the breaker and
//! goes straight back to step 1, where the next call is rerouted. Other
//! retryable statuses wait `base_delay * (retry + 1)` first.

use std::sync::Arc;

use serde_json::Value;

use super::breaker::{FallbackBreaker, Route};
use super::config::{Endpoint, RetryPolicy};
use super::upstream::{OutboundCall, Upstream, UpstreamResponse};
use crate::credentials::Credential;
use crate::error::AttemptError;
use crate::hosts::HostDescriptor;

/// What every attempt in a race sends
#[derive(Clone, Debug)]
pub struct AttemptRequest {
    /// Target endpoint
    pub endpoint: Endpoint,
    /// Caller payload, untouched
    pub payload: Arc<Value>,
    /// Credential drawn for this race
    pub credential: Credential,
    /// Streaming mode
    pub stream: bool,
}

/// Runs attempts against hosts
pub struct Attempt {
    upstream: Arc<dyn Upstream>,
    breaker: Arc<FallbackBreaker>,
    policy: RetryPolicy,
}

impl Attempt {
    /// Create an attempt runner
    pub fn new(
        upstream: Arc<dyn Upstream>,
        breaker: Arc<FallbackBreaker>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            upstream,
            breaker,
            policy,
        }
    }

    /// Retry policy in use
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Drive one attempt at `host` to success or final failure
    ///
    /// # Errors
    ///
    /// Returns the last failure once retries are exhausted, or immediately for
    /// non-retryable failures and configuration errors.
    pub async fn run(
        &self,
        host: &HostDescriptor,
        request: &AttemptRequest,
    ) -> Result<UpstreamResponse, AttemptError> {
        let mut retry_count: u32 = 0;

        loop {
            let route = self.breaker.route(host);
            let call = build_call(host, request, &route)?;

            tracing::debug!(
                host = %host.id,
                endpoint = %request.endpoint,
                rerouted = !route.is_primary(),
                retry_count,
                "Sending request"
            );

            let err = match self.upstream.send(call).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            let tripped = err.is_rate_limited() && route.is_primary() && self.breaker.trip();

            if !self.policy.has_budget(retry_count) {
                tracing::debug!(host = %host.id, error = %err, "Retries exhausted");
                return Err(err);
            }

            if tripped {
                retry_count += 1;
                continue;
            }

            if !self.policy.should_retry_status(err.status()) {
                return Err(err);
            }

            let backoff = self.policy.backoff_for(retry_count);
            tracing::info!(
                host = %host.id,
                status = ?err.status(),
                retry_count = retry_count + 1,
                backoff_ms = backoff.as_millis() as u64,
                "Retrying request after error"
            );
            tokio::time::sleep(backoff).await;
            retry_count += 1;
        }
    }
}

/// Build the outbound call for one pass from scratch
fn build_call(
    host: &HostDescriptor,
    request: &AttemptRequest,
    route: &Route,
) -> Result<OutboundCall, AttemptError> {
    let mut body = (*request.payload).clone();
    if request.stream {
        set_field(&mut body, "stream", Value::Bool(true));
    }

    match route {
        Route::Primary => Ok(OutboundCall {
            host_id: host.id.clone(),
            url: host.url_for(request.endpoint.path()),
            credential: request.credential.clone(),
            body,
            stream: request.stream,
            timeout: host.timeout,
        }),
        Route::Secondary(secondary) => {
            let credential = secondary.credential.clone().ok_or_else(|| {
                AttemptError::Configuration(
                    "fallback routing is active but no fallback API key is configured".into(),
                )
            })?;
            set_field(&mut body, "model", Value::String(secondary.model.clone()));
            Ok(OutboundCall {
                host_id: format!("fallback({})", host.id),
                url: format!("{}{}", secondary.base_url, request.endpoint.path()),
                credential,
                body,
                stream: request.stream,
                timeout: host.timeout,
            })
        }
    }
}

fn set_field(body: &mut Value, key: &str, value: Value) {
    if let Some(map) = body.as_object_mut() {
        map.insert(key.to_string(), value);
    }
}
