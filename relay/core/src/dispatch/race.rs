//! Race Coordinator
//!
//! Fans one request out to a host set and resolves exactly once.
//!
//! ```text
//!   initial hosts ──▶ JoinSet ◀── retry rounds (RetrySchedule, armed once the
//!                        │                        initial set has all failed)
//!                        ▼
//!                 select! loop (sole owner of RaceState)
//!                   ├─ cancel      → abort all, Err(Cancelled)
//!                   ├─ success     → adopt, abort the rest, drain in background
//!                   ├─ failure     → count; arm retries when the initial set is spent
//!                   └─ retry tick  → launch a fresh round, or Err(AllHostsFailed)
//! ```
//!
//! Every attempt completion funnels through the one loop, so "is there a
//! winner yet" is never raced: the first `Ok` the loop sees wins and the loop
//! returns.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tracing::Instrument;

use super::attempt::{Attempt, AttemptRequest};
use super::cancel::CancelHandle;
use super::config::RaceConfig;
use super::retry_loop::{next_tick, RetryDecision, RetrySchedule};
use super::upstream::UpstreamResponse;
use crate::error::{AttemptError, RelayError};
use crate::hosts::{HostDescriptor, HostPool};

/// The adopted response of a race
#[derive(Debug)]
pub struct RaceWinner {
    /// Host that answered first
    pub host: HostDescriptor,
    /// Its response
    pub response: UpstreamResponse,
    /// 0 for the initial set, n for the n-th retry round
    pub round: u32,
    /// Time from race start to adoption
    pub elapsed: Duration,
}

struct AttemptOutcome {
    host: HostDescriptor,
    round: u32,
    result: Result<UpstreamResponse, AttemptError>,
}

struct RaceState {
    started_at: Instant,
    in_flight: JoinSet<AttemptOutcome>,
    /// Initial-round tasks that have not finished yet
    initial_pending: HashSet<Id>,
    failures: usize,
    retry: Option<RetrySchedule>,
}

impl RaceState {
    fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            in_flight: JoinSet::new(),
            initial_pending: HashSet::new(),
            failures: 0,
            retry: None,
        }
    }

    fn record_failure(&mut self, id: Id, host: &HostDescriptor, round: u32, err: &AttemptError) {
        self.failures += 1;
        self.initial_pending.remove(&id);
        if round == 0 {
            tracing::warn!(host = %host.id, error = %err, "Request failed for host");
        } else {
            tracing::warn!(host = %host.id, round, error = %err, "Retry failed for host");
        }
    }

    fn record_join_error(&mut self, err: &JoinError) {
        self.failures += 1;
        self.initial_pending.remove(&err.id());
        tracing::error!(error = %err, "Attempt task ended abnormally");
    }

    fn should_arm_retries(&self) -> bool {
        self.retry.is_none() && self.initial_pending.is_empty()
    }
}

/// One request's race across sampled hosts
pub struct Race {
    attempt: Arc<Attempt>,
    hosts: Arc<dyn HostPool>,
    config: RaceConfig,
    request: AttemptRequest,
    cancel: CancelHandle,
}

impl Race {
    /// Prepare a race; nothing is sent until [`Race::run`]
    pub fn new(
        attempt: Arc<Attempt>,
        hosts: Arc<dyn HostPool>,
        config: RaceConfig,
        request: AttemptRequest,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            attempt,
            hosts,
            config,
            request,
            cancel,
        }
    }

    /// Race `initial` hosts, retrying fresh samples until the deadline
    ///
    /// # Errors
    ///
    /// - [`RelayError::NoHosts`] if `initial` is empty
    /// - [`RelayError::Cancelled`] if the cancel handle fires first
    /// - [`RelayError::AllHostsFailed`] once the deadline passes with no winner
    pub async fn run(self, initial: Vec<HostDescriptor>) -> Result<RaceWinner, RelayError> {
        if initial.is_empty() {
            return Err(RelayError::NoHosts);
        }

        let mut state = RaceState::new(Instant::now());
        let ids = self.launch(&mut state, initial, 0);
        state.initial_pending.extend(ids);

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    state.in_flight.abort_all();
                    tracing::info!(
                        elapsed_ms = elapsed_ms(state.started_at),
                        "Race cancelled by caller"
                    );
                    return Err(RelayError::Cancelled);
                }

                Some(joined) = state.in_flight.join_next_with_id() => {
                    match joined {
                        Ok((_, AttemptOutcome { host, round, result: Ok(response) })) => {
                            return Ok(adopt(state, host, round, response));
                        }
                        Ok((id, AttemptOutcome { host, round, result: Err(err) })) => {
                            state.record_failure(id, &host, round, &err);
                        }
                        Err(err) => state.record_join_error(&err),
                    }

                    if state.should_arm_retries() {
                        tracing::info!(
                            failures = state.failures,
                            interval_secs = self.config.retry_interval.as_secs(),
                            "All initial hosts failed, retrying with fresh hosts"
                        );
                        state.retry = Some(RetrySchedule::arm(&self.config, state.started_at));
                    }
                }

                decision = next_tick(&mut state.retry) => match decision {
                    RetryDecision::Launch { round } => self.launch_round(&mut state, round),
                    RetryDecision::Expired => {
                        state.in_flight.abort_all();
                        let elapsed = state.started_at.elapsed();
                        tracing::error!(
                            failures = state.failures,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Deadline reached with no successful host"
                        );
                        return Err(RelayError::AllHostsFailed {
                            attempts: state.failures,
                            elapsed,
                        });
                    }
                },
            }
        }
    }

    fn launch_round(&self, state: &mut RaceState, round: u32) {
        match self.hosts.sample(self.config.hosts_per_round) {
            Ok(hosts) => {
                tracing::info!(
                    round,
                    hosts = hosts.len(),
                    elapsed_ms = elapsed_ms(state.started_at),
                    "Launching retry round"
                );
                self.launch(state, hosts, round);
            }
            Err(e) => tracing::warn!(round, error = %e, "Could not sample hosts for retry round"),
        }
    }

    fn launch(&self, state: &mut RaceState, hosts: Vec<HostDescriptor>, round: u32) -> Vec<Id> {
        hosts
            .into_iter()
            .map(|host| {
                let attempt = Arc::clone(&self.attempt);
                let request = self.request.clone();
                let task = async move {
                    let result = attempt.run(&host, &request).await;
                    AttemptOutcome {
                        host,
                        round,
                        result,
                    }
                };
                state.in_flight.spawn(task.in_current_span()).id()
            })
            .collect()
    }
}

/// Take the winner and tear down everything else
fn adopt(
    mut state: RaceState,
    host: HostDescriptor,
    round: u32,
    response: UpstreamResponse,
) -> RaceWinner {
    let elapsed = state.started_at.elapsed();
    tracing::info!(
        host = %host.id,
        round,
        kind = response.kind(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Using response from fastest host"
    );

    state.in_flight.abort_all();
    if !state.in_flight.is_empty() {
        tokio::spawn(drain_losers(state.in_flight).in_current_span());
    }

    RaceWinner {
        host,
        response,
        round,
        elapsed,
    }
}

/// Collect aborted attempts; any that finished first have their bodies dropped here
async fn drain_losers(mut in_flight: JoinSet<AttemptOutcome>) {
    while let Some(joined) = in_flight.join_next().await {
        match joined {
            Ok(AttemptOutcome {
                host,
                result: Ok(response),
                ..
            }) => {
                tracing::debug!(host = %host.id, kind = response.kind(), "Released late response");
                drop(response);
            }
            Ok(_) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => tracing::warn!(error = %e, "Losing attempt ended abnormally"),
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
