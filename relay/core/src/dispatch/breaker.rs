//! Fallback Breaker
//!
//! Process-wide switch that moves primary traffic to a secondary provider for
//! a fixed window after the primary pool answers with 429.
//!
//! ```text
//!            429 from primary (enabled)
//!   inactive ─────────────────────────────▶ active(expiry, model)
//!      ▲                                        │
//!      └──────── now >= expiry  |  disable() ───┘
//! ```
//!
//! Expiry is lazy: nothing runs when the window closes, every query compares
//! against the clock and a stale window reads as inactive.
//!
//! Uses `tokio::time::Instant` so the window follows a paused test clock.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::config::FallbackConfig;
use crate::credentials::Credential;
use crate::hosts::HostDescriptor;

#[derive(Debug, Default)]
struct BreakerState {
    enabled: bool,
    /// `Some` while a window is (or was, if stale) open
    active_until: Option<Instant>,
    model: Option<String>,
}

impl BreakerState {
    fn is_active(&mut self, now: Instant) -> bool {
        match self.active_until {
            Some(expiry) if now < expiry => true,
            Some(_) => {
                self.active_until = None;
                self.model = None;
                false
            }
            None => false,
        }
    }
}

/// Where an attempt should send its next call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// The sampled host, with the race credential
    Primary,
    /// The secondary provider
    Secondary(SecondaryRoute),
}

impl Route {
    /// Whether this route goes to the sampled host
    #[must_use]
    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Primary)
    }
}

/// Target details for a rerouted call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecondaryRoute {
    /// Secondary base URL
    pub base_url: String,
    /// Model substituted into the payload
    pub model: String,
    /// Secondary credential; `None` means misconfigured
    pub credential: Option<Credential>,
}

/// Read-only view of the breaker for logs and health output
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct BreakerSnapshot {
    /// Whether 429s may trip the breaker
    pub enabled: bool,
    /// Whether traffic is currently rerouted
    pub active: bool,
    /// Time left in the window
    pub remaining_secs: u64,
    /// Model in use while active
    pub model: Option<String>,
}

/// Rate-limit triggered reroute with a TTL
///
/// Shared by every race through an `Arc`.
pub struct FallbackBreaker {
    config: FallbackConfig,
    state: Mutex<BreakerState>,
}

impl FallbackBreaker {
    /// Create a breaker; it starts inactive
    #[must_use]
    pub fn new(config: FallbackConfig) -> Self {
        let state = BreakerState {
            enabled: config.enabled,
            ..BreakerState::default()
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// A breaker that never trips
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(FallbackConfig::default())
    }

    /// Configuration this breaker was built from
    #[must_use]
    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Whether 429s may trip the breaker
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Turn tripping on or off. Turning it off also closes any open window.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        state.enabled = enabled;
        if !enabled {
            state.active_until = None;
            state.model = None;
        }
    }

    /// Open a window of `duration`. Returns `false` when the breaker is not enabled.
    pub fn activate(&self, duration: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.enabled {
            return false;
        }
        let expiry = Instant::now() + duration;
        // A concurrent trip must not shorten a window that is already open
        let expiry = match state.active_until {
            Some(current) if current > expiry => current,
            _ => expiry,
        };
        state.active_until = Some(expiry);
        state.model = Some(self.config.model.clone());
        true
    }

    /// Open a window of the configured duration after a rate-limit response
    pub fn trip(&self) -> bool {
        let tripped = self.activate(self.config.duration);
        if tripped {
            tracing::warn!(
                model = %self.config.model,
                duration_secs = self.config.duration.as_secs(),
                "Primary pool rate limited, routing to fallback provider"
            );
        }
        tripped
    }

    /// Whether traffic is rerouted right now
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.lock().is_active(Instant::now())
    }

    /// Close the window immediately
    pub fn disable(&self) {
        let mut state = self.state.lock();
        if state.active_until.take().is_some() {
            tracing::info!("Fallback routing disabled");
        }
        state.model = None;
    }

    /// Pick the route for a call aimed at `host`
    ///
    /// Every sampled host is a primary target, so the only question is whether
    /// the window is open.
    #[must_use]
    pub fn route(&self, host: &HostDescriptor) -> Route {
        let mut state = self.state.lock();
        if !state.is_active(Instant::now()) {
            return Route::Primary;
        }
        let model = state
            .model
            .clone()
            .unwrap_or_else(|| self.config.model.clone());
        drop(state);

        tracing::debug!(host = %host.id, model = %model, "Rerouting attempt to fallback provider");
        Route::Secondary(SecondaryRoute {
            base_url: self.config.base_url.trim_end_matches('/').to_string(),
            model,
            credential: self.config.usable_api_key().map(Credential::new),
        })
    }

    /// Current state, with lazy expiry applied
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let mut state = self.state.lock();
        let active = state.is_active(now);
        BreakerSnapshot {
            enabled: state.enabled,
            active,
            remaining_secs: state
                .active_until
                .map_or(0, |expiry| expiry.saturating_duration_since(now).as_secs()),
            model: state.model.clone(),
        }
    }
}

impl std::fmt::Debug for FallbackBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackBreaker")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish()
    }
}
