//! Dispatch Configuration
//!
//! Tunables for the race, the per-attempt retry policy and the fallback
//! breaker. All of these are plain data with defaults; [`crate::config`] fills
//! them from the config file and environment.

use std::time::Duration;

// ============================================================================
// Endpoints
// ============================================================================

/// Upstream endpoints the relay forwards to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `POST /v1/chat/completions`
    ChatCompletions,
    /// `POST /v1/embeddings`
    Embeddings,
}

impl Endpoint {
    /// Request path appended to a host's base URL
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::ChatCompletions => "/v1/chat/completions",
            Self::Embeddings => "/v1/embeddings",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

// ============================================================================
// Race Configuration
// ============================================================================

/// How wide and how long a race runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaceConfig {
    /// Hosts sampled for the initial round and for every retry round
    pub hosts_per_round: usize,

    /// Gap between retry rounds once the initial round is exhausted
    pub retry_interval: Duration,

    /// Wall-clock ceiling measured from the start of the request
    pub deadline: Duration,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            hosts_per_round: 5,
            retry_interval: Duration::from_secs(5),
            deadline: Duration::from_secs(120),
        }
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Retry policy local to one attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of re-sends after the first call
    pub max_retries: u32,

    /// Delay unit; retry `n` (0-indexed) waits `base_delay * (n + 1)`
    pub base_delay: Duration,

    /// Statuses worth re-sending
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            retryable_statuses: vec![429, 404, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry_count` (0-indexed)
    #[must_use]
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        self.base_delay.saturating_mul(retry_count.saturating_add(1))
    }

    /// Whether a failed call with this status may be re-sent
    #[must_use]
    pub fn should_retry_status(&self, status: Option<u16>) -> bool {
        status.is_some_and(|s| self.retryable_statuses.contains(&s))
    }

    /// Whether another retry fits in the budget
    #[must_use]
    pub fn has_budget(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

// ============================================================================
// Fallback Configuration
// ============================================================================

/// Secondary provider used while the breaker is active
#[derive(Clone)]
pub struct FallbackConfig {
    /// Breaker is inert unless this is set
    pub enabled: bool,

    /// Bearer token for the secondary provider
    pub api_key: Option<String>,

    /// How long one trip keeps traffic on the secondary
    pub duration: Duration,

    /// Model identifier substituted into rerouted payloads
    pub model: String,

    /// Model name reported in normalized chunks when upstream omits one
    pub display_name: String,

    /// Base address of the secondary provider
    pub base_url: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            duration: Duration::from_secs(10 * 60),
            model: "gpt-4o-mini".to_string(),
            display_name: "GPT-4o mini".to_string(),
            base_url: "https://api.openai.com".to_string(),
        }
    }
}

impl FallbackConfig {
    /// The secondary key, unless missing or empty
    #[must_use]
    pub fn usable_api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

impl std::fmt::Debug for FallbackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackConfig")
            .field("enabled", &self.enabled)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("duration", &self.duration)
            .field("model", &self.model)
            .field("display_name", &self.display_name)
            .field("base_url", &self.base_url)
            .finish()
    }
}
