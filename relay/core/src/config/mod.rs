//! TOML Configuration File Support
//!
//! Centralized configuration loading for the relay, from a TOML file at
//! `~/.config/inference-relay/relay.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:3000"
//!
//! [hosts]
//! file = "config/hosts.json"
//! url_template = "https://{id}.gaia.domains"
//! timeout_ms = 30000
//! sample_size = 5
//!
//! [keys]
//! file = "config/api-keys.json"
//!
//! [retry]
//! max_retries = 3
//! base_delay_ms = 1000
//! retryable_statuses = [429, 404, 500, 502, 503, 504]
//!
//! [race]
//! retry_interval_secs = 5
//! deadline_secs = 120
//!
//! [fallback]
//! enabled = true
//! api_key = "sk-..."
//! duration_minutes = 10
//! model = "gpt-4o-mini"
//! display_name = "GPT-4o mini"
//! base_url = "https://api.openai.com"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::config::{FallbackConfig, RaceConfig, RetryPolicy};
use crate::hosts::{DEFAULT_HOST_TIMEOUT, DEFAULT_URL_TEMPLATE};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Address the HTTP surface binds to
    pub listen_addr: Option<String>,
}

/// Hosts section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostsToml {
    /// JSON file listing host identifiers
    pub file: Option<PathBuf>,

    /// Base URL template; `{id}` is replaced by the host identifier
    pub url_template: Option<String>,

    /// Per-request timeout in milliseconds
    pub timeout_ms: Option<u64>,

    /// Hosts raced per round
    pub sample_size: Option<usize>,
}

/// Keys section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysToml {
    /// JSON file with the API key pool
    pub file: Option<PathBuf>,
}

/// Retry section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryToml {
    /// Re-sends per attempt
    pub max_retries: Option<u32>,

    /// Backoff unit in milliseconds
    pub base_delay_ms: Option<u64>,

    /// Statuses that are re-sent
    pub retryable_statuses: Option<Vec<u16>>,
}

/// Race section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceToml {
    /// Seconds between retry rounds
    pub retry_interval_secs: Option<u64>,

    /// Seconds before an unresolved race fails
    pub deadline_secs: Option<u64>,
}

/// Fallback section of the TOML configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackToml {
    /// Whether rate limits may trip the breaker
    pub enabled: Option<bool>,

    /// Secondary provider key
    pub api_key: Option<String>,

    /// Window length in minutes
    pub duration_minutes: Option<u64>,

    /// Secondary model identifier
    pub model: Option<String>,

    /// Secondary model display name
    pub display_name: Option<String>,

    /// Secondary base URL
    pub base_url: Option<String>,
}

impl std::fmt::Debug for FallbackToml {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackToml")
            .field("enabled", &self.enabled)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("duration_minutes", &self.duration_minutes)
            .field("model", &self.model)
            .field("display_name", &self.display_name)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Server configuration section
    pub server: ServerToml,

    /// Hosts configuration section
    pub hosts: HostsToml,

    /// Keys configuration section
    pub keys: KeysToml,

    /// Retry configuration section
    pub retry: RetryToml,

    /// Race configuration section
    pub race: RaceToml,

    /// Fallback configuration section
    pub fallback: FallbackToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Where hosts come from and how they are addressed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostsConfig {
    /// JSON file listing host identifiers
    pub file: PathBuf,
    /// Base URL template
    pub url_template: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("config/hosts.json"),
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            timeout: DEFAULT_HOST_TIMEOUT,
        }
    }
}

/// Centralized configuration for the relay
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Address the HTTP surface binds to
    pub listen_addr: String,

    /// Host pool source
    pub hosts: HostsConfig,

    /// API key pool file
    pub keys_file: PathBuf,

    /// Race width and timing
    pub race: RaceConfig,

    /// Per-attempt retries
    pub retry: RetryPolicy,

    /// Secondary provider
    pub fallback: FallbackConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            hosts: HostsConfig::default(),
            keys_file: PathBuf::from("config/api-keys.json"),
            race: RaceConfig::default(),
            retry: RetryPolicy::default(),
            fallback: FallbackConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.race.hosts_per_round == 0 {
            return Err(ConfigError::ValidationError(
                "hosts.sample_size must be at least 1".into(),
            ));
        }
        if self.race.retry_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "race.retry_interval_secs must be at least 1".into(),
            ));
        }
        if self.race.deadline < self.race.retry_interval {
            return Err(ConfigError::ValidationError(
                "race.deadline_secs must not be shorter than race.retry_interval_secs".into(),
            ));
        }
        if !self.hosts.url_template.contains(crate::hosts::HOST_ID_PLACEHOLDER) {
            return Err(ConfigError::ValidationError(
                "hosts.url_template must contain {id}".into(),
            ));
        }
        if self.fallback.enabled && self.fallback.usable_api_key().is_none() {
            // Not fatal: rerouted attempts fail fast instead
            tracing::warn!("Fallback is enabled but no fallback API key is configured");
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/inference-relay/relay.toml` or
/// `~/.config/inference-relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("inference-relay").join("relay.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed, or
/// if the result fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    let mut config = RelayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RelayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, |key| std::env::var(key).ok());

    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RelayConfig, toml: &RelayToml) {
    // Server
    if let Some(ref addr) = toml.server.listen_addr {
        config.listen_addr.clone_from(addr);
    }

    // Hosts
    if let Some(ref file) = toml.hosts.file {
        config.hosts.file.clone_from(file);
    }
    if let Some(ref template) = toml.hosts.url_template {
        config.hosts.url_template.clone_from(template);
    }
    if let Some(ms) = toml.hosts.timeout_ms {
        config.hosts.timeout = Duration::from_millis(ms);
    }
    if let Some(n) = toml.hosts.sample_size {
        config.race.hosts_per_round = n;
    }

    // Keys
    if let Some(ref file) = toml.keys.file {
        config.keys_file.clone_from(file);
    }

    // Retry
    if let Some(n) = toml.retry.max_retries {
        config.retry.max_retries = n;
    }
    if let Some(ms) = toml.retry.base_delay_ms {
        config.retry.base_delay = Duration::from_millis(ms);
    }
    if let Some(ref statuses) = toml.retry.retryable_statuses {
        config.retry.retryable_statuses.clone_from(statuses);
    }

    // Race
    if let Some(secs) = toml.race.retry_interval_secs {
        config.race.retry_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.race.deadline_secs {
        config.race.deadline = Duration::from_secs(secs);
    }

    // Fallback
    if let Some(enabled) = toml.fallback.enabled {
        config.fallback.enabled = enabled;
    }
    if toml.fallback.api_key.is_some() {
        config.fallback.api_key.clone_from(&toml.fallback.api_key);
    }
    if let Some(minutes) = toml.fallback.duration_minutes {
        config.fallback.duration = minutes_to_duration(minutes);
    }
    if let Some(ref model) = toml.fallback.model {
        config.fallback.model.clone_from(model);
    }
    if let Some(ref name) = toml.fallback.display_name {
        config.fallback.display_name.clone_from(name);
    }
    if let Some(ref url) = toml.fallback.base_url {
        config.fallback.base_url.clone_from(url);
    }
}

fn minutes_to_duration(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

fn parse_bool(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Apply environment variable overrides to the config
///
/// `lookup` returns the value of a variable, if set.
fn apply_env_config<F>(config: &mut RelayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Server settings from environment
    if let Some(port) = lookup("PORT") {
        if let Ok(port) = port.parse::<u16>() {
            let host = config
                .listen_addr
                .rsplit_once(':')
                .map_or("0.0.0.0", |(host, _)| host)
                .to_string();
            config.listen_addr = format!("{host}:{port}");
            config.source = ConfigSource::Env;
        }
    }
    if let Some(addr) = lookup("RELAY_LISTEN_ADDR") {
        config.listen_addr = addr;
        config.source = ConfigSource::Env;
    }

    // Host pool settings from environment
    if let Some(file) = lookup("RELAY_HOSTS_FILE") {
        config.hosts.file = PathBuf::from(file);
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = lookup("RELAY_HOST_TIMEOUT_MS") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.hosts.timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(size) = lookup("RELAY_SAMPLE_SIZE") {
        if let Ok(n) = size.parse::<usize>() {
            config.race.hosts_per_round = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(file) = lookup("RELAY_KEYS_FILE") {
        config.keys_file = PathBuf::from(file);
        config.source = ConfigSource::Env;
    }

    // Retry settings from environment
    if let Some(retries) = lookup("RELAY_MAX_RETRIES") {
        if let Ok(n) = retries.parse::<u32>() {
            config.retry.max_retries = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(delay) = lookup("RELAY_RETRY_DELAY_MS") {
        if let Ok(ms) = delay.parse::<u64>() {
            config.retry.base_delay = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(interval) = lookup("RELAY_RETRY_INTERVAL_SECS") {
        if let Ok(secs) = interval.parse::<u64>() {
            config.race.retry_interval = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(deadline) = lookup("RELAY_DEADLINE_SECS") {
        if let Ok(secs) = deadline.parse::<u64>() {
            config.race.deadline = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }

    // Fallback settings from environment
    if let Some(enabled) = lookup("RELAY_FALLBACK_ENABLED") {
        config.fallback.enabled = parse_bool(&enabled);
        config.source = ConfigSource::Env;
    }
    if let Some(key) = lookup("RELAY_FALLBACK_API_KEY") {
        config.fallback.api_key = Some(key).filter(|k| !k.is_empty());
        config.source = ConfigSource::Env;
    }
    if let Some(minutes) = lookup("RELAY_FALLBACK_DURATION_MINUTES") {
        if let Ok(m) = minutes.parse::<u64>() {
            config.fallback.duration = minutes_to_duration(m);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(model) = lookup("RELAY_FALLBACK_MODEL") {
        config.fallback.model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(name) = lookup("RELAY_FALLBACK_MODEL_NAME") {
        config.fallback.display_name = name;
        config.source = ConfigSource::Env;
    }
    if let Some(url) = lookup("RELAY_FALLBACK_BASE_URL") {
        config.fallback.base_url = url;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Listen address override
    pub listen_addr: Option<String>,

    /// Hosts file override
    pub hosts_file: Option<PathBuf>,

    /// Keys file override
    pub keys_file: Option<PathBuf>,

    /// Fallback enabled override
    pub fallback_enabled: Option<bool>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen address override
    #[must_use]
    pub fn with_listen_addr(mut self, addr: String) -> Self {
        self.listen_addr = Some(addr);
        self
    }

    /// Set hosts file override
    #[must_use]
    pub fn with_hosts_file(mut self, path: PathBuf) -> Self {
        self.hosts_file = Some(path);
        self
    }

    /// Set keys file override
    #[must_use]
    pub fn with_keys_file(mut self, path: PathBuf) -> Self {
        self.keys_file = Some(path);
        self
    }

    /// Set fallback enabled override
    #[must_use]
    pub fn with_fallback_enabled(mut self, enabled: bool) -> Self {
        self.fallback_enabled = Some(enabled);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut RelayConfig) {
        if self.listen_addr.is_some()
            || self.hosts_file.is_some()
            || self.keys_file.is_some()
            || self.fallback_enabled.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref addr) = self.listen_addr {
            config.listen_addr.clone_from(addr);
        }
        if let Some(ref path) = self.hosts_file {
            config.hosts.file.clone_from(path);
        }
        if let Some(ref path) = self.keys_file {
            config.keys_file.clone_from(path);
        }
        if let Some(enabled) = self.fallback_enabled {
            config.fallback.enabled = enabled;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
