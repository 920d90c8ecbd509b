//! Host Pool
//!
//! Candidate backends the dispatcher races against. The dispatcher only ever
//! calls [`HostPool::sample`]; where the hosts come from is the pool's business.
//!
//! [`StaticHostPool`] loads a list of node identifiers from a JSON file:
//!
//! ```json
//! { "hosts": ["node-a", "node-b", "node-c"] }
//! ```
//!
//! and expands each identifier into a base URL through a template
//! (`https://{id}.gaia.domains` by default).

use std::path::Path;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::Deserialize;

use crate::error::RelayError;

/// Placeholder replaced by the host identifier in URL templates
pub const HOST_ID_PLACEHOLDER: &str = "{id}";

/// Default URL template for host identifiers
pub const DEFAULT_URL_TEMPLATE: &str = "https://{id}.gaia.domains";

/// Default per-request timeout
pub const DEFAULT_HOST_TIMEOUT: Duration = Duration::from_millis(30_000);

/// One candidate backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostDescriptor {
    /// Identifier used in logs
    pub id: String,
    /// Base address, without trailing slash
    pub base_url: String,
    /// Per-call timeout
    pub timeout: Duration,
}

impl HostDescriptor {
    /// Create a descriptor
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url: String = base_url.into();
        Self {
            id: id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Full URL for an endpoint path
    #[must_use]
    pub fn url_for(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.base_url)
    }
}

/// Source of candidate hosts
///
/// Implementations must treat `sample` as read-only: drawing hosts for a race
/// never changes what later draws can see.
pub trait HostPool: Send + Sync {
    /// Up to `n` hosts in random order
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NoHosts`] when the pool has nothing to offer.
    fn sample(&self, n: usize) -> Result<Vec<HostDescriptor>, RelayError>;
}

#[derive(Debug, Deserialize)]
struct HostsFile {
    #[serde(default)]
    hosts: Vec<String>,
}

/// Fixed host list, sampled uniformly
#[derive(Clone, Debug, Default)]
pub struct StaticHostPool {
    hosts: Vec<HostDescriptor>,
}

impl StaticHostPool {
    /// Pool over explicit descriptors
    #[must_use]
    pub fn new(hosts: Vec<HostDescriptor>) -> Self {
        Self { hosts }
    }

    /// Pool over identifiers expanded through `url_template`
    pub fn from_ids<I, S>(ids: I, url_template: &str, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = ids
            .into_iter()
            .map(|id| {
                let id = id.as_ref().trim();
                HostDescriptor::new(id, url_template.replace(HOST_ID_PLACEHOLDER, id), timeout)
            })
            .filter(|h| !h.id.is_empty())
            .collect();
        Self { hosts }
    }

    /// Load identifiers from a hosts file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not `{"hosts": [...]}`.
    pub fn load(path: &Path, url_template: &str, timeout: Duration) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path).map_err(|source| RelayError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let file: HostsFile =
            serde_json::from_str(&content).map_err(|source| RelayError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;

        let pool = Self::from_ids(&file.hosts, url_template, timeout);
        tracing::info!(
            path = %path.display(),
            hosts = pool.len(),
            "Loaded host pool"
        );
        Ok(pool)
    }

    /// Number of hosts in the pool
    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Whether the pool is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// All hosts, in load order
    #[must_use]
    pub fn hosts(&self) -> &[HostDescriptor] {
        &self.hosts
    }
}

impl HostPool for StaticHostPool {
    fn sample(&self, n: usize) -> Result<Vec<HostDescriptor>, RelayError> {
        if self.hosts.is_empty() {
            return Err(RelayError::NoHosts);
        }
        let mut rng = rand::thread_rng();
        Ok(self.hosts.choose_multiple(&mut rng, n).cloned().collect())
    }
}
