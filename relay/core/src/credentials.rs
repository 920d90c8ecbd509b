//! Credential Pool
//!
//! Bearer tokens for the primary host pool. One credential is drawn per race
//! and shared by every attempt in it.
//!
//! [`KeyPool`] reads the key file once at startup:
//!
//! ```json
//! {
//!   "apiKeys": [
//!     { "key": "gaia-...", "description": "main", "isActive": true,
//!       "wallet": "0x...", "createdAt": "2025-01-01T00:00:00Z" }
//!   ]
//! }
//! ```
//!
//! Inactive keys are never handed out. The pool does not write the file back.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::Deserialize;

use crate::error::RelayError;

/// Opaque bearer token
///
/// `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Arc<str>);

impl Credential {
    /// Wrap a raw token
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self(token.into())
    }

    /// The raw token, for building the Authorization header
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Source of bearer tokens
pub trait CredentialProvider: Send + Sync {
    /// One valid token
    ///
    /// # Errors
    ///
    /// Fails when the pool is empty or every key is inactive.
    fn next(&self) -> Result<Credential, RelayError>;
}

/// One entry of the key file
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    /// The token
    pub key: String,
    /// Free-form label
    #[serde(default)]
    pub description: Option<String>,
    /// Inactive keys are skipped
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Wallet the key is billed to
    #[serde(default)]
    pub wallet: Option<String>,
    /// When the key was issued
    #[serde(default)]
    pub created_at: Option<String>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeysFile {
    #[serde(default)]
    api_keys: Vec<ApiKeyRecord>,
}

/// Read-only pool of API keys
#[derive(Clone, Debug, Default)]
pub struct KeyPool {
    keys: Vec<ApiKeyRecord>,
}

impl KeyPool {
    /// Pool over explicit records
    #[must_use]
    pub fn new(keys: Vec<ApiKeyRecord>) -> Self {
        Self { keys }
    }

    /// Pool over bare tokens, all active
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = tokens
            .into_iter()
            .map(|key| ApiKeyRecord {
                key: key.into(),
                description: None,
                is_active: true,
                wallet: None,
                created_at: None,
            })
            .collect();
        Self { keys }
    }

    /// Load the key file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path).map_err(|source| RelayError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let file: KeysFile =
            serde_json::from_str(&content).map_err(|source| RelayError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;

        let pool = Self::new(file.api_keys);
        tracing::info!(
            path = %path.display(),
            total = pool.keys.len(),
            active = pool.active_count(),
            "Loaded API key pool"
        );
        Ok(pool)
    }

    /// Number of keys that can be handed out
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.keys.iter().filter(|k| k.is_active).count()
    }
}

impl CredentialProvider for KeyPool {
    fn next(&self) -> Result<Credential, RelayError> {
        if self.keys.is_empty() {
            return Err(RelayError::NoCredentials);
        }
        let active: Vec<&ApiKeyRecord> = self.keys.iter().filter(|k| k.is_active).collect();
        active
            .choose(&mut rand::thread_rng())
            .map(|record| Credential::new(record.key.as_str()))
            .ok_or(RelayError::NoActiveCredentials)
    }
}
