//! Relay Core - Race Dispatcher for Interchangeable Inference Hosts
//!
//! This crate turns one inference request into a race across a pool of
//! equivalent backend hosts. The first host to answer wins; everyone else is
//! torn down. When a whole host set fails, fresh sets are drawn every few
//! seconds until a deadline. When the pool as a whole is rate limited, traffic
//! moves to a secondary provider for a while.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Inbound surface (daemon)                     │
//! │        POST /v1/chat/completions        POST /v1/embeddings      │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ payload + stream flag
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                          RELAY CORE                              │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                        Dispatcher                          │  │
//! │  │  ┌──────────┐  ┌───────────┐  ┌──────────┐  ┌───────────┐  │  │
//! │  │  │ HostPool │  │ KeyPool   │  │   Race   │  │ Fallback  │  │  │
//! │  │  │ (sample) │  │ (next)    │  │ + Retry  │  │ Breaker   │  │  │
//! │  │  └──────────┘  └───────────┘  └────┬─────┘  └───────────┘  │  │
//! │  │                                    │                       │  │
//! │  │                  Attempt ──▶ Upstream (reqwest)            │  │
//! │  │                                    │                       │  │
//! │  │                  winner ──▶ NormalizedStream               │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Dispatcher`]: entry point; one call per inbound request
//! - [`Race`]: fan-out, first-winner arbitration, retry rounds
//! - [`Attempt`]: one host, bounded retries, breaker-aware routing
//! - [`FallbackBreaker`]: process-wide rate-limit reroute with a TTL
//! - [`NormalizedStream`]: rewrites a winning stream into canonical chunks
//! - [`HostPool`] / [`CredentialProvider`]: the collaborators a race draws from
//!
//! # Quick Start
//!
//! ```ignore
//! use relay_core::{config::load_config, DispatchResponse, Dispatcher};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let dispatcher = Dispatcher::from_config(&config)?;
//!
//!     let payload = serde_json::json!({
//!         "model": "llama",
//!         "messages": [{"role": "user", "content": "hi"}]
//!     });
//!     match dispatcher.chat_completions(payload, false).await? {
//!         DispatchResponse::Complete(body) => println!("{body}"),
//!         DispatchResponse::Stream(_) => unreachable!(),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`dispatch`]: race, attempts, retry rounds, breaker, stream normalization
//! - [`hosts`]: host descriptors and the static host pool
//! - [`credentials`]: bearer tokens and the API key pool
//! - [`config`]: TOML + environment configuration
//! - [`error`]: attempt and dispatch errors
//!
//! # No HTTP Server Dependencies
//!
//! This crate does not depend on any server framework. The daemon owns the
//! inbound surface; the core only sees a payload and a stream flag.

#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod hosts;

// Dispatch
pub use dispatch::{
    Attempt, AttemptRequest, CancelHandle, CancelOnDrop, DispatchResponse, Dispatcher, Endpoint,
    FallbackBreaker, FallbackConfig, HttpUpstream, NormalizedStream, Race, RaceConfig, RelayStream,
    RetryPolicy, Upstream, UpstreamResponse,
};

// Collaborators
pub use credentials::{Credential, CredentialProvider, KeyPool};
pub use hosts::{HostDescriptor, HostPool, StaticHostPool};

// Configuration and errors
pub use config::{load_config, load_config_from_path, ConfigError, ConfigOverrides, RelayConfig};
pub use error::{AttemptError, RelayError};
