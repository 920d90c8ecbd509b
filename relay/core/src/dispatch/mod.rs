//! Race Dispatch
//!
//! Everything between "a request arrived" and "here is the one response".
//!
//! # Architecture
//!
//! ```text
//! Dispatcher::dispatch
//!   │ sample hosts, draw credential
//!   ▼
//! Race ──spawn──▶ Attempt::run (per host) ──route?──▶ FallbackBreaker
//!   │                   │
//!   │                   └── Upstream::send (one HTTP call)
//!   │
//!   ├─ first success ──▶ NormalizedStream (streaming) ──▶ caller
//!   └─ initial set spent ──▶ RetrySchedule ──▶ more rounds until the deadline
//! ```
//!
//! # Design Principles
//!
//! 1. **One owner**: race state lives in a single `select!` loop
//! 2. **Rebuild, don't mutate**: every retry builds a fresh outbound call
//! 3. **Lazy expiry**: the breaker window is checked, never timed out
//! 4. **Nothing dropped silently**: unparseable stream fragments pass through

#![allow(missing_docs)]

pub mod attempt;
pub mod breaker;
pub mod cancel;
pub mod config;
pub mod dispatcher;
pub mod normalizer;
pub mod race;
pub mod retry_loop;
pub mod upstream;

pub use attempt::{Attempt, AttemptRequest};
pub use breaker::{BreakerSnapshot, FallbackBreaker, Route, SecondaryRoute};
pub use cancel::{CancelHandle, CancelOnDrop};
pub use config::{Endpoint, FallbackConfig, RaceConfig, RetryPolicy};
pub use dispatcher::{DispatchResponse, Dispatcher, RelayStream};
pub use normalizer::{normalize_fragment, CanonicalChunk, NormalizedStream};
pub use race::{Race, RaceWinner};
pub use retry_loop::{RetryDecision, RetrySchedule};
pub use upstream::{ByteStream, HttpUpstream, OutboundCall, Upstream, UpstreamResponse};
