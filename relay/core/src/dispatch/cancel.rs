//! Cancellation handle for races and relayed streams

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture, WaitForCancellationFutureOwned};

/// Caller-side hook for abandoning a request
///
/// Cancelling before a winner is chosen aborts every in-flight attempt.
/// Cancelling afterwards releases the adopted stream; no further chunks are
/// emitted.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Fresh, uncancelled handle
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation is requested
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub(crate) fn cancelled_owned(&self) -> WaitForCancellationFutureOwned {
        self.token.clone().cancelled_owned()
    }
}

/// Cancels the handle when dropped, unless disarmed
///
/// Tie one to whatever owns the caller's connection so a disconnect reaches
/// the race.
#[derive(Debug)]
pub struct CancelOnDrop {
    handle: CancelHandle,
    armed: bool,
}

impl CancelOnDrop {
    /// Armed guard over `handle`
    #[must_use]
    pub fn new(handle: CancelHandle) -> Self {
        Self { handle, armed: true }
    }

    /// Keep the handle alive past this guard
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.handle.cancel();
        }
    }
}
