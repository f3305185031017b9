//! Idempotent close handle for a hijacked connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// Signals every session task that the connection is closing.
///
/// Only the first [`close`](Self::close) has an effect; clones share state.
#[derive(Debug, Clone, Default)]
pub struct ConnectionCloser {
    closed: Arc<AtomicBool>,
    token: CancellationToken,
}

impl ConnectionCloser {
    /// Creates an open handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes the connection, returning `true` only for the call that
    /// actually closed it.
    #[must_use = "the result reports whether this call performed the close"]
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Returns whether the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Completes once the connection has been closed.
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }
}
