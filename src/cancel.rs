//! Cancellation token passed through long-running engine operations.
//!
//! Operations that shell out to git (rebase, push, pull, ls-remote) or the
//! host API accept a [`CancelToken`]. The driver checks the token before each
//! subcommand; cancellation between two subcommands is a clean exit with
//! [`Error::Cancelled`]. Cancellation *during* a rebase leaves the VCS in its
//! conflict state, which the caller recovers from via `continue_rebase` or a
//! manual abort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::{Error, Result};

/// A cloneable cancellation handle. Answers "has cancel been requested?" and
/// delivers a done signal to async waiters.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; wakes all waiters.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` if cancellation has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once cancellation is requested (the "done" signal).
    pub async fn cancelled(&self) {
        loop {
            // Register interest before re-checking the flag so a concurrent
            // cancel() between the check and the await cannot be missed.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Wire this token to SIGINT so a caller-level Ctrl-C aborts in-flight
    /// subprocess work. Intended for CLI frontends; only the first hook per
    /// process succeeds.
    pub fn hook_ctrlc(&self) -> std::result::Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || token.cancel())
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
