//! Request Cancellation
//!
//! Every request carries a [`CancelToken`]: a clonable handle that the
//! transport trips on client disconnect or deadline expiry, and that backend
//! calls race against. Cancellation is level-triggered; once tripped it stays
//! tripped, and late observers see it immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Clonable cancellation handle shared between a request's participants
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Create a fresh, untripped token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token; all current and future waiters wake immediately
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Whether the token has been tripped
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Wait until the token is tripped
    pub async fn cancelled(&self) {
        // Check-then-wait loop: a trip between the check and notified() is
        // caught by notify_waiters storing the flag first.
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Spawn a watchdog that trips the token after `deadline`
    ///
    /// Returns immediately; the token itself keeps the watchdog alive.
    pub fn trip_after(&self, deadline: Duration) {
        let token = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            token.cancel();
        });
    }
}
