//! Interruptible pacing delay
//!
//! This module provides the delay primitive worker loops use to pace their
//! I/O attempts. A pending wait can be cut short with `wake`, which is how
//! a freshly updated outbound packet preempts the remainder of the current
//! pacing interval.

use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::time::sleep;

/// A cancellable, wakeable timed wait.
///
/// Single-waiter semantics: each instance supports one outstanding `wait`
/// at a time, which holds in practice because every worker loop owns
/// exactly one `WakeDelay`. A `wake` with no outstanding wait is a no-op
/// and has no effect on the next `wait`; wakes are never queued.
pub struct WakeDelay {
    /// Completion handle for the wait currently in flight, if any.
    slot: Mutex<Option<oneshot::Sender<()>>>,
}

impl WakeDelay {
    /// Create a new delay with no wait outstanding.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Wait for `duration` to elapse, or until `wake` is called,
    /// whichever comes first.
    pub async fn wait(&self, duration: Duration) {
        let (wake_tx, wake_rx) = oneshot::channel();
        *self.slot.lock().await = Some(wake_tx);

        tokio::select! {
            _ = sleep(duration) => {}
            _ = wake_rx => {}
        }

        // The timer won or the wait was abandoned; drop the stale handle so
        // a later wake cannot observe this wait as still pending.
        *self.slot.lock().await = None;
    }

    /// Complete the outstanding wait immediately and cancel its timer.
    ///
    /// No-op when no wait is pending.
    pub async fn wake(&self) {
        if let Some(wake_tx) = self.slot.lock().await.take() {
            let _ = wake_tx.send(());
        }
    }
}

impl Default for WakeDelay {
    fn default() -> Self {
        Self::new()
    }
}
