//! One-shot readiness latches.

use std::time::Duration;

use tokio::sync::watch;

/// A one-shot barrier: once set it stays set, and waiters that arrive
/// late observe it immediately. Cloning yields handles onto the same
/// latch.
#[derive(Debug, Clone)]
pub struct Latch {
    state: watch::Sender<bool>,
}

impl Latch {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self { state }
    }

    /// Trip the latch. Idempotent.
    pub fn set(&self) {
        self.state.send_replace(true);
    }

    pub fn is_set(&self) -> bool {
        *self.state.borrow()
    }

    /// Wait until the latch is set.
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // The sender half lives in `self`, so this cannot fail.
        let _ = rx.wait_for(|set| *set).await;
    }

    /// Wait with a deadline; returns whether the latch was set in time.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}
