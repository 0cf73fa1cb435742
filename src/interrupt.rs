//! Operator interrupt (Ctrl+C) shared by the waits of the session.

use crate::error::{StimError, StimResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Latched interrupt flag.
///
/// Set by the signal listener, observed by every cancellable wait, cleared by
/// the controller once it has recovered.
#[derive(Debug, Clone)]
pub struct Interrupt {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    /// New, untriggered flag.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Latch the flag.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Reset the flag after recovery.
    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    /// Whether the flag is latched.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is latched.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|set| *set).await;
    }

    /// Sleep that aborts with [`StimError::Interrupted`].
    pub async fn sleep(&self, duration: Duration) -> StimResult<()> {
        self.sleep_until(Instant::now() + duration).await
    }

    /// Sleep until `deadline` unless interrupted first.
    pub async fn sleep_until(&self, deadline: Instant) -> StimResult<()> {
        tokio::select! {
            biased;
            _ = self.triggered() => Err(StimError::Interrupted),
            _ = tokio::time::sleep_until(deadline) => Ok(()),
        }
    }
}
