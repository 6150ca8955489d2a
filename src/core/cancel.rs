//! Cooperative cancellation for long-running story runs.
//!
//! A full batch can take tens of minutes, so every suspension point in the
//! pipeline (submission, probe, poll delay, inter-page delay) races its work
//! against the token.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Cloneable handle; cancelling any clone cancels all of them.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        // send_replace works even when nobody is subscribed yet
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleeps for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        self.check()?;
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(Cancelled),
        }
    }

    /// Drives `fut` to completion unless cancelled first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        self.check()?;
        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancelled() => Err(Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() {
        let token = CancelToken::new();
        let clone = token.clone();
        let handle = tokio::spawn(async move { clone.sleep(Duration::from_secs(3600)).await });

        tokio::task::yield_now().await;
        token.cancel();

        let result = handle.await.unwrap();
        assert_eq!(result, Err(Cancelled));
    }

    #[tokio::test]
    async fn test_already_cancelled_short_circuits() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.sleep(Duration::ZERO).await, Err(Cancelled));
        assert_eq!(token.run(async { 1 }).await, Err(Cancelled));
    }

    #[tokio::test]
    async fn test_run_passes_output_through() {
        let token = CancelToken::new();
        assert_eq!(token.run(async { 42 }).await, Ok(42));
        assert!(token.sleep(Duration::from_millis(1)).await.is_ok());
    }
}
