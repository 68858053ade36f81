//! Deadlines and cancellation for network calls

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{B2Error, Result};

/// Bounds a network operation with an optional deadline and cancel signal.
///
/// Cloning shares the cancel signal, so one [`CancelHandle`] aborts every call
/// made with any clone.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every call running under the paired [`RequestContext`]
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl RequestContext {
    /// No deadline, never canceled
    pub fn background() -> Self {
        Self::default()
    }

    /// Expire `timeout` from now, or earlier if a deadline is already set
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Attach a fresh cancel signal
    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        self.cancel = Some(receiver);
        (self, CancelHandle { sender })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Drive `fut` to completion unless the deadline passes or the context is
    /// canceled first; in that case `fut` is dropped, aborting its request.
    pub async fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_canceled() {
            return Err(B2Error::Canceled(operation));
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(B2Error::Timeout(operation));
        }

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        let mut cancel = self.cancel.clone();
        let canceled = async move {
            if let Some(rx) = cancel.as_mut() {
                if rx.wait_for(|canceled| *canceled).await.is_ok() {
                    return;
                }
            }
            // No signal, or the handle was dropped without canceling
            std::future::pending::<()>().await
        };

        tokio::select! {
            result = fut => result,
            _ = expired => Err(B2Error::Timeout(operation)),
            _ = canceled => Err(B2Error::Canceled(operation)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn slow(delay: Duration) -> Result<u32> {
        tokio::time::sleep(delay).await;
        Ok(7)
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_runs_to_completion() {
        let ctx = RequestContext::background();
        assert_eq!(ctx.run("slow", slow(Duration::from_secs(3600))).await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = RequestContext::background().with_timeout(Duration::from_secs(1));
        let result = ctx.run("slow", slow(Duration::from_secs(5))).await;
        assert!(matches!(result, Err(B2Error::Timeout("slow"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_deadline_wins() {
        let ctx = RequestContext::background()
            .with_timeout(Duration::from_secs(2))
            .with_timeout(Duration::from_secs(60));
        let remaining = ctx.deadline().unwrap() - Instant::now();
        assert_eq!(remaining, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_call() {
        let (ctx, handle) = RequestContext::background().cancellable();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });

        let result = ctx.run("slow", slow(Duration::from_secs(5))).await;
        assert!(matches!(result, Err(B2Error::Canceled("slow"))));
        assert!(ctx.is_canceled());
    }

    #[tokio::test]
    async fn test_canceled_context_fails_fast() {
        let (ctx, handle) = RequestContext::background().cancellable();
        handle.cancel();
        let result = ctx.clone().run("op", async { Ok(1) }).await;
        assert!(matches!(result, Err(B2Error::Canceled("op"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_never_cancels() {
        let (ctx, handle) = RequestContext::background().cancellable();
        drop(handle);
        assert_eq!(ctx.run("slow", slow(Duration::from_secs(1))).await.unwrap(), 7);
    }
}
