//! One-shot cancellable timers for idle-session expiry.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;

/// Handle to a pending one-shot timer.
///
/// The scheduled action fires exactly once after the delay unless the handle
/// is cancelled first. Cancelling consumes the handle, and dropping it
/// cancels too, so replacing a stored handle atomically disarms the old
/// timer. Cancelling after the action has fired is a no-op.
#[derive(Debug)]
pub struct TimerHandle {
    cancel: oneshot::Sender<()>,
}

impl TimerHandle {
    /// Disarm the timer. Has no effect if the action already fired.
    pub fn cancel(self) {
        let _ = self.cancel.send(());
    }
}

/// Arm a one-shot timer that runs `action` on its own task after `delay`.
pub fn schedule<F, Fut>(delay: Duration, action: F) -> TimerHandle
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => action().await,
            _ = rx => {}
        }
    });
    TimerHandle { cancel: tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fires_once_after_the_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let _handle = schedule(Duration::from_millis(20), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_prevents_the_action() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let handle = schedule(Duration::from_millis(30), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropping_the_handle_cancels() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let handle = schedule(Duration::from_millis(30), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(handle);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_after_firing_is_a_no_op() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let handle = schedule(Duration::from_millis(10), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
