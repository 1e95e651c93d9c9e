// Task Cancellation
// Per-task flag that device tasks check between steps and while waiting

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::device::DeviceError;

tokio::task_local! {
    static CURRENT: CancelToken;
}

#[derive(Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared cancel flag for one arbiter task
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `delay` unless cancelled first
    pub async fn sleep(&self, delay: Duration) -> Result<(), DeviceError> {
        if self.is_cancelled() {
            return Err(DeviceError::Cancelled);
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = self.cancelled() => Err(DeviceError::Cancelled),
        }
    }

    /// Run `fut` with this token visible to [`checkpoint`] and [`pause`]
    pub(crate) async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }
}

/// `Err(Cancelled)` once the surrounding arbiter task has been cancelled.
/// Outside an arbiter task this never fails.
pub fn checkpoint() -> Result<(), DeviceError> {
    match CURRENT.try_with(|token| token.is_cancelled()) {
        Ok(true) => Err(DeviceError::Cancelled),
        _ => Ok(()),
    }
}

/// Sleep that wakes early with `Err(Cancelled)` when the surrounding task is cancelled
pub async fn pause(delay: Duration) -> Result<(), DeviceError> {
    match CURRENT.try_with(|token| token.clone()) {
        Ok(token) => token.sleep(delay).await,
        Err(_) => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_wakes_sleep() {
        let token = CancelToken::new();
        let waker = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waker.cancel();
        });

        let started = std::time::Instant::now();
        let result = token.sleep(Duration::from_secs(10)).await;
        assert!(matches!(result, Err(DeviceError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_checkpoint_sees_scoped_token() {
        assert!(checkpoint().is_ok());

        let token = CancelToken::new();
        token.cancel();
        let inside = token.clone().scope(async { checkpoint() }).await;
        assert!(matches!(inside, Err(DeviceError::Cancelled)));
        assert!(matches!(
            token.scope(pause(Duration::from_secs(10))).await,
            Err(DeviceError::Cancelled)
        ));
    }
}
