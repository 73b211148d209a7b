//! Timeout-bounded semaphores.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore as TokioSemaphoreInner;
use tokio::time;

/// A counting semaphore whose waits always end.
#[async_trait]
pub trait Semaphore: Send + Sync + fmt::Debug {
    /// Takes one permit, waiting at most `timeout`.
    ///
    /// Returns false if no permit became available in time.
    async fn wait(&self, timeout: Duration) -> bool;

    /// Returns one permit and reports how many permits were available
    /// before it was returned.
    ///
    /// Releasing a semaphore that already holds its maximum is a no-op.
    fn release(&self) -> usize;

    /// Returns the number of permits currently available.
    fn available(&self) -> usize;
}

/// Creates semaphores for the lock provider.
pub trait SemaphoreFactory: Send + Sync + fmt::Debug {
    /// Creates a semaphore starting with `initial` permits that never
    /// holds more than `max`.
    fn create(&self, initial: usize, max: usize) -> Arc<dyn Semaphore>;
}

/// [`Semaphore`] backed by [`tokio::sync::Semaphore`].
///
/// Waiters are served in FIFO order, so per-id operations run in the
/// order their locks were requested.
pub struct TokioSemaphore {
    inner: TokioSemaphoreInner,
    max: usize,
    release_lock: Mutex<()>,
}

impl TokioSemaphore {
    /// Creates a semaphore with `initial` permits, capped at `max`.
    #[must_use]
    pub fn new(initial: usize, max: usize) -> Self {
        let max = max.max(1);
        Self {
            inner: TokioSemaphoreInner::new(initial.min(max)),
            max,
            release_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl Semaphore for TokioSemaphore {
    async fn wait(&self, timeout: Duration) -> bool {
        match time::timeout(timeout, self.inner.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                true
            }
            Ok(Err(_)) | Err(_) => false,
        }
    }

    fn release(&self) -> usize {
        let _guard = self.release_lock.lock();
        let available = self.inner.available_permits();
        if available < self.max {
            self.inner.add_permits(1);
        }
        available
    }

    fn available(&self) -> usize {
        self.inner.available_permits()
    }
}

impl fmt::Debug for TokioSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioSemaphore")
            .field("available", &self.inner.available_permits())
            .field("max", &self.max)
            .finish()
    }
}

/// Default factory producing [`TokioSemaphore`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSemaphoreFactory;

impl SemaphoreFactory for TokioSemaphoreFactory {
    fn create(&self, initial: usize, max: usize) -> Arc<dyn Semaphore> {
        Arc::new(TokioSemaphore::new(initial, max))
    }
}
