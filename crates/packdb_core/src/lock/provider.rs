//! Per-entity locks.

use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::lock::{Semaphore, SemaphoreFactory};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identifies the entity a lock protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey {
    /// Entity kind.
    pub kind: &'static str,
    /// Entity id.
    pub id: EntityId,
}

impl LockKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(kind: &'static str, id: EntityId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Hands out one binary semaphore per [`LockKey`].
///
/// Slots are created on first use and dropped again once no guard or
/// waiter refers to them, so the table only grows with the number of
/// entities being operated on at the same time.
pub struct LockProvider {
    factory: Arc<dyn SemaphoreFactory>,
    slots: Mutex<HashMap<LockKey, Arc<dyn Semaphore>>>,
}

impl LockProvider {
    /// Creates a provider drawing semaphores from `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn SemaphoreFactory>) -> Self {
        Self {
            factory,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Waits up to `timeout` for exclusive access to `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if the lock was not acquired in
    /// time.
    pub async fn acquire(&self, key: LockKey, timeout: Duration) -> CoreResult<KeyGuard<'_>> {
        let semaphore = {
            let mut slots = self.slots.lock();
            Arc::clone(
                slots
                    .entry(key)
                    .or_insert_with(|| self.factory.create(1, 1)),
            )
        };

        if semaphore.wait(timeout).await {
            Ok(KeyGuard {
                provider: self,
                key,
                semaphore: Some(semaphore),
            })
        } else {
            self.reclaim(key, semaphore);
            Err(CoreError::LockTimeout {
                kind: key.kind,
                id: key.id,
                timeout_ms: timeout.as_millis(),
            })
        }
    }

    /// Returns the number of keys that currently have a slot.
    #[must_use]
    pub fn active(&self) -> usize {
        self.slots.lock().len()
    }

    fn reclaim(&self, key: LockKey, semaphore: Arc<dyn Semaphore>) {
        let mut slots = self.slots.lock();
        drop(semaphore);
        if slots
            .get(&key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&key);
        }
    }
}

impl fmt::Debug for LockProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockProvider")
            .field("factory", &self.factory)
            .field("active", &self.active())
            .finish()
    }
}

/// Exclusive access to one entity; released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct KeyGuard<'a> {
    provider: &'a LockProvider,
    key: LockKey,
    semaphore: Option<Arc<dyn Semaphore>>,
}

impl KeyGuard<'_> {
    /// Returns the locked key.
    #[must_use]
    pub fn key(&self) -> LockKey {
        self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        if let Some(semaphore) = self.semaphore.take() {
            semaphore.release();
            self.provider.reclaim(self.key, semaphore);
        }
    }
}

impl fmt::Debug for KeyGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGuard").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::TokioSemaphoreFactory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn provider() -> Arc<LockProvider> {
        Arc::new(LockProvider::new(Arc::new(TokioSemaphoreFactory)))
    }

    fn key(id: u64) -> LockKey {
        LockKey::new("widget", EntityId::new(id))
    }

    #[tokio::test]
    async fn second_acquire_times_out() {
        let locks = provider();
        let guard = locks.acquire(key(1), Duration::from_millis(10)).await.unwrap();
        assert_eq!(guard.key(), key(1));

        let err = locks
            .acquire(key(1), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { timeout_ms: 20, .. }));

        drop(guard);
        assert!(locks.acquire(key(1), Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = provider();
        let _first = locks.acquire(key(1), Duration::from_millis(10)).await.unwrap();
        let _second = locks.acquire(key(2), Duration::from_millis(10)).await.unwrap();
        let _other_kind = locks
            .acquire(LockKey::new("gadget", EntityId::new(1)), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(locks.active(), 3);
    }

    #[tokio::test]
    async fn slots_are_reclaimed() {
        let locks = provider();
        {
            let _guard = locks.acquire(key(1), Duration::from_millis(10)).await.unwrap();
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn holders_never_overlap() {
        let locks = provider();
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let overlaps = Arc::clone(&overlaps);
                tokio::spawn(async move {
                    let _guard = locks.acquire(key(7), Duration::from_secs(5)).await.unwrap();
                    if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::task::yield_now().await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(locks.active(), 0);
    }
}
