//! Timeout-bounded per-entity locking.
//!
//! Every write-family operation of the [`crate::DataManager`] holds the
//! lock of the entity it touches from the first staged byte until the last
//! commit or discard. The semaphores behind the locks are pluggable
//! through [`SemaphoreFactory`]; [`TokioSemaphoreFactory`] is the default.

mod provider;
mod semaphore;

pub use provider::{KeyGuard, LockKey, LockProvider};
pub use semaphore::{Semaphore, SemaphoreFactory, TokioSemaphore, TokioSemaphoreFactory};
