//! A storage backend that fails on demand.
//!
//! [`FaultyBackend`] wraps another backend and injects I/O errors into
//! mutating calls according to a [`FailurePolicy`]. Reads, existence
//! checks and listings always pass through, so a test can inspect the
//! store after a fault.

use packdb_storage::{StorageBackend, StorageError, StorageResult, WriteStream};
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

/// A mutating backend call that can be failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    /// `open_write`.
    Write,
    /// `replace`, matched against the destination name.
    Replace,
    /// `remove`.
    Remove,
}

/// When injected failures should occur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Never fail.
    Never,
    /// Fail every `op` whose target name ends with `suffix`.
    OnName {
        /// The call to fail.
        op: FaultOp,
        /// Name suffix to match, e.g. `".rec"`.
        suffix: String,
    },
    /// Fail the first `count` matching calls, then pass through.
    Times {
        /// The call to fail.
        op: FaultOp,
        /// Name suffix to match.
        suffix: String,
        /// Number of failures to inject.
        count: usize,
    },
    /// Fail every mutating call after `n` have succeeded.
    AfterMutations(usize),
}

impl FailurePolicy {
    /// Fails `op` on names ending with `suffix`.
    pub fn on(op: FaultOp, suffix: impl Into<String>) -> Self {
        Self::OnName {
            op,
            suffix: suffix.into(),
        }
    }

    /// Fails `op` on names ending with `suffix` exactly once.
    pub fn once(op: FaultOp, suffix: impl Into<String>) -> Self {
        Self::Times {
            op,
            suffix: suffix.into(),
            count: 1,
        }
    }
}

#[derive(Debug)]
struct FaultState {
    policy: FailurePolicy,
    mutations: usize,
    failures: usize,
}

/// Backend wrapper that injects failures.
///
/// Cloning shares the policy and the counters, so a test can keep a handle
/// while the manager owns another.
#[derive(Clone)]
pub struct FaultyBackend {
    inner: Arc<dyn StorageBackend>,
    state: Arc<Mutex<FaultState>>,
}

impl FaultyBackend {
    /// Wraps `inner` with the given policy.
    pub fn new(inner: impl StorageBackend + 'static, policy: FailurePolicy) -> Self {
        Self::from_arc(Arc::new(inner), policy)
    }

    /// Wraps a shared backend with the given policy.
    pub fn from_arc(inner: Arc<dyn StorageBackend>, policy: FailurePolicy) -> Self {
        Self {
            inner,
            state: Arc::new(Mutex::new(FaultState {
                policy,
                mutations: 0,
                failures: 0,
            })),
        }
    }

    /// Returns the wrapped backend.
    pub fn inner(&self) -> &Arc<dyn StorageBackend> {
        &self.inner
    }

    /// Replaces the policy and resets the counters.
    pub fn set_policy(&self, policy: FailurePolicy) {
        let mut state = self.state.lock();
        state.policy = policy;
        state.mutations = 0;
        state.failures = 0;
    }

    /// Returns the number of failures injected since the policy was set.
    pub fn failures(&self) -> usize {
        self.state.lock().failures
    }

    /// Returns the number of mutating calls that passed through.
    pub fn mutations(&self) -> usize {
        self.state.lock().mutations
    }

    fn check(&self, op: FaultOp, name: &str) -> StorageResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let fail = match &mut state.policy {
            FailurePolicy::Never => false,
            FailurePolicy::OnName { op: target, suffix } => *target == op && name.ends_with(&*suffix),
            FailurePolicy::Times {
                op: target,
                suffix,
                count,
            } => {
                let hit = *target == op && name.ends_with(&*suffix) && *count > 0;
                if hit {
                    *count -= 1;
                }
                hit
            }
            FailurePolicy::AfterMutations(n) => state.mutations >= *n,
        };

        if fail {
            state.failures += 1;
            return Err(StorageError::Io(io::Error::other(format!(
                "injected fault: {op:?} {name}"
            ))));
        }
        state.mutations += 1;
        Ok(())
    }
}

impl fmt::Debug for FaultyBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultyBackend")
            .field("inner", &self.inner)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl StorageBackend for FaultyBackend {
    fn open_read(&self, name: &str) -> StorageResult<Option<Box<dyn Read + Send>>> {
        self.inner.open_read(name)
    }

    fn open_write(&self, name: &str) -> StorageResult<Box<dyn WriteStream>> {
        self.check(FaultOp::Write, name)?;
        self.inner.open_write(name)
    }

    fn replace(&self, from: &str, to: &str) -> StorageResult<()> {
        self.check(FaultOp::Replace, to)?;
        self.inner.replace(from, to)
    }

    fn remove(&self, name: &str) -> StorageResult<bool> {
        self.check(FaultOp::Remove, name)?;
        self.inner.remove(name)
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        self.inner.exists(name)
    }

    fn list(&self, dir: &str) -> StorageResult<Vec<String>> {
        self.inner.list(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packdb_storage::InMemoryBackend;
    use std::io::Write;

    fn put(backend: &FaultyBackend, name: &str) -> StorageResult<()> {
        let mut stream = backend.open_write(name)?;
        stream.write_all(b"x")?;
        stream.finish()
    }

    #[test]
    fn never_passes_through() {
        let backend = FaultyBackend::new(InMemoryBackend::new(), FailurePolicy::Never);
        put(&backend, "a.staged").unwrap();
        backend.replace("a.staged", "a.rec").unwrap();
        assert!(backend.exists("a.rec").unwrap());
        assert_eq!(backend.mutations(), 2);
        assert_eq!(backend.failures(), 0);
    }

    #[test]
    fn on_name_matches_replace_destination() {
        let memory = InMemoryBackend::new();
        let backend = FaultyBackend::new(memory.clone(), FailurePolicy::on(FaultOp::Replace, ".rec"));
        put(&backend, "a.rec.staged").unwrap();

        assert!(backend.replace("a.rec.staged", "a.rec").is_err());
        assert!(backend.replace("a.rec.staged", "a.rec").is_err());
        assert_eq!(backend.failures(), 2);
        assert!(memory.exists("a.rec.staged").unwrap());
        assert!(!memory.exists("a.rec").unwrap());
    }

    #[test]
    fn times_recovers() {
        let backend = FaultyBackend::new(InMemoryBackend::new(), FailurePolicy::once(FaultOp::Write, ".log.staged"));
        assert!(put(&backend, "1.log.staged").is_err());
        put(&backend, "1.log.staged").unwrap();
        assert_eq!(backend.failures(), 1);
    }

    #[test]
    fn after_mutations() {
        let backend = FaultyBackend::new(InMemoryBackend::new(), FailurePolicy::AfterMutations(1));
        put(&backend, "a").unwrap();
        assert!(put(&backend, "b").is_err());
        assert!(backend.remove("a").is_err());

        backend.set_policy(FailurePolicy::Never);
        assert!(backend.remove("a").unwrap());
    }

    #[test]
    fn clones_share_policy() {
        let backend = FaultyBackend::new(InMemoryBackend::new(), FailurePolicy::Never);
        let handle = backend.clone();
        handle.set_policy(FailurePolicy::on(FaultOp::Remove, ""));
        assert!(backend.remove("missing").is_err());
        assert_eq!(handle.failures(), 1);
    }
}
