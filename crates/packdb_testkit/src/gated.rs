//! A storage backend that holds one `replace` until the test lets it go.
//!
//! [`GatedBackend`] parks the first `replace` whose destination equals the
//! gated name, which freezes an operation between two of its steps. The
//! blocked call runs on a blocking thread, so the test keeps reading the
//! store while the writer waits.

use packdb_storage::{StorageBackend, StorageResult, WriteStream};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct GateState {
    armed: bool,
    open: bool,
}

#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    released: Condvar,
    reached: Notify,
}

/// Backend wrapper that blocks a chosen `replace`.
///
/// Cloning shares the gate.
#[derive(Clone)]
pub struct GatedBackend {
    inner: Arc<dyn StorageBackend>,
    target: String,
    gate: Arc<Gate>,
}

impl GatedBackend {
    /// Wraps `inner`, gating replaces onto `target`. The gate starts
    /// disarmed.
    pub fn new(inner: impl StorageBackend + 'static, target: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(inner),
            target: target.into(),
            gate: Arc::new(Gate::default()),
        }
    }

    /// Blocks the next replace onto the target.
    pub fn arm(&self) {
        let mut state = self.gate.state.lock();
        state.armed = true;
        state.open = false;
    }

    /// Waits until a replace is parked at the gate.
    pub async fn reached(&self) {
        self.gate.reached.notified().await;
    }

    /// Lets the parked replace continue.
    pub fn release(&self) {
        let mut state = self.gate.state.lock();
        state.open = true;
        self.gate.released.notify_all();
    }

    fn pass(&self, to: &str) {
        if to != self.target {
            return;
        }
        let mut state = self.gate.state.lock();
        if !state.armed {
            return;
        }
        state.armed = false;
        self.gate.reached.notify_one();
        while !state.open {
            self.gate.released.wait(&mut state);
        }
    }
}

impl fmt::Debug for GatedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatedBackend")
            .field("inner", &self.inner)
            .field("target", &self.target)
            .field("state", &*self.gate.state.lock())
            .finish()
    }
}

impl StorageBackend for GatedBackend {
    fn open_read(&self, name: &str) -> StorageResult<Option<Box<dyn Read + Send>>> {
        self.inner.open_read(name)
    }

    fn open_write(&self, name: &str) -> StorageResult<Box<dyn WriteStream>> {
        self.inner.open_write(name)
    }

    fn replace(&self, from: &str, to: &str) -> StorageResult<()> {
        self.pass(to);
        self.inner.replace(from, to)
    }

    fn remove(&self, name: &str) -> StorageResult<bool> {
        self.inner.remove(name)
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        self.inner.exists(name)
    }

    fn list(&self, dir: &str) -> StorageResult<Vec<String>> {
        self.inner.list(dir)
    }
}
