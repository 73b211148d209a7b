//! Store configuration.

use std::time::Duration;

/// Configuration for opening a [`crate::DataManager`].
#[derive(Debug, Clone)]
pub struct Config {
    /// How long an operation waits for the per-id lock before failing
    /// with [`crate::CoreError::LockTimeout`].
    pub lock_timeout: Duration,

    /// Whether finished streams are synced to disk (file stores only).
    pub sync_writes: bool,

    /// Whether leftover staged files from an interrupted process are
    /// discarded when the manager is built.
    pub recover_on_open: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
            sync_writes: true,
            recover_on_open: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-id lock timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets whether finished streams are synced to disk.
    #[must_use]
    pub const fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Sets whether staged leftovers are discarded on open.
    #[must_use]
    pub const fn recover_on_open(mut self, value: bool) -> Self {
        self.recover_on_open = value;
        self
    }
}
