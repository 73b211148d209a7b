//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores over the
//! sample entities.

use crate::entities::sample_registry;
use crate::faulty::{FailurePolicy, FaultyBackend};
use packdb_core::{Config, DataManager};
use packdb_storage::{FileBackend, InMemoryBackend};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Which backend a [`TestStore`] runs on.
#[derive(Debug, Clone)]
pub enum TestBackend {
    /// Shared in-memory streams.
    Memory(InMemoryBackend),
    /// Files under a temporary directory.
    File(PathBuf),
    /// In-memory streams behind a fault injector.
    Faulty(FaultyBackend),
}

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The manager instance.
    pub manager: DataManager,
    /// Handle on the backend the manager runs on.
    pub backend: TestBackend,
    _temp_dir: Option<TempDir>,
}

/// Configuration used by every fixture: short lock timeout, no fsync.
pub fn test_config() -> Config {
    Config::new()
        .lock_timeout(Duration::from_secs(5))
        .sync_writes(false)
}

impl TestStore {
    /// Creates an in-memory store with the sample entities registered.
    pub async fn memory() -> Self {
        let backend = InMemoryBackend::new();
        let manager = DataManager::builder(backend.clone())
            .config(test_config())
            .registry(sample_registry())
            .build()
            .await
            .expect("Failed to open in-memory store");
        Self {
            manager,
            backend: TestBackend::Memory(backend),
            _temp_dir: None,
        }
    }

    /// Creates a file-backed store in a fresh temporary directory.
    pub async fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("store");
        let manager = Self::open_file(&root).await;
        Self {
            manager,
            backend: TestBackend::File(root),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Creates an in-memory store behind a [`FaultyBackend`].
    ///
    /// The policy is armed after the store is built, so recovery on open
    /// never trips it.
    pub async fn faulty(policy: FailurePolicy) -> Self {
        let backend = FaultyBackend::new(InMemoryBackend::new(), FailurePolicy::Never);
        let manager = DataManager::builder(backend.clone())
            .config(test_config())
            .registry(sample_registry())
            .build()
            .await
            .expect("Failed to open faulty store");
        backend.set_policy(policy);
        Self {
            manager,
            backend: TestBackend::Faulty(backend),
            _temp_dir: None,
        }
    }

    /// Closes and reopens the store over the same data.
    ///
    /// In-memory stores keep their streams; file stores release and
    /// retake the directory lock.
    pub async fn reopen(self) -> Self {
        let Self {
            manager,
            backend,
            _temp_dir,
        } = self;
        drop(manager);

        let manager = match &backend {
            TestBackend::Memory(memory) => DataManager::builder(memory.clone())
                .config(test_config())
                .registry(sample_registry())
                .build()
                .await
                .expect("Failed to reopen in-memory store"),
            TestBackend::File(root) => Self::open_file(root).await,
            TestBackend::Faulty(faulty) => DataManager::builder(faulty.clone())
                .config(test_config())
                .registry(sample_registry())
                .build()
                .await
                .expect("Failed to reopen faulty store"),
        };
        Self {
            manager,
            backend,
            _temp_dir,
        }
    }

    /// Returns the store root if file-based, None otherwise.
    pub fn path(&self) -> Option<&Path> {
        match &self.backend {
            TestBackend::File(root) => Some(root),
            _ => None,
        }
    }

    /// Returns the fault injector if the store has one.
    pub fn faults(&self) -> Option<&FaultyBackend> {
        match &self.backend {
            TestBackend::Faulty(faulty) => Some(faulty),
            _ => None,
        }
    }

    async fn open_file(root: &Path) -> DataManager {
        let backend = FileBackend::open(root).expect("Failed to open file backend");
        DataManager::builder(backend)
            .config(test_config())
            .registry(sample_registry())
            .build()
            .await
            .expect("Failed to open file store")
    }
}

impl std::ops::Deref for TestStore {
    type Target = DataManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use crate::entities::{Gadget, Widget};

    /// Creates a store holding `count` widgets named `widget-{id}`.
    pub async fn populated_widgets(count: u64) -> TestStore {
        let store = TestStore::memory().await;
        for id in 1..=count {
            store
                .write(&Widget::new(id, format!("widget-{id}")))
                .await
                .expect("Failed to write widget");
        }
        store
    }

    /// Creates a store holding gadgets cycling through three colors,
    /// with every fourth gadget uncolored.
    pub async fn colored_gadgets(count: u64) -> TestStore {
        const COLORS: [&str; 3] = ["red", "green", "blue"];
        let store = TestStore::memory().await;
        for id in 1..=count {
            let color = (id % 4 != 0).then(|| COLORS[(id % 3) as usize]);
            store
                .write(&Gadget::new(id, color, (id * 10) as u32))
                .await
                .expect("Failed to write gadget");
        }
        store
    }
}
