//! Builder for [`DataManager`].

use crate::config::Config;
use crate::entity::{Entity, EntitySchema, SchemaRegistry};
use crate::error::CoreResult;
use crate::lock::{LockProvider, SemaphoreFactory, TokioSemaphoreFactory};
use crate::manager::DataManager;
use crate::streams::Streams;
use packdb_storage::StorageBackend;
use std::sync::Arc;
use tracing::debug;

/// Collects the backend, configuration and entity schemas of a store.
///
/// ```rust,ignore
/// let manager = DataManager::builder(FileBackend::open(path)?)
///     .config(Config::new().lock_timeout(Duration::from_secs(5)))
///     .register::<Widget>()?
///     .register::<Gadget>()?
///     .build()
///     .await?;
/// ```
pub struct DataManagerBuilder {
    backend: Arc<dyn StorageBackend>,
    config: Config,
    registry: SchemaRegistry,
    semaphores: Arc<dyn SemaphoreFactory>,
}

impl DataManagerBuilder {
    /// Creates a builder over a shared backend.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            config: Config::default(),
            registry: SchemaRegistry::new(),
            semaphores: Arc::new(TokioSemaphoreFactory),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Replaces the schema registry with a prepared one.
    #[must_use]
    pub fn registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registers `T` with its default schema.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::InvalidSchema`] if the schema is invalid.
    pub fn register<T: Entity>(mut self) -> CoreResult<Self> {
        self.registry.register::<T>()?;
        Ok(self)
    }

    /// Registers `T` with an explicit schema.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::InvalidSchema`] if the schema is invalid.
    pub fn register_schema<T: Entity>(mut self, schema: EntitySchema<T>) -> CoreResult<Self> {
        self.registry.register_schema(schema)?;
        Ok(self)
    }

    /// Sets the factory that creates the per-id semaphores.
    #[must_use]
    pub fn semaphore_factory(mut self, factory: Arc<dyn SemaphoreFactory>) -> Self {
        self.semaphores = factory;
        self
    }

    /// Builds the manager, discarding staged leftovers first if
    /// [`Config::recover_on_open`] is set.
    ///
    /// # Errors
    ///
    /// Returns an error if recovery fails.
    pub async fn build(self) -> CoreResult<DataManager> {
        let manager = DataManager::new(
            self.config,
            Arc::new(self.registry),
            Streams::new(self.backend),
            LockProvider::new(self.semaphores),
        );

        if manager.config().recover_on_open {
            let removed = manager.recover().await?;
            debug!(removed, kinds = manager.registry().len(), "store opened");
        }
        Ok(manager)
    }
}

impl std::fmt::Debug for DataManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataManagerBuilder")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
