//! The transactional data manager.

mod builder;

pub use builder::DataManagerBuilder;

use crate::audit::{AuditLog, AuditStore};
use crate::config::Config;
use crate::entity::{Entity, EntityId, RecordStore, SchemaRegistry};
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexStore, IndexValue};
use crate::lock::{KeyGuard, LockKey, LockProvider};
use crate::streams::Streams;
use crate::transaction::{Journal, Participants, Undo};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use packdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Entry point to a PackDB store.
///
/// The manager owns the record, index and audit stores and drives them
/// through a matched stage / commit / discard sequence for every write.
/// Each write-family operation:
///
/// 1. Takes the per-id lock (bounded by [`Config::lock_timeout`])
/// 2. Stages the record and updates the indexes
/// 3. Stages the audit event
/// 4. Commits the record, then the audit log
///
/// and, if any step fails, reverses the completed steps before the lock
/// is released. Operations on different ids run concurrently.
///
/// # Example
///
/// ```rust
/// use packdb_core::{DataManager, Entity, EntityId, EntitySchema, Identifiable};
/// use packdb_storage::InMemoryBackend;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Widget {
///     id: EntityId,
///     name: String,
/// }
///
/// impl Identifiable for Widget {
///     fn id(&self) -> EntityId {
///         self.id
///     }
/// }
///
/// impl Entity for Widget {
///     const KIND: &'static str = "widget";
///
///     fn schema() -> EntitySchema<Self> {
///         EntitySchema::new().unique_index("name", |w: &Widget| w.name.clone())
///     }
/// }
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let manager = DataManager::builder(InMemoryBackend::new())
///     .register::<Widget>()?
///     .build()
///     .await?;
///
/// let id = manager.get_next_id::<Widget>().await?;
/// let widget = Widget { id, name: "gear".into() };
/// manager.write(&widget).await?;
/// assert_eq!(manager.read::<Widget>(id).await?, widget);
/// # Ok::<(), packdb_core::CoreError>(())
/// # }).unwrap();
/// ```
pub struct DataManager {
    config: Config,
    registry: Arc<SchemaRegistry>,
    streams: Streams,
    participants: Participants,
    locks: LockProvider,
}

impl DataManager {
    /// Starts building a manager over `backend`.
    pub fn builder(backend: impl StorageBackend + 'static) -> DataManagerBuilder {
        DataManagerBuilder::new(Arc::new(backend))
    }

    /// Opens a file-backed store rooted at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be opened or locked, or
    /// if recovery fails.
    pub async fn open(
        path: impl AsRef<Path>,
        config: Config,
        registry: SchemaRegistry,
    ) -> CoreResult<Self> {
        let backend = FileBackend::open(path.as_ref())?.sync_on_finish(config.sync_writes);
        Self::builder(backend)
            .config(config)
            .registry(registry)
            .build()
            .await
    }

    /// Opens an empty in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager cannot be built.
    pub async fn open_in_memory(registry: SchemaRegistry) -> CoreResult<Self> {
        Self::builder(InMemoryBackend::new())
            .registry(registry)
            .build()
            .await
    }

    pub(crate) fn new(
        config: Config,
        registry: Arc<SchemaRegistry>,
        streams: Streams,
        locks: LockProvider,
    ) -> Self {
        let participants = Participants {
            records: RecordStore::new(streams.clone()),
            indexes: IndexStore::new(streams.clone(), Arc::clone(&registry)),
            audit: AuditStore::new(streams.clone(), Arc::clone(&registry)),
        };
        Self {
            config,
            registry,
            streams,
            participants,
            locks,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the schema registry.
    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Returns the storage backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        self.streams.backend()
    }

    /// Returns the record store.
    #[must_use]
    pub fn records(&self) -> &RecordStore {
        &self.participants.records
    }

    /// Returns the index store.
    #[must_use]
    pub fn indexes(&self) -> &IndexStore {
        &self.participants.indexes
    }

    /// Returns the audit store.
    #[must_use]
    pub fn audit(&self) -> &AuditStore {
        &self.participants.audit
    }

    /// Returns the lock provider.
    #[must_use]
    pub fn locks(&self) -> &LockProvider {
        &self.locks
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Reads the committed entity `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the entity does not exist or is
    /// soft-deleted.
    pub async fn read<T: Entity>(&self, id: EntityId) -> CoreResult<T> {
        self.registry.schema::<T>()?;
        self.participants.records.read(id).await
    }

    /// Lazily reads the given ids in order.
    ///
    /// Ids without a committed, non-deleted record are skipped. A record
    /// that fails to load is yielded as an `Err` item and the stream
    /// continues with the next id.
    pub fn read_many<T: Entity>(
        &self,
        ids: impl IntoIterator<Item = EntityId>,
    ) -> BoxStream<'_, CoreResult<T>> {
        if let Err(err) = self.registry.schema::<T>() {
            return stream::iter([Err(err)]).boxed();
        }
        let ids: Vec<EntityId> = ids.into_iter().collect();
        stream::iter(ids)
            .filter_map(move |id| async move {
                self.participants.records.try_read::<T>(id).await.transpose()
            })
            .boxed()
    }

    /// Lazily reads every committed entity of `T` in id order.
    ///
    /// Failures are reported the same way as [`DataManager::read_many`].
    pub fn read_all<T: Entity>(&self) -> BoxStream<'_, CoreResult<T>> {
        if let Err(err) = self.registry.schema::<T>() {
            return stream::iter([Err(err)]).boxed();
        }
        self.participants.records.read_all()
    }

    /// Lazily reads the entities whose `property` index maps to `key`.
    ///
    /// An unknown key yields an empty stream. A `property` that `T` does
    /// not index yields a single [`CoreError::IndexNotDeclared`].
    ///
    /// Every candidate is checked against its committed record, so an
    /// index entry published by a write that has not committed yet is
    /// skipped.
    pub fn read_index<T: Entity>(
        &self,
        key: impl Into<IndexValue>,
        property: &str,
    ) -> BoxStream<'_, CoreResult<T>> {
        let key = key.into();
        let property = property.to_string();
        let spec = match self.registry.schema::<T>() {
            Ok(schema) => schema.index_spec(&property).cloned(),
            Err(err) => return stream::iter([Err(err)]).boxed(),
        };

        let lookup = key.clone();
        stream::once(async move {
            self.participants
                .indexes
                .get_ids_from_index::<T>(&property, &lookup)
                .await
        })
        .map_ok(|ids| ids.map(Ok::<EntityId, CoreError>))
        .try_flatten()
        .filter_map(move |id| {
            let key = key.clone();
            let spec = spec.clone();
            async move {
                let id = match id {
                    Ok(id) => id,
                    Err(err) => return Some(Err(err)),
                };
                match self.participants.records.try_read::<T>(id).await {
                    Ok(Some(entity)) => spec
                        .filter(|spec| spec.value_of(&entity) == key)
                        .map(|_| Ok(entity)),
                    Ok(None) => None,
                    Err(err) => Some(Err(err)),
                }
            }
        })
        .boxed()
    }

    /// Returns true if `id` has a committed, non-deleted record.
    ///
    /// # Errors
    ///
    /// Returns an error if `T` is not registered or the check fails.
    pub async fn exists<T: Entity>(&self, id: EntityId) -> CoreResult<bool> {
        self.registry.schema::<T>()?;
        self.participants.records.exists::<T>(id).await
    }

    /// Allocates the next unused id of `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if `T` is not registered or the id counter cannot
    /// be seeded.
    pub async fn get_next_id<T: Entity>(&self) -> CoreResult<EntityId> {
        self.registry.schema::<T>()?;
        self.participants.records.next_id::<T>().await
    }

    /// Returns the audit log of `id`.
    ///
    /// Returns `None` if `T` is not audited or `id` has no history.
    ///
    /// # Errors
    ///
    /// Returns an error if `T` is not registered or the log cannot be read.
    pub async fn get_audit_log<T: Entity>(&self, id: EntityId) -> CoreResult<Option<AuditLog<T>>> {
        self.participants.audit.read_all_events::<T>(id).await
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Creates or updates `data`.
    ///
    /// Records a Create audit entry for a new id and an Update entry
    /// otherwise.
    ///
    /// # Errors
    ///
    /// - [`CoreError::LockTimeout`] if the entity is busy
    /// - [`CoreError::SoftDeleted`] if the entity must be restored first
    /// - [`CoreError::ConstraintViolation`] if a unique index rejects it
    ///
    /// or a codec/storage error. The store is unchanged whenever an error
    /// is returned.
    pub async fn write<T: Entity>(&self, data: &T) -> CoreResult<()> {
        self.registry.schema::<T>()?;
        let id = data.id();
        let _guard = self.lock::<T>(id).await?;

        let records = &self.participants.records;
        if records.is_deleted::<T>(id).await? {
            return Err(CoreError::soft_deleted(T::KIND, id));
        }
        let previous = records.try_read::<T>(id).await?;

        let mut journal = Journal::new(id, "write");
        let result = self.write_steps(data, previous, &mut journal).await;
        self.settle(journal, result).await
    }

    async fn write_steps<T: Entity>(
        &self,
        data: &T,
        previous: Option<T>,
        journal: &mut Journal<T>,
    ) -> CoreResult<()> {
        let Participants {
            records,
            indexes,
            audit,
        } = &self.participants;

        records.write(data).await?;
        journal.record(Undo::DiscardRecord);

        indexes.reindex(previous.as_ref(), Some(data)).await?;
        journal.record(Undo::Reindex {
            from: previous.clone(),
            to: Some(data.clone()),
        });

        let audited = match &previous {
            Some(previous) => audit.update_event(data, previous).await?,
            None => audit.creation_event(data).await?,
        };
        if audited {
            journal.record(Undo::DiscardAudit);
        }

        records.commit::<T>(data.id()).await?;
        journal.record_committed(Undo::RestoreRecord { previous });

        if audited {
            audit.commit_events::<T>(data.id()).await?;
        }
        Ok(())
    }

    /// Soft-deletes `id`.
    ///
    /// The entity disappears from reads and indexes and a Delete audit
    /// entry is recorded. Its payload and audit log are kept for
    /// [`DataManager::restore`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the entity does not exist,
    /// [`CoreError::SoftDeleted`] if it is already deleted, or
    /// [`CoreError::LockTimeout`] if it is busy.
    pub async fn delete<T: Entity>(&self, id: EntityId) -> CoreResult<()> {
        self.registry.schema::<T>()?;
        let _guard = self.lock::<T>(id).await?;

        let records = &self.participants.records;
        let current = match records.try_read::<T>(id).await? {
            Some(current) => current,
            None if records.is_deleted::<T>(id).await? => {
                return Err(CoreError::soft_deleted(T::KIND, id));
            }
            None => return Err(CoreError::not_found(T::KIND, id)),
        };

        let mut journal = Journal::new(id, "delete");
        let result = self.delete_steps(current, &mut journal).await;
        self.settle(journal, result).await
    }

    async fn delete_steps<T: Entity>(&self, current: T, journal: &mut Journal<T>) -> CoreResult<()> {
        let Participants {
            records,
            indexes,
            audit,
        } = &self.participants;
        let id = current.id();

        indexes.unindex(&current).await?;
        journal.record(Undo::Reindex {
            from: Some(current.clone()),
            to: None,
        });

        let audited = audit.delete_event(&current).await?;
        if audited {
            journal.record(Undo::DiscardAudit);
        }

        records.delete::<T>(id).await?;
        journal.record(Undo::Undelete);

        if audited {
            audit.commit_events::<T>(id).await?;
        }
        Ok(())
    }

    /// Restores the soft-deleted entity `id`.
    ///
    /// The entity is indexed again and an Undelete audit entry is
    /// recorded.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`] if the entity does not exist
    /// - [`CoreError::InvalidOperation`] if it is not deleted
    /// - [`CoreError::ConstraintViolation`] if another entity took one of
    ///   its unique values meanwhile; the entity stays deleted
    pub async fn restore<T: Entity>(&self, id: EntityId) -> CoreResult<()> {
        self.registry.schema::<T>()?;
        let _guard = self.lock::<T>(id).await?;

        let records = &self.participants.records;
        let Some(deleted) = records.read_deleted::<T>(id).await? else {
            if records.exists::<T>(id).await? {
                return Err(CoreError::invalid_operation(format!(
                    "{} {id} is not deleted",
                    T::KIND
                )));
            }
            return Err(CoreError::not_found(T::KIND, id));
        };

        let mut journal = Journal::new(id, "restore");
        let result = self.restore_steps(deleted, &mut journal).await;
        self.settle(journal, result).await
    }

    async fn restore_steps<T: Entity>(&self, deleted: T, journal: &mut Journal<T>) -> CoreResult<()> {
        let Participants {
            records,
            indexes,
            audit,
        } = &self.participants;
        let id = deleted.id();

        indexes.index(&deleted).await?;
        journal.record(Undo::Reindex {
            from: None,
            to: Some(deleted.clone()),
        });

        let audited = audit.undelete_event(&deleted).await?;
        if audited {
            journal.record(Undo::DiscardAudit);
        }

        records.undelete::<T>(id).await?;
        journal.record(Undo::Redelete);

        if audited {
            audit.commit_events::<T>(id).await?;
        }
        Ok(())
    }

    /// Forces the committed entity back to `data`.
    ///
    /// Unlike [`DataManager::write`] this records a Rollback audit entry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the entity has no committed
    /// record, [`CoreError::SoftDeleted`] if it must be restored first, or
    /// [`CoreError::ConstraintViolation`] if `data` conflicts with a
    /// unique index.
    pub async fn rollback<T: Entity>(&self, data: &T) -> CoreResult<()> {
        self.registry.schema::<T>()?;
        let id = data.id();
        let _guard = self.lock::<T>(id).await?;
        let current = self.live_record::<T>(id).await?;

        let mut journal = Journal::new(id, "rollback");
        let result = self.rollback_steps(data, current, &mut journal).await;
        self.settle(journal, result).await
    }

    /// Rolls `id` back to the snapshot held by its audit entry at
    /// `position` (oldest entry first) and returns the restored entity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AuditEntryNotFound`] if the log has no such
    /// entry, plus the errors of [`DataManager::rollback`].
    pub async fn rollback_to<T: Entity>(&self, id: EntityId, position: usize) -> CoreResult<T> {
        self.registry.schema::<T>()?;
        let _guard = self.lock::<T>(id).await?;
        let current = self.live_record::<T>(id).await?;

        let snapshot = self
            .participants
            .audit
            .read_all_events::<T>(id)
            .await?
            .and_then(|log| log.into_entries().into_iter().nth(position))
            .map(|entry| entry.snapshot)
            .ok_or(CoreError::AuditEntryNotFound {
                kind: T::KIND,
                id,
                position,
            })?;

        let mut journal = Journal::new(id, "rollback");
        let result = self.rollback_steps(&snapshot, current, &mut journal).await;
        self.settle(journal, result).await?;
        Ok(snapshot)
    }

    async fn rollback_steps<T: Entity>(
        &self,
        data: &T,
        current: T,
        journal: &mut Journal<T>,
    ) -> CoreResult<()> {
        let Participants {
            records,
            indexes,
            audit,
        } = &self.participants;

        indexes.reindex(Some(&current), Some(data)).await?;
        journal.record(Undo::Reindex {
            from: Some(current.clone()),
            to: Some(data.clone()),
        });

        let audited = audit.rollback_event(data).await?;
        if audited {
            journal.record(Undo::DiscardAudit);
        }

        records.rollback(data).await?;
        journal.record(Undo::RestoreRecord {
            previous: Some(current),
        });

        if audited {
            audit.commit_events::<T>(data.id()).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn lock<T: Entity>(&self, id: EntityId) -> CoreResult<KeyGuard<'_>> {
        self.locks
            .acquire(LockKey::new(T::KIND, id), self.config.lock_timeout)
            .await
    }

    /// Reads the committed record of `id`, refusing soft-deleted ones.
    async fn live_record<T: Entity>(&self, id: EntityId) -> CoreResult<T> {
        let records = &self.participants.records;
        if records.is_deleted::<T>(id).await? {
            return Err(CoreError::soft_deleted(T::KIND, id));
        }
        records.read::<T>(id).await
    }

    /// Logs the outcome of an operation and, on failure, unwinds its
    /// journal before the caller releases the lock.
    async fn settle<T: Entity>(&self, journal: Journal<T>, result: CoreResult<()>) -> CoreResult<()> {
        let id = journal.id();
        let operation = journal.operation();
        match result {
            Ok(()) => {
                debug!(kind = T::KIND, %id, operation, steps = journal.len(), "committed");
                Ok(())
            }
            Err(err) => {
                warn!(kind = T::KIND, %id, operation, error = %err, "unwinding failed operation");
                journal.unwind(&self.participants).await;
                Err(err)
            }
        }
    }

    /// Discards everything an interrupted process left staged and rebuilds
    /// indexes that no longer match the committed records.
    pub(crate) async fn recover(&self) -> CoreResult<usize> {
        let Participants {
            records,
            indexes,
            audit,
        } = &self.participants;

        let mut removed = 0;
        for kind in self.registry.kinds() {
            let found = records.recover(kind).await?
                + indexes.recover(kind).await?
                + audit.recover(kind).await?;
            if found > 0 {
                warn!(kind, found, "discarded leftovers of an interrupted operation");
            }
            removed += found;

            if let Some(rebuild) = self.registry.index_rebuilder(kind) {
                let rebuilt = rebuild(indexes, records).await?;
                if rebuilt > 0 {
                    warn!(kind, rebuilt, "rebuilt indexes from committed records");
                }
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for DataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataManager")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("backend", self.streams.backend())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditKind;
    use crate::entity::{EntitySchema, Identifiable};
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: EntityId,
        email: String,
        plan: String,
    }

    impl Identifiable for Account {
        fn id(&self) -> EntityId {
            self.id
        }
    }

    impl Entity for Account {
        const KIND: &'static str = "account";

        fn schema() -> EntitySchema<Self> {
            EntitySchema::new()
                .unique_index("email", |a: &Account| a.email.clone())
                .index("plan", |a: &Account| a.plan.clone())
                .audited(3)
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Unregistered {
        id: EntityId,
    }

    impl Identifiable for Unregistered {
        fn id(&self) -> EntityId {
            self.id
        }
    }

    impl Entity for Unregistered {
        const KIND: &'static str = "unregistered";
    }

    fn account(id: u64, email: &str, plan: &str) -> Account {
        Account {
            id: EntityId::new(id),
            email: email.into(),
            plan: plan.into(),
        }
    }

    async fn manager() -> DataManager {
        DataManager::builder(InMemoryBackend::new())
            .config(Config::new().lock_timeout(Duration::from_millis(200)))
            .register::<Account>()
            .unwrap()
            .build()
            .await
            .unwrap()
    }

    async fn plan_ids(manager: &DataManager, plan: &str) -> Vec<u64> {
        manager
            .read_index::<Account>(plan, "plan")
            .map(|account| account.unwrap().id.as_u64())
            .collect()
            .await
    }

    async fn audit_kinds(manager: &DataManager, id: u64) -> Vec<AuditKind> {
        manager
            .get_audit_log::<Account>(EntityId::new(id))
            .await
            .unwrap()
            .map(|log| log.kinds())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn write_then_read() {
        let manager = manager().await;
        let first = account(1, "a@x", "free");
        manager.write(&first).await.unwrap();

        assert_eq!(manager.read::<Account>(first.id).await.unwrap(), first);
        assert!(manager.exists::<Account>(first.id).await.unwrap());
        assert_eq!(audit_kinds(&manager, 1).await, vec![AuditKind::Create]);
    }

    #[tokio::test]
    async fn update_moves_index_entries() {
        let manager = manager().await;
        manager.write(&account(1, "a@x", "free")).await.unwrap();
        manager.write(&account(1, "a@x", "pro")).await.unwrap();

        assert!(plan_ids(&manager, "free").await.is_empty());
        assert_eq!(plan_ids(&manager, "pro").await, vec![1]);

        let log = manager
            .get_audit_log::<Account>(EntityId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.kinds(), vec![AuditKind::Create, AuditKind::Update]);
        assert_eq!(log.last().unwrap().changed_fields().unwrap(), vec!["plan"]);
    }

    #[tokio::test]
    async fn unique_violation_changes_nothing() {
        let manager = manager().await;
        manager.write(&account(1, "a@x", "free")).await.unwrap();

        let err = manager.write(&account(2, "a@x", "pro")).await.unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));

        assert!(manager.read::<Account>(EntityId::new(2)).await.unwrap_err().is_not_found());
        assert!(plan_ids(&manager, "pro").await.is_empty());
        assert!(audit_kinds(&manager, 2).await.is_empty());
        assert_eq!(
            manager.backend().list("account/records").unwrap(),
            vec!["1.rec".to_string()]
        );
    }

    #[tokio::test]
    async fn delete_and_restore() {
        let manager = manager().await;
        let first = account(1, "a@x", "free");
        manager.write(&first).await.unwrap();

        manager.delete::<Account>(first.id).await.unwrap();
        assert!(manager.read::<Account>(first.id).await.unwrap_err().is_not_found());
        assert!(plan_ids(&manager, "free").await.is_empty());
        assert!(matches!(
            manager.delete::<Account>(first.id).await.unwrap_err(),
            CoreError::SoftDeleted { .. }
        ));
        assert!(matches!(
            manager.write(&first).await.unwrap_err(),
            CoreError::SoftDeleted { .. }
        ));

        manager.restore::<Account>(first.id).await.unwrap();
        assert_eq!(manager.read::<Account>(first.id).await.unwrap(), first);
        assert_eq!(plan_ids(&manager, "free").await, vec![1]);
        assert_eq!(
            audit_kinds(&manager, 1).await,
            vec![AuditKind::Create, AuditKind::Delete, AuditKind::Undelete]
        );
    }

    #[tokio::test]
    async fn delete_and_restore_of_missing_ids() {
        let manager = manager().await;
        let id = EntityId::new(5);
        assert!(manager.delete::<Account>(id).await.unwrap_err().is_not_found());
        assert!(manager.restore::<Account>(id).await.unwrap_err().is_not_found());

        manager.write(&account(5, "e@x", "free")).await.unwrap();
        assert!(matches!(
            manager.restore::<Account>(id).await.unwrap_err(),
            CoreError::InvalidOperation { .. }
        ));
    }

    #[tokio::test]
    async fn restore_conflict_keeps_entity_deleted() {
        let manager = manager().await;
        manager.write(&account(1, "a@x", "free")).await.unwrap();
        manager.delete::<Account>(EntityId::new(1)).await.unwrap();
        manager.write(&account(2, "a@x", "free")).await.unwrap();

        let err = manager.restore::<Account>(EntityId::new(1)).await.unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));
        assert!(manager.records().is_deleted::<Account>(EntityId::new(1)).await.unwrap());
        assert_eq!(plan_ids(&manager, "free").await, vec![2]);
        assert_eq!(
            audit_kinds(&manager, 1).await,
            vec![AuditKind::Create, AuditKind::Delete]
        );
    }

    #[tokio::test]
    async fn rollback_restores_payload_and_logs_once() {
        let manager = manager().await;
        let original = account(1, "a@x", "free");
        manager.write(&original).await.unwrap();
        manager.write(&account(1, "b@x", "pro")).await.unwrap();

        manager.rollback(&original).await.unwrap();
        assert_eq!(manager.read::<Account>(original.id).await.unwrap(), original);
        assert_eq!(plan_ids(&manager, "free").await, vec![1]);
        assert_eq!(
            audit_kinds(&manager, 1).await,
            vec![AuditKind::Create, AuditKind::Update, AuditKind::Rollback]
        );
    }

    #[tokio::test]
    async fn rollback_to_audit_entry() {
        let manager = manager().await;
        manager.write(&account(1, "a@x", "free")).await.unwrap();
        manager.write(&account(1, "a@x", "pro")).await.unwrap();

        let restored = manager.rollback_to::<Account>(EntityId::new(1), 0).await.unwrap();
        assert_eq!(restored.plan, "free");
        assert_eq!(manager.read::<Account>(EntityId::new(1)).await.unwrap().plan, "free");

        let err = manager
            .rollback_to::<Account>(EntityId::new(1), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AuditEntryNotFound { position: 10, .. }));
    }

    #[tokio::test]
    async fn rollback_requires_a_live_record() {
        let manager = manager().await;
        let ghost = account(9, "g@x", "free");
        assert!(manager.rollback(&ghost).await.unwrap_err().is_not_found());

        manager.write(&ghost).await.unwrap();
        manager.delete::<Account>(ghost.id).await.unwrap();
        assert!(matches!(
            manager.rollback(&ghost).await.unwrap_err(),
            CoreError::SoftDeleted { .. }
        ));
    }

    #[tokio::test]
    async fn audit_cap_keeps_latest_entries() {
        let manager = manager().await;
        manager.write(&account(1, "a@x", "p0")).await.unwrap();
        for plan in ["p1", "p2", "p3", "p4"] {
            manager.write(&account(1, "a@x", plan)).await.unwrap();
        }

        let log = manager
            .get_audit_log::<Account>(EntityId::new(1))
            .await
            .unwrap()
            .unwrap();
        let plans: Vec<_> = log.iter().map(|entry| entry.snapshot.plan.as_str()).collect();
        assert_eq!(plans, vec!["p2", "p3", "p4"]);
    }

    #[tokio::test]
    async fn read_many_skips_missing_ids() {
        let manager = manager().await;
        manager.write(&account(1, "a@x", "free")).await.unwrap();
        manager.write(&account(3, "c@x", "free")).await.unwrap();

        let ids: Vec<u64> = manager
            .read_many::<Account>([3, 2, 1].map(EntityId::new))
            .map(|account| account.unwrap().id.as_u64())
            .collect()
            .await;
        assert_eq!(ids, vec![3, 1]);

        let all: Vec<u64> = manager
            .read_all::<Account>()
            .map(|account| account.unwrap().id.as_u64())
            .collect()
            .await;
        assert_eq!(all, vec![1, 3]);
    }

    #[tokio::test]
    async fn read_index_on_undeclared_property() {
        let manager = manager().await;
        let results: Vec<_> = manager.read_index::<Account>("x", "color").collect().await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(CoreError::IndexNotDeclared { .. })));
    }

    #[tokio::test]
    async fn unregistered_types_are_rejected() {
        let manager = manager().await;
        let ghost = Unregistered { id: EntityId::new(1) };

        assert!(matches!(
            manager.write(&ghost).await.unwrap_err(),
            CoreError::TypeNotRegistered { .. }
        ));
        let results: Vec<_> = manager.read_all::<Unregistered>().collect().await;
        assert!(matches!(results[..], [Err(CoreError::TypeNotRegistered { .. })]));
    }

    #[tokio::test]
    async fn next_id_is_monotonic() {
        let manager = manager().await;
        let first = manager.get_next_id::<Account>().await.unwrap();
        let second = manager.get_next_id::<Account>().await.unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn busy_entity_times_out() {
        let manager = manager().await;
        let id = EntityId::new(1);
        let _held = manager
            .locks()
            .acquire(LockKey::new(Account::KIND, id), Duration::from_millis(10))
            .await
            .unwrap();

        let err = manager.write(&account(1, "a@x", "free")).await.unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { .. }));
        assert!(!manager.exists::<Account>(id).await.unwrap());
        assert!(manager.backend().list("account/records").unwrap().is_empty());
    }

    #[tokio::test]
    async fn recovery_discards_staged_leftovers() {
        let backend = InMemoryBackend::new();
        {
            let manager = DataManager::builder(backend.clone())
                .register::<Account>()
                .unwrap()
                .build()
                .await
                .unwrap();
            manager.write(&account(1, "a@x", "free")).await.unwrap();
            manager.records().write(&account(1, "a@x", "pro")).await.unwrap();
            manager.records().write(&account(2, "b@x", "pro")).await.unwrap();
        }

        let manager = DataManager::builder(backend.clone())
            .register::<Account>()
            .unwrap()
            .build()
            .await
            .unwrap();
        assert_eq!(manager.read::<Account>(EntityId::new(1)).await.unwrap().plan, "free");
        assert!(!backend.names().iter().any(|name| name.ends_with(".staged")));
    }
}
