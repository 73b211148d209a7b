//! Maintains the on-disk indexes of every registered kind.

use crate::entity::{Entity, EntityId, RecordStore, SchemaRegistry};
use crate::error::{CoreError, CoreResult};
use crate::index::{Index, IndexValue};
use crate::layout;
use crate::streams::Streams;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use packdb_storage::StorageError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::error;

type IndexLocks = Mutex<HashMap<(&'static str, String), Arc<AsyncMutex<()>>>>;

/// An index rewrite waiting to be published.
struct Rewrite {
    original: Option<Index>,
    updated: Index,
}

/// Keeps one index stream per declared property in step with the
/// committed records.
///
/// Each index stream is rewritten whole, so concurrent writers to
/// different entities would lose each other's updates if they interleaved
/// their read-modify-write cycles. Every `(kind, index)` therefore has its
/// own async mutex; an operation locks all indexes of its kind in name
/// order before reading any of them.
pub struct IndexStore {
    streams: Streams,
    registry: Arc<SchemaRegistry>,
    locks: IndexLocks,
}

impl IndexStore {
    pub(crate) fn new(streams: Streams, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            streams,
            registry,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true once the named index of `T` has been written.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend check fails.
    pub async fn index_exists<T: Entity>(&self, name: &str) -> CoreResult<bool> {
        self.streams.exists(layout::index(T::KIND, name)).await
    }

    /// Adds `data` to every index declared for `T`.
    ///
    /// Properties whose value is [`IndexValue::Null`] are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConstraintViolation`] if a unique index already
    /// maps a value to another id; no index is modified in that case.
    pub async fn index<T: Entity>(&self, data: &T) -> CoreResult<()> {
        self.reindex(None, Some(data)).await
    }

    /// Removes the id of `data` from every index declared for `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if an index cannot be read or rewritten.
    pub async fn unindex<T: Entity>(&self, data: &T) -> CoreResult<()> {
        self.reindex(Some(data), None).await
    }

    /// Removes `previous` and adds `current` in one step.
    ///
    /// Holding the index locks across both halves means a value released
    /// by `previous` cannot be claimed by another entity before `current`
    /// is inserted.
    ///
    /// # Errors
    ///
    /// See [`IndexStore::index`].
    pub async fn reindex<T: Entity>(&self, previous: Option<&T>, current: Option<&T>) -> CoreResult<()> {
        let schema = self.registry.schema::<T>()?;
        if schema.indexes().is_empty() {
            return Ok(());
        }

        let mut names: Vec<&str> = schema.indexes().iter().map(|spec| spec.name()).collect();
        names.sort_unstable();
        let _guards = self.lock_all(T::KIND, &names).await;

        let mut rewrites = Vec::new();
        for spec in schema.indexes() {
            let original = self.load(T::KIND, spec.name()).await?;
            let mut updated = original
                .clone()
                .unwrap_or_else(|| Index::new(spec.name(), spec.is_unique()));
            updated.unique = spec.is_unique();

            let mut changed = false;
            if let Some(previous) = previous {
                changed |= updated.remove(previous.id());
            }
            if let Some(current) = current {
                let value = spec.value_of(current);
                if !value.is_null() {
                    if let Some(existing) = updated.conflict(&value, current.id()) {
                        return Err(CoreError::ConstraintViolation {
                            kind: T::KIND,
                            index: spec.name().to_string(),
                            value: value.to_string(),
                            existing,
                        });
                    }
                    changed |= updated.insert(value, current.id());
                }
            }

            if changed {
                rewrites.push(Rewrite { original, updated });
            }
        }

        self.publish(T::KIND, &rewrites).await
    }

    /// Returns the ids that the named index maps to `value`.
    ///
    /// An index that has never been written, or a value it does not hold,
    /// yields an empty sequence.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexNotDeclared`] if `T` declares no index
    /// called `name`, or an error if the index cannot be read.
    pub async fn get_ids_from_index<T: Entity>(
        &self,
        name: &str,
        value: &IndexValue,
    ) -> CoreResult<BoxStream<'static, EntityId>> {
        let schema = self.registry.schema::<T>()?;
        if schema.index_spec(name).is_none() {
            return Err(CoreError::IndexNotDeclared {
                kind: T::KIND,
                index: name.to_string(),
            });
        }

        let ids: Vec<EntityId> = match self.load(T::KIND, name).await? {
            Some(index) => index.ids(value).collect(),
            None => Vec::new(),
        };
        Ok(stream::iter(ids).boxed())
    }

    /// Reads the named index of `T` as it is currently published.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read or decoded.
    pub async fn read_index<T: Entity>(&self, name: &str) -> CoreResult<Option<Index>> {
        self.load(T::KIND, name).await
    }

    /// Rewrites every index of `T` from the committed records.
    ///
    /// A process that stopped between publishing an index and committing
    /// the record leaves ids in the index that no committed record backs,
    /// or misses ids whose record did commit. Only indexes that differ
    /// from the rebuilt content are rewritten; the number of rewritten
    /// indexes is returned.
    ///
    /// When two committed records hold the same value of a unique index
    /// the lower id keeps it and the conflict is logged.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be read or an index cannot be
    /// rewritten.
    pub async fn rebuild<T: Entity>(&self, records: &RecordStore) -> CoreResult<usize> {
        let schema = self.registry.schema::<T>()?;
        if schema.indexes().is_empty() {
            return Ok(0);
        }

        let mut names: Vec<&str> = schema.indexes().iter().map(|spec| spec.name()).collect();
        names.sort_unstable();
        let _guards = self.lock_all(T::KIND, &names).await;

        let mut rebuilt: Vec<Index> = schema
            .indexes()
            .iter()
            .map(|spec| Index::new(spec.name(), spec.is_unique()))
            .collect();
        let mut entities = records.read_all::<T>();
        while let Some(entity) = entities.try_next().await? {
            for (spec, index) in schema.indexes().iter().zip(rebuilt.iter_mut()) {
                let value = spec.value_of(&entity);
                if value.is_null() {
                    continue;
                }
                if let Some(existing) = index.conflict(&value, entity.id()) {
                    error!(
                        kind = T::KIND,
                        index = spec.name(),
                        %value,
                        %existing,
                        dropped = %entity.id(),
                        "committed records share a unique value"
                    );
                    continue;
                }
                index.insert(value, entity.id());
            }
        }

        let mut rewrites = Vec::new();
        for updated in rebuilt {
            let original = self.load(T::KIND, &updated.name).await?;
            let unchanged = match &original {
                Some(original) => *original == updated,
                None => updated.is_empty(),
            };
            if !unchanged {
                rewrites.push(Rewrite { original, updated });
            }
        }

        self.publish(T::KIND, &rewrites).await?;
        Ok(rewrites.len())
    }

    /// Removes index rewrites left behind by an interrupted process.
    pub(crate) async fn recover(&self, kind: &str) -> CoreResult<usize> {
        let mut removed = 0;
        for file in self.streams.list(layout::indexes_dir(kind)).await? {
            if layout::is_scratch(&file) {
                let name = format!("{}/{file}", layout::indexes_dir(kind));
                if self.streams.remove(name).await? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn load(&self, kind: &str, name: &str) -> CoreResult<Option<Index>> {
        let index: Option<Index> = self.streams.read(layout::index(kind, name)).await?;
        Ok(index.map(|mut index| {
            index.normalize();
            index
        }))
    }

    async fn lock_all(&self, kind: &'static str, names: &[&str]) -> Vec<OwnedMutexGuard<()>> {
        let mutexes: Vec<_> = {
            let mut locks = self.locks.lock();
            names
                .iter()
                .map(|name| {
                    Arc::clone(
                        locks
                            .entry((kind, (*name).to_string()))
                            .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
                    )
                })
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        guards
    }

    /// Stages every rewrite, then moves each into place.
    ///
    /// If a move fails the indexes already moved are put back to their
    /// original content, so the kind's indexes change together or not at
    /// all.
    async fn publish(&self, kind: &'static str, rewrites: &[Rewrite]) -> CoreResult<()> {
        for (written, rewrite) in rewrites.iter().enumerate() {
            let staged = layout::staged_index(kind, &rewrite.updated.name);
            if let Err(err) = self.streams.write(staged, &rewrite.updated).await {
                self.drop_staged(kind, &rewrites[..=written]).await;
                return Err(err);
            }
        }

        for (done, rewrite) in rewrites.iter().enumerate() {
            let name = &rewrite.updated.name;
            let staged = layout::staged_index(kind, name);
            let result = match self
                .streams
                .replace(staged.clone(), layout::index(kind, name))
                .await
            {
                Ok(true) => Ok(()),
                Ok(false) => Err(StorageError::not_found(staged).into()),
                Err(err) => Err(err),
            };

            if let Err(err) = result {
                self.restore(kind, &rewrites[..done]).await;
                self.drop_staged(kind, &rewrites[done..]).await;
                return Err(err);
            }
        }
        Ok(())
    }

    async fn restore(&self, kind: &'static str, rewrites: &[Rewrite]) {
        for rewrite in rewrites {
            let name = &rewrite.updated.name;
            let result = match &rewrite.original {
                Some(original) => {
                    let staged = layout::staged_index(kind, name);
                    match self.streams.write(staged.clone(), original).await {
                        Ok(()) => self
                            .streams
                            .replace(staged, layout::index(kind, name))
                            .await
                            .map(drop),
                        Err(err) => Err(err),
                    }
                }
                None => self.streams.remove(layout::index(kind, name)).await.map(drop),
            };
            if let Err(err) = result {
                error!(kind, index = %name, error = %err, "failed to restore index");
            }
        }
    }

    async fn drop_staged(&self, kind: &'static str, rewrites: &[Rewrite]) {
        for rewrite in rewrites {
            let staged = layout::staged_index(kind, &rewrite.updated.name);
            if let Err(err) = self.streams.remove(staged).await {
                error!(kind, index = %rewrite.updated.name, error = %err, "failed to drop staged index");
            }
        }
    }
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("streams", &self.streams)
            .finish_non_exhaustive()
    }
}
