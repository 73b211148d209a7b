//! Staged persistence of entity records.

use crate::entity::{Entity, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::layout;
use crate::streams::Streams;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use packdb_storage::StorageError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

const PARTICIPANT: &str = "record";

/// Stores one payload per `(kind, id)` and moves it through the record
/// lifecycle:
///
/// ```text
/// absent ──write──▶ staged ──commit──▶ committed ◀──undelete/delete──▶ soft-deleted
///                     │                    ▲
///                     └──discard_changes   └──rollback (forced overwrite)
/// ```
///
/// Each state lives in its own stream named after the id; every
/// transition that readers can observe is a single atomic
/// [`packdb_storage::StorageBackend::replace`].
///
/// The store does not lock: callers serialise operations on one id.
pub struct RecordStore {
    streams: Streams,
    counters: Mutex<HashMap<&'static str, Arc<AtomicU64>>>,
}

impl RecordStore {
    pub(crate) fn new(streams: Streams) -> Self {
        Self {
            streams,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Stages `data` without touching its committed payload.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` cannot be encoded or written.
    pub async fn write<T: Entity>(&self, data: &T) -> CoreResult<()> {
        self.streams
            .write(layout::staged_record(T::KIND, data.id()), data)
            .await
    }

    /// Promotes the staged payload of `id` to committed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StageConflict`] if nothing is staged.
    pub async fn commit<T: Entity>(&self, id: EntityId) -> CoreResult<()> {
        let promoted = self
            .streams
            .replace(layout::staged_record(T::KIND, id), layout::record(T::KIND, id))
            .await?;
        if !promoted {
            return Err(CoreError::stage_conflict(PARTICIPANT, T::KIND, id));
        }
        self.observe(T::KIND, id);
        Ok(())
    }

    /// Drops the staged payload of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StageConflict`] if nothing is staged.
    pub async fn discard_changes<T: Entity>(&self, id: EntityId) -> CoreResult<()> {
        if !self.streams.remove(layout::staged_record(T::KIND, id)).await? {
            return Err(CoreError::stage_conflict(PARTICIPANT, T::KIND, id));
        }
        Ok(())
    }

    /// Stages and commits `data`.
    ///
    /// # Errors
    ///
    /// See [`RecordStore::write`] and [`RecordStore::commit`].
    pub async fn write_and_commit<T: Entity>(&self, data: &T) -> CoreResult<()> {
        self.write(data).await?;
        self.commit::<T>(data.id()).await
    }

    /// Reads the committed payload of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the record is absent or
    /// soft-deleted.
    pub async fn read<T: Entity>(&self, id: EntityId) -> CoreResult<T> {
        self.try_read(id)
            .await?
            .ok_or_else(|| CoreError::not_found(T::KIND, id))
    }

    /// Reads the committed payload of `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be read or decoded.
    pub async fn try_read<T: Entity>(&self, id: EntityId) -> CoreResult<Option<T>> {
        self.streams.read(layout::record(T::KIND, id)).await
    }

    /// Reads the payload kept for a soft-deleted `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be read or decoded.
    pub async fn read_deleted<T: Entity>(&self, id: EntityId) -> CoreResult<Option<T>> {
        self.streams.read(layout::deleted_record(T::KIND, id)).await
    }

    /// Returns the ids of every committed, non-deleted record in
    /// ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the records directory cannot be listed.
    pub async fn ids<T: Entity>(&self) -> CoreResult<Vec<EntityId>> {
        let files = self.streams.list(layout::records_dir(T::KIND)).await?;
        let mut ids: Vec<EntityId> = files
            .iter()
            .filter_map(|file| layout::committed_record_id(file))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Lazily reads every committed record of `T`.
    ///
    /// The directory is listed when the stream is first polled and each
    /// record is read only when its item is requested. Records deleted
    /// after the listing are skipped; read failures are yielded as `Err`
    /// items without ending the stream.
    pub fn read_all<T: Entity>(&self) -> BoxStream<'_, CoreResult<T>> {
        stream::once(self.ids::<T>())
            .map_ok(|ids| stream::iter(ids).map(Ok::<EntityId, CoreError>))
            .try_flatten()
            .filter_map(move |id| async move {
                match id {
                    Ok(id) => self.try_read::<T>(id).await.transpose(),
                    Err(err) => Some(Err(err)),
                }
            })
            .boxed()
    }

    /// Returns true if `id` has a committed, non-deleted payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend check fails.
    pub async fn exists<T: Entity>(&self, id: EntityId) -> CoreResult<bool> {
        self.streams.exists(layout::record(T::KIND, id)).await
    }

    /// Returns true if `id` is soft-deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend check fails.
    pub async fn is_deleted<T: Entity>(&self, id: EntityId) -> CoreResult<bool> {
        self.streams.exists(layout::deleted_record(T::KIND, id)).await
    }

    /// Soft-deletes `id`, keeping its payload for [`RecordStore::undelete`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SoftDeleted`] if `id` is already deleted and
    /// [`CoreError::NotFound`] if it has no committed payload.
    pub async fn delete<T: Entity>(&self, id: EntityId) -> CoreResult<()> {
        if self.is_deleted::<T>(id).await? {
            return Err(CoreError::soft_deleted(T::KIND, id));
        }
        let moved = self
            .streams
            .replace(layout::record(T::KIND, id), layout::deleted_record(T::KIND, id))
            .await?;
        if !moved {
            return Err(CoreError::not_found(T::KIND, id));
        }
        Ok(())
    }

    /// Restores a soft-deleted `id` to committed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `id` is committed and not
    /// deleted, or [`CoreError::NotFound`] if it does not exist at all.
    pub async fn undelete<T: Entity>(&self, id: EntityId) -> CoreResult<()> {
        if self.exists::<T>(id).await? {
            return Err(CoreError::invalid_operation(format!(
                "{} {id} is not deleted",
                T::KIND
            )));
        }
        let moved = self
            .streams
            .replace(layout::deleted_record(T::KIND, id), layout::record(T::KIND, id))
            .await?;
        if !moved {
            return Err(CoreError::not_found(T::KIND, id));
        }
        Ok(())
    }

    /// Overwrites the committed payload of `data.id()` with `data`,
    /// bypassing the staged location.
    ///
    /// The payload is written to a scratch stream first and moved into
    /// place, so readers see either the old payload or `data`. Returns
    /// once the move is durable.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` cannot be written or moved.
    pub async fn rollback<T: Entity>(&self, data: &T) -> CoreResult<()> {
        let id = data.id();
        let scratch = layout::rollback_record(T::KIND, id);
        self.streams.write(scratch.clone(), data).await?;
        match self
            .streams
            .replace(scratch.clone(), layout::record(T::KIND, id))
            .await
        {
            Ok(true) => {}
            Ok(false) => return Err(StorageError::not_found(scratch).into()),
            Err(err) => {
                if let Err(cleanup) = self.streams.remove(scratch).await {
                    warn!(kind = T::KIND, %id, error = %cleanup, "rollback payload left behind");
                }
                return Err(err);
            }
        }
        self.observe(T::KIND, id);
        Ok(())
    }

    /// Permanently removes every payload of `id`, committed or deleted.
    ///
    /// Returns false if there was nothing to remove.
    ///
    /// # Errors
    ///
    /// Returns an error if a stream cannot be removed.
    pub async fn purge<T: Entity>(&self, id: EntityId) -> CoreResult<bool> {
        let mut removed = false;
        for name in [
            layout::record(T::KIND, id),
            layout::deleted_record(T::KIND, id),
            layout::staged_record(T::KIND, id),
            layout::rollback_record(T::KIND, id),
        ] {
            removed |= self.streams.remove(name).await?;
        }
        Ok(removed)
    }

    /// Allocates the next unused id of `T`.
    ///
    /// The counter is seeded from the highest id found in the kind's
    /// records and audit logs, so ids are never reused across restarts.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter has to be seeded and the backend
    /// cannot be listed.
    pub async fn next_id<T: Entity>(&self) -> CoreResult<EntityId> {
        let counter = self.counter(T::KIND).await?;
        Ok(EntityId::new(counter.fetch_add(1, Ordering::SeqCst)))
    }

    /// Makes sure the counter of `kind` stays above `id`.
    fn observe(&self, kind: &'static str, id: EntityId) {
        if let Some(counter) = self.counters.lock().get(kind) {
            counter.fetch_max(id.as_u64().saturating_add(1), Ordering::SeqCst);
        }
    }

    async fn counter(&self, kind: &'static str) -> CoreResult<Arc<AtomicU64>> {
        let seeded = self.counters.lock().get(kind).cloned();
        if let Some(counter) = seeded {
            return Ok(counter);
        }

        let seed = self.highest_on_disk(kind).await?.saturating_add(1);
        let counter = Arc::clone(
            self.counters
                .lock()
                .entry(kind)
                .or_insert_with(|| Arc::new(AtomicU64::new(seed))),
        );

        // A commit that landed during the first scan found no counter to
        // advance.
        let highest = self.highest_on_disk(kind).await?;
        counter.fetch_max(highest.saturating_add(1), Ordering::SeqCst);
        Ok(counter)
    }

    async fn highest_on_disk(&self, kind: &str) -> CoreResult<u64> {
        let mut highest = 0;
        for dir in [layout::records_dir(kind), layout::audit_dir(kind)] {
            for file in self.streams.list(dir).await? {
                if let Some(id) = layout::file_id(&file) {
                    highest = highest.max(id.as_u64());
                }
            }
        }
        Ok(highest)
    }

    /// Removes staged and rollback payloads left behind by an interrupted
    /// process. Committed payloads are never touched.
    pub(crate) async fn recover(&self, kind: &str) -> CoreResult<usize> {
        let dir = layout::records_dir(kind);
        let mut removed = 0;
        for file in self.streams.list(dir.clone()).await? {
            if layout::is_scratch(&file) && self.streams.remove(format!("{dir}/{file}")).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("streams", &self.streams)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Identifiable;
    use packdb_storage::{InMemoryBackend, StorageBackend, StorageResult};
    use serde::{Deserialize, Serialize};
    use std::io::{self, Write};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Crate {
        id: EntityId,
        label: String,
    }

    impl Identifiable for Crate {
        fn id(&self) -> EntityId {
            self.id
        }
    }

    impl Entity for Crate {
        const KIND: &'static str = "crate";
    }

    fn item(id: u64, label: &str) -> Crate {
        Crate {
            id: EntityId::new(id),
            label: label.into(),
        }
    }

    fn store() -> (InMemoryBackend, RecordStore) {
        let backend = InMemoryBackend::new();
        let store = RecordStore::new(Streams::new(Arc::new(backend.clone())));
        (backend, store)
    }

    #[tokio::test]
    async fn staged_writes_are_invisible() {
        let (_, store) = store();
        store.write(&item(1, "a")).await.unwrap();
        assert!(store.try_read::<Crate>(EntityId::new(1)).await.unwrap().is_none());

        store.commit::<Crate>(EntityId::new(1)).await.unwrap();
        assert_eq!(store.read::<Crate>(EntityId::new(1)).await.unwrap(), item(1, "a"));
    }

    #[tokio::test]
    async fn discard_keeps_committed_payload() {
        let (_, store) = store();
        store.write_and_commit(&item(1, "a")).await.unwrap();
        store.write(&item(1, "b")).await.unwrap();
        store.discard_changes::<Crate>(EntityId::new(1)).await.unwrap();

        assert_eq!(store.read::<Crate>(EntityId::new(1)).await.unwrap().label, "a");
    }

    #[tokio::test]
    async fn commit_and_discard_need_a_stage() {
        let (_, store) = store();
        let id = EntityId::new(4);
        assert!(matches!(
            store.commit::<Crate>(id).await.unwrap_err(),
            CoreError::StageConflict { participant: "record", .. }
        ));
        assert!(matches!(
            store.discard_changes::<Crate>(id).await.unwrap_err(),
            CoreError::StageConflict { .. }
        ));
    }

    #[tokio::test]
    async fn delete_and_undelete() {
        let (_, store) = store();
        let id = EntityId::new(1);
        store.write_and_commit(&item(1, "a")).await.unwrap();

        store.delete::<Crate>(id).await.unwrap();
        assert!(store.read::<Crate>(id).await.unwrap_err().is_not_found());
        assert!(store.is_deleted::<Crate>(id).await.unwrap());
        assert!(!store.exists::<Crate>(id).await.unwrap());
        assert_eq!(store.read_deleted::<Crate>(id).await.unwrap(), Some(item(1, "a")));
        assert!(matches!(
            store.delete::<Crate>(id).await.unwrap_err(),
            CoreError::SoftDeleted { .. }
        ));

        store.undelete::<Crate>(id).await.unwrap();
        assert!(store.exists::<Crate>(id).await.unwrap());
        assert!(matches!(
            store.undelete::<Crate>(id).await.unwrap_err(),
            CoreError::InvalidOperation { .. }
        ));
    }

    #[tokio::test]
    async fn delete_and_undelete_of_absent_ids() {
        let (_, store) = store();
        let id = EntityId::new(8);
        assert!(store.delete::<Crate>(id).await.unwrap_err().is_not_found());
        assert!(store.undelete::<Crate>(id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn rollback_overwrites_committed() {
        let (backend, store) = store();
        store.write_and_commit(&item(1, "new")).await.unwrap();
        store.rollback(&item(1, "old")).await.unwrap();

        assert_eq!(store.read::<Crate>(EntityId::new(1)).await.unwrap().label, "old");
        assert_eq!(backend.names(), vec!["crate/records/1.rec".to_string()]);
    }

    #[tokio::test]
    async fn purge_removes_every_state() {
        let (backend, store) = store();
        store.write_and_commit(&item(1, "a")).await.unwrap();
        store.delete::<Crate>(EntityId::new(1)).await.unwrap();

        assert!(store.purge::<Crate>(EntityId::new(1)).await.unwrap());
        assert!(!store.purge::<Crate>(EntityId::new(1)).await.unwrap());
        assert!(backend.names().is_empty());
    }

    #[tokio::test]
    async fn read_all_is_sorted_and_skips_deleted() {
        let (_, store) = store();
        for id in [10, 2, 1] {
            store.write_and_commit(&item(id, "x")).await.unwrap();
        }
        store.write(&item(3, "staged")).await.unwrap();
        store.delete::<Crate>(EntityId::new(2)).await.unwrap();

        let ids: Vec<u64> = store
            .read_all::<Crate>()
            .map(|item| item.unwrap().id.as_u64())
            .collect()
            .await;
        assert_eq!(ids, vec![1, 10]);
    }

    #[tokio::test]
    async fn read_all_reports_corrupt_records_and_continues() {
        let (backend, store) = store();
        store.write_and_commit(&item(1, "a")).await.unwrap();
        store.write_and_commit(&item(3, "c")).await.unwrap();
        let mut stream = backend.open_write("crate/records/2.rec").unwrap();
        stream.write_all(&[0x92]).unwrap();
        stream.finish().unwrap();

        let results: Vec<_> = store.read_all::<Crate>().collect().await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(CoreError::Codec(_))));
        assert_eq!(results[2].as_ref().unwrap().label, "c");
    }

    #[tokio::test]
    async fn next_id_is_monotonic_and_seeded_from_disk() {
        let (backend, store) = store();
        store.write_and_commit(&item(5, "a")).await.unwrap();
        store.delete::<Crate>(EntityId::new(5)).await.unwrap();

        assert_eq!(store.next_id::<Crate>().await.unwrap(), EntityId::new(6));
        assert_eq!(store.next_id::<Crate>().await.unwrap(), EntityId::new(7));

        store.write_and_commit(&item(20, "b")).await.unwrap();
        assert_eq!(store.next_id::<Crate>().await.unwrap(), EntityId::new(21));

        let reopened = RecordStore::new(Streams::new(Arc::new(backend)));
        assert_eq!(reopened.next_id::<Crate>().await.unwrap(), EntityId::new(21));
    }

    /// Commits `9.rec` right after the first listing of the records
    /// directory, as a concurrent writer would.
    #[derive(Debug)]
    struct CommitDuringScan {
        inner: InMemoryBackend,
        fired: std::sync::atomic::AtomicBool,
    }

    impl StorageBackend for CommitDuringScan {
        fn open_read(&self, name: &str) -> StorageResult<Option<Box<dyn std::io::Read + Send>>> {
            self.inner.open_read(name)
        }

        fn open_write(&self, name: &str) -> StorageResult<Box<dyn packdb_storage::WriteStream>> {
            self.inner.open_write(name)
        }

        fn replace(&self, from: &str, to: &str) -> StorageResult<()> {
            self.inner.replace(from, to)
        }

        fn remove(&self, name: &str) -> StorageResult<bool> {
            self.inner.remove(name)
        }

        fn exists(&self, name: &str) -> StorageResult<bool> {
            self.inner.exists(name)
        }

        fn list(&self, dir: &str) -> StorageResult<Vec<String>> {
            let listing = self.inner.list(dir)?;
            if dir == "crate/records" && !self.fired.swap(true, Ordering::SeqCst) {
                let mut stream = self.inner.open_write("crate/records/9.rec")?;
                stream.write_all(&packdb_codec::to_vec(&item(9, "late")).map_err(io::Error::other)?)?;
                stream.finish()?;
            }
            Ok(listing)
        }
    }

    #[tokio::test]
    async fn next_id_sees_commits_made_while_seeding() {
        let backend = CommitDuringScan {
            inner: InMemoryBackend::new(),
            fired: std::sync::atomic::AtomicBool::new(false),
        };
        let store = RecordStore::new(Streams::new(Arc::new(backend)));

        assert_eq!(store.next_id::<Crate>().await.unwrap(), EntityId::new(10));
        assert_eq!(store.read::<Crate>(EntityId::new(9)).await.unwrap().label, "late");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_next_id_never_repeats() {
        let (_, store) = store();
        let store = Arc::new(store);
        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.next_id::<Crate>().await.unwrap() })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().as_u64());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn recover_removes_only_scratch_files() {
        let (backend, store) = store();
        store.write_and_commit(&item(1, "a")).await.unwrap();
        store.write(&item(2, "b")).await.unwrap();

        assert_eq!(store.recover("crate").await.unwrap(), 1);
        assert_eq!(backend.names(), vec!["crate/records/1.rec".to_string()]);
    }
}
