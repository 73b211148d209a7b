//! Staged persistence of audit logs.

use crate::audit::{AuditGenerator, AuditLog};
use crate::entity::{Entity, EntityId, SchemaRegistry};
use crate::error::{CoreError, CoreResult};
use crate::layout;
use crate::streams::Streams;
use std::sync::Arc;

const PARTICIPANT: &str = "audit log";

/// Stages and commits audit logs alongside record writes.
///
/// Every event method reads the committed log, appends one entry through
/// the [`AuditGenerator`] and writes the result to the staged location.
/// Nothing is visible to [`AuditStore::read_all_events`] until
/// [`AuditStore::commit_events`] moves the staged log into place.
///
/// Kinds whose schema does not enable auditing are ignored: event,
/// commit and discard methods return `Ok(false)` and touch nothing.
pub struct AuditStore {
    streams: Streams,
    registry: Arc<SchemaRegistry>,
}

impl AuditStore {
    pub(crate) fn new(streams: Streams, registry: Arc<SchemaRegistry>) -> Self {
        Self { streams, registry }
    }

    fn generator<T: Entity>(&self) -> CoreResult<Option<AuditGenerator>> {
        Ok(self
            .registry
            .schema::<T>()?
            .max_audit_entries()
            .map(AuditGenerator::new))
    }

    async fn stage<T, F>(&self, id: EntityId, build: F) -> CoreResult<bool>
    where
        T: Entity,
        F: FnOnce(&AuditGenerator, Option<AuditLog<T>>) -> AuditLog<T>,
    {
        let Some(generator) = self.generator::<T>()? else {
            return Ok(false);
        };
        let current = self.streams.read(layout::audit_log(T::KIND, id)).await?;
        let log = build(&generator, current);
        self.streams
            .write(layout::staged_audit_log(T::KIND, id), &log)
            .await?;
        Ok(true)
    }

    /// Stages a Create entry for `data`.
    ///
    /// An id written again after its record was purged keeps its earlier
    /// history; the Create entry is appended to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the current log cannot be read or the staged
    /// log cannot be written.
    pub async fn creation_event<T: Entity>(&self, data: &T) -> CoreResult<bool> {
        self.stage(data.id(), |generator, current| match current {
            Some(log) => generator.create_log(data, log),
            None => generator.new_log(data),
        })
        .await
    }

    /// Stages an Update entry from `old_data` to `new_data`.
    ///
    /// # Errors
    ///
    /// See [`AuditStore::creation_event`].
    pub async fn update_event<T: Entity>(&self, new_data: &T, old_data: &T) -> CoreResult<bool> {
        self.stage(new_data.id(), |generator, current| {
            generator.update_log(new_data, old_data, current.unwrap_or_default())
        })
        .await
    }

    /// Stages a Delete entry for `data`.
    ///
    /// # Errors
    ///
    /// See [`AuditStore::creation_event`].
    pub async fn delete_event<T: Entity>(&self, data: &T) -> CoreResult<bool> {
        self.stage(data.id(), |generator, current| {
            generator.delete_log(data, current.unwrap_or_default())
        })
        .await
    }

    /// Stages an Undelete entry for `data`.
    ///
    /// # Errors
    ///
    /// See [`AuditStore::creation_event`].
    pub async fn undelete_event<T: Entity>(&self, data: &T) -> CoreResult<bool> {
        self.stage(data.id(), |generator, current| {
            generator.undelete_log(data, current.unwrap_or_default())
        })
        .await
    }

    /// Stages a Rollback entry for `data`.
    ///
    /// # Errors
    ///
    /// See [`AuditStore::creation_event`].
    pub async fn rollback_event<T: Entity>(&self, data: &T) -> CoreResult<bool> {
        self.stage(data.id(), |generator, current| {
            generator.rollback_log(data, current.unwrap_or_default())
        })
        .await
    }

    /// Publishes the staged log of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StageConflict`] if nothing is staged for an
    /// audited kind.
    pub async fn commit_events<T: Entity>(&self, id: EntityId) -> CoreResult<bool> {
        if self.generator::<T>()?.is_none() {
            return Ok(false);
        }
        let staged = layout::staged_audit_log(T::KIND, id);
        if !self.streams.replace(staged, layout::audit_log(T::KIND, id)).await? {
            return Err(CoreError::stage_conflict(PARTICIPANT, T::KIND, id));
        }
        Ok(true)
    }

    /// Drops the staged log of `id`, leaving the committed log as it was.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StageConflict`] if nothing is staged for an
    /// audited kind.
    pub async fn discard_events<T: Entity>(&self, id: EntityId) -> CoreResult<bool> {
        if self.generator::<T>()?.is_none() {
            return Ok(false);
        }
        if !self
            .streams
            .remove(layout::staged_audit_log(T::KIND, id))
            .await?
        {
            return Err(CoreError::stage_conflict(PARTICIPANT, T::KIND, id));
        }
        Ok(true)
    }

    /// Returns the committed log of `id`.
    ///
    /// Returns `None` if the kind is not audited or the entity has no log
    /// yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or decoded.
    pub async fn read_all_events<T: Entity>(&self, id: EntityId) -> CoreResult<Option<AuditLog<T>>> {
        if self.generator::<T>()?.is_none() {
            return Ok(None);
        }
        self.streams.read(layout::audit_log(T::KIND, id)).await
    }

    /// Removes staged logs left behind by an interrupted process.
    pub(crate) async fn recover(&self, kind: &str) -> CoreResult<usize> {
        let dir = layout::audit_dir(kind);
        let mut removed = 0;
        for file in self.streams.list(dir.clone()).await? {
            if layout::is_scratch(&file) && self.streams.remove(format!("{dir}/{file}")).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for AuditStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditStore")
            .field("streams", &self.streams)
            .finish_non_exhaustive()
    }
}
