//! Audit log structures.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use packdb_codec::CodecError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// The lifecycle event an [`AuditEntry`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditKind {
    /// The entity was written for the first time.
    Create,
    /// A committed entity was overwritten.
    Update,
    /// The entity was soft-deleted.
    Delete,
    /// A soft-deleted entity was restored.
    Undelete,
    /// The entity was forced back to an earlier payload.
    Rollback,
}

/// One entry of an entity's audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry<T> {
    /// What happened.
    pub kind: AuditKind,
    /// When it was recorded.
    pub recorded_at: DateTime<Utc>,
    /// The entity after the event. For [`AuditKind::Delete`] this is the
    /// payload that was deleted.
    pub snapshot: T,
    /// The entity before the event; only set for [`AuditKind::Update`].
    /// A missing field decodes as `None`.
    pub previous: Option<T>,
}

impl<T: Serialize> AuditEntry<T> {
    /// Lists the top-level fields that differ between `previous` and
    /// `snapshot`, sorted by name.
    ///
    /// Entries without a previous state, and entities that do not
    /// serialize to a map, report no changed fields.
    ///
    /// # Errors
    ///
    /// Returns a codec error if either state cannot be serialized.
    pub fn changed_fields(&self) -> CoreResult<Vec<String>> {
        let Some(previous) = &self.previous else {
            return Ok(Vec::new());
        };

        let before = to_json(previous)?;
        let after = to_json(&self.snapshot)?;
        let (Some(before), Some(after)) = (before.as_object(), after.as_object()) else {
            return Ok(Vec::new());
        };

        let mut changed: Vec<String> = after
            .iter()
            .filter(|(field, value)| before.get(*field) != Some(*value))
            .map(|(field, _)| field.clone())
            .chain(
                before
                    .keys()
                    .filter(|field| !after.contains_key(*field))
                    .cloned(),
            )
            .collect();
        changed.sort_unstable();
        Ok(changed)
    }
}

fn to_json<T: Serialize>(value: &T) -> CoreResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|err| CoreError::Codec(CodecError::encoding_failed(err.to_string())))
}

/// The capped history of one entity.
///
/// Entries are in chronological order. Once the log holds its maximum
/// number of entries, appending evicts the oldest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog<T> {
    #[serde(default = "VecDeque::new")]
    entries: VecDeque<AuditEntry<T>>,
}

impl<T> AuditLog<T> {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Appends `entry`, evicting from the front until at most
    /// `max_entries` remain. Zero means unbounded.
    pub fn push(&mut self, entry: AuditEntry<T>, max_entries: usize) {
        self.entries.push_back(entry);
        if max_entries > 0 {
            while self.entries.len() > max_entries {
                self.entries.pop_front();
            }
        }
    }

    /// Returns the entry at `position`, oldest first.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&AuditEntry<T>> {
        self.entries.get(position)
    }

    /// Returns the most recent entry.
    #[must_use]
    pub fn last(&self) -> Option<&AuditEntry<T>> {
        self.entries.back()
    }

    /// Iterates over the entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &AuditEntry<T>> + '_ {
        self.entries.iter()
    }

    /// Returns the kinds of every entry, oldest first.
    #[must_use]
    pub fn kinds(&self) -> Vec<AuditKind> {
        self.entries.iter().map(|entry| entry.kind).collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the log has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consumes the log, returning its entries oldest first.
    #[must_use]
    pub fn into_entries(self) -> Vec<AuditEntry<T>> {
        self.entries.into()
    }
}

impl<T> Default for AuditLog<T> {
    fn default() -> Self {
        Self::new()
    }
}
