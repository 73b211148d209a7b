//! The persisted index structure.

use crate::entity::EntityId;
use crate::index::IndexValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One value of an index and the entities that currently hold it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKey {
    /// The indexed property value.
    pub value: IndexValue,
    /// Entities whose property equals `value`.
    #[serde(default)]
    pub ids: BTreeSet<EntityId>,
}

/// Secondary index over one property of one kind.
///
/// Keys are kept sorted by value so lookups are a binary search. A key
/// exists only while at least one id holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Name of the indexed property.
    pub name: String,
    /// Whether each value may map to at most one id.
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    keys: Vec<IndexKey>,
}

impl Index {
    /// Creates an empty index.
    #[must_use]
    pub fn new(name: impl Into<String>, unique: bool) -> Self {
        Self {
            name: name.into(),
            unique,
            keys: Vec::new(),
        }
    }

    /// Restores the sorted, duplicate-free key order after decoding a
    /// payload that may have been written by another version.
    pub(crate) fn normalize(&mut self) {
        self.keys.sort_by(|a, b| a.value.cmp(&b.value));
        self.keys.dedup_by(|later, earlier| {
            if later.value == earlier.value {
                earlier.ids.append(&mut later.ids);
                true
            } else {
                false
            }
        });
        self.keys.retain(|key| !key.ids.is_empty());
    }

    fn position(&self, value: &IndexValue) -> Result<usize, usize> {
        self.keys.binary_search_by(|key| key.value.cmp(value))
    }

    /// Returns the key holding `value`.
    #[must_use]
    pub fn get(&self, value: &IndexValue) -> Option<&IndexKey> {
        self.position(value).ok().map(|pos| &self.keys[pos])
    }

    /// Returns the ids mapped to `value`, in ascending order.
    pub fn ids(&self, value: &IndexValue) -> impl Iterator<Item = EntityId> + '_ {
        self.get(value).into_iter().flat_map(|key| key.ids.iter().copied())
    }

    /// Returns the id that blocks inserting `id` under `value`, if the
    /// index is unique and another entity already holds the value.
    #[must_use]
    pub fn conflict(&self, value: &IndexValue, id: EntityId) -> Option<EntityId> {
        if !self.unique {
            return None;
        }
        self.get(value)
            .and_then(|key| key.ids.iter().copied().find(|&holder| holder != id))
    }

    /// Maps `value` to `id`, creating the key if needed.
    ///
    /// Returns true if the index changed. Callers check
    /// [`Index::conflict`] first; this method does not enforce uniqueness.
    pub fn insert(&mut self, value: IndexValue, id: EntityId) -> bool {
        match self.position(&value) {
            Ok(pos) => self.keys[pos].ids.insert(id),
            Err(pos) => {
                self.keys.insert(
                    pos,
                    IndexKey {
                        value,
                        ids: BTreeSet::from([id]),
                    },
                );
                true
            }
        }
    }

    /// Removes `id` from every key, dropping keys that become empty.
    ///
    /// Returns true if the index changed.
    pub fn remove(&mut self, id: EntityId) -> bool {
        let mut changed = false;
        self.keys.retain_mut(|key| {
            changed |= key.ids.remove(&id);
            !key.ids.is_empty()
        });
        changed
    }

    /// Returns the keys in value order.
    #[must_use]
    pub fn keys(&self) -> &[IndexKey] {
        &self.keys
    }

    /// Returns the number of distinct values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if no value is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
