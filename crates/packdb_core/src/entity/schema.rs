//! Entity traits and the per-type schema descriptor.

use crate::entity::EntityId;
use crate::index::IndexValue;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Anything that carries an [`EntityId`].
pub trait Identifiable {
    /// Returns the entity's identifier.
    fn id(&self) -> EntityId;
}

/// A type that PackDB can persist.
///
/// Implementors name their kind once and, optionally, describe which
/// properties are indexed and whether lifecycle events are audited by
/// overriding [`Entity::schema`]. The kind is used as the top-level
/// directory of every stream the type owns, so it must be a single valid
/// path segment.
///
/// # Example
///
/// ```rust
/// use packdb_core::{Entity, EntityId, EntitySchema, Identifiable};
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
///         EntitySchema::new()
///             .unique_index("name", |w: &Widget| w.name.clone())
///             .audited(10)
///     }
/// }
/// ```
pub trait Entity: Identifiable + Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Stable name of the entity kind.
    const KIND: &'static str;

    /// Returns the schema registered for this type.
    ///
    /// The default schema has no indexes and no audit log.
    fn schema() -> EntitySchema<Self> {
        EntitySchema::new()
    }
}

/// Reads an indexed property from an entity.
pub type Extractor<T> = Arc<dyn Fn(&T) -> IndexValue + Send + Sync>;

/// A declared secondary index.
pub struct IndexSpec<T> {
    name: String,
    unique: bool,
    extract: Extractor<T>,
}

impl<T> IndexSpec<T> {
    /// Returns the index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if at most one entity may hold each value.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Reads the indexed value from `entity`.
    pub fn value_of(&self, entity: &T) -> IndexValue {
        (self.extract)(entity)
    }
}

impl<T> Clone for IndexSpec<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            unique: self.unique,
            extract: Arc::clone(&self.extract),
        }
    }
}

impl<T> fmt::Debug for IndexSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSpec")
            .field("name", &self.name)
            .field("unique", &self.unique)
            .finish_non_exhaustive()
    }
}

/// Whether lifecycle events of a kind are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditPolicy {
    /// No audit log is kept.
    #[default]
    Disabled,
    /// Every lifecycle event is logged, keeping at most `max_entries`
    /// entries per entity (`0` keeps everything).
    Enabled {
        /// Maximum number of retained entries.
        max_entries: usize,
    },
}

/// Statically declared metadata for an entity type.
///
/// Built once per type, usually from [`Entity::schema`], and validated
/// when it is registered with a [`crate::SchemaRegistry`].
pub struct EntitySchema<T> {
    indexes: Vec<IndexSpec<T>>,
    audit: AuditPolicy,
}

impl<T> EntitySchema<T> {
    /// Creates a schema with no indexes and auditing disabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            indexes: Vec::new(),
            audit: AuditPolicy::Disabled,
        }
    }

    /// Declares a non-unique index over the value returned by `extract`.
    #[must_use]
    pub fn index<V, F>(self, name: impl Into<String>, extract: F) -> Self
    where
        V: Into<IndexValue>,
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        self.with_index(name.into(), false, extract)
    }

    /// Declares a unique index over the value returned by `extract`.
    #[must_use]
    pub fn unique_index<V, F>(self, name: impl Into<String>, extract: F) -> Self
    where
        V: Into<IndexValue>,
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        self.with_index(name.into(), true, extract)
    }

    /// Enables the audit log, keeping at most `max_entries` entries per
    /// entity. Zero means unbounded.
    #[must_use]
    pub fn audited(mut self, max_entries: usize) -> Self {
        self.audit = AuditPolicy::Enabled { max_entries };
        self
    }

    fn with_index<V, F>(mut self, name: String, unique: bool, extract: F) -> Self
    where
        V: Into<IndexValue>,
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        self.indexes.push(IndexSpec {
            name,
            unique,
            extract: Arc::new(move |entity| extract(entity).into()),
        });
        self
    }

    /// Returns the declared indexes in declaration order.
    #[must_use]
    pub fn indexes(&self) -> &[IndexSpec<T>] {
        &self.indexes
    }

    /// Looks up a declared index by name.
    #[must_use]
    pub fn index_spec(&self, name: &str) -> Option<&IndexSpec<T>> {
        self.indexes.iter().find(|spec| spec.name == name)
    }

    /// Returns the audit policy.
    #[must_use]
    pub fn audit(&self) -> AuditPolicy {
        self.audit
    }

    /// Returns the audit cap if auditing is enabled.
    #[must_use]
    pub fn max_audit_entries(&self) -> Option<usize> {
        match self.audit {
            AuditPolicy::Disabled => None,
            AuditPolicy::Enabled { max_entries } => Some(max_entries),
        }
    }
}

impl<T> Default for EntitySchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EntitySchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySchema")
            .field("indexes", &self.indexes)
            .field("audit", &self.audit)
            .finish()
    }
}
