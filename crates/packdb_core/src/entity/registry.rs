//! Startup registry of entity schemas.

use crate::entity::{Entity, EntitySchema, RecordStore};
use crate::error::{CoreError, CoreResult};
use crate::index::IndexStore;
use futures_util::future::{BoxFuture, FutureExt};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Rebuilds the indexes of one kind from its committed records.
pub(crate) type RebuildIndexes =
    for<'a> fn(&'a IndexStore, &'a RecordStore) -> BoxFuture<'a, CoreResult<usize>>;

fn rebuild_indexes<'a, T: Entity>(
    indexes: &'a IndexStore,
    records: &'a RecordStore,
) -> BoxFuture<'a, CoreResult<usize>> {
    indexes.rebuild::<T>(records).boxed()
}

struct Registered {
    type_id: TypeId,
    schema: Arc<dyn Any + Send + Sync>,
    rebuild: RebuildIndexes,
}

/// Maps every entity kind to its validated schema.
///
/// The registry is filled once while the store is being built and is
/// read-only afterwards, so lookups need no locking.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: HashMap<&'static str, Registered>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` with the schema returned by [`Entity::schema`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] if:
    /// - the kind or an index name is not a valid path segment
    /// - the kind is the name of the store's lock file
    /// - an index name is declared twice
    /// - another type already registered the same kind
    pub fn register<T: Entity>(&mut self) -> CoreResult<&mut Self> {
        self.register_schema(T::schema())
    }

    /// Registers `T` with an explicit schema.
    ///
    /// Registering the same type again replaces its schema.
    ///
    /// # Errors
    ///
    /// See [`SchemaRegistry::register`].
    pub fn register_schema<T: Entity>(&mut self, schema: EntitySchema<T>) -> CoreResult<&mut Self> {
        validate_segment(T::KIND, T::KIND, "kind")?;
        if T::KIND.eq_ignore_ascii_case(packdb_storage::LOCK_FILE) {
            return Err(CoreError::invalid_schema(
                T::KIND,
                "kind collides with the store's lock file",
            ));
        }

        let mut seen = HashSet::new();
        for spec in schema.indexes() {
            validate_segment(T::KIND, spec.name(), "index name")?;
            if !seen.insert(spec.name()) {
                return Err(CoreError::invalid_schema(
                    T::KIND,
                    format!("index {} is declared twice", spec.name()),
                ));
            }
        }

        if let Some(existing) = self.schemas.get(T::KIND) {
            if existing.type_id != TypeId::of::<T>() {
                return Err(CoreError::invalid_schema(
                    T::KIND,
                    "kind is already registered by another type",
                ));
            }
        }

        self.schemas.insert(
            T::KIND,
            Registered {
                type_id: TypeId::of::<T>(),
                schema: Arc::new(schema),
                rebuild: rebuild_indexes::<T>,
            },
        );
        Ok(self)
    }

    /// Returns the schema registered for `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeNotRegistered`] if `T` was never registered.
    pub fn schema<T: Entity>(&self) -> CoreResult<Arc<EntitySchema<T>>> {
        self.schemas
            .get(T::KIND)
            .filter(|registered| registered.type_id == TypeId::of::<T>())
            .and_then(|registered| Arc::clone(&registered.schema).downcast().ok())
            .ok_or(CoreError::TypeNotRegistered { kind: T::KIND })
    }

    /// Returns true if `T` is registered.
    #[must_use]
    pub fn contains<T: Entity>(&self) -> bool {
        self.schema::<T>().is_ok()
    }

    /// Returns the index rebuild routine of `kind`.
    pub(crate) fn index_rebuilder(&self, kind: &str) -> Option<RebuildIndexes> {
        self.schemas.get(kind).map(|registered| registered.rebuild)
    }

    /// Returns every registered kind, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.schemas.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Returns the number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

fn validate_segment(kind: &'static str, name: &str, what: &str) -> CoreResult<()> {
    if name.contains('/') {
        return Err(CoreError::invalid_schema(
            kind,
            format!("{what} {name:?} must not contain '/'"),
        ));
    }
    packdb_storage::validate_name(name)
        .map_err(|err| CoreError::invalid_schema(kind, format!("{what} {name:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityId, Identifiable};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Bolt {
        id: EntityId,
        size: u32,
    }

    impl Identifiable for Bolt {
        fn id(&self) -> EntityId {
            self.id
        }
    }

    impl Entity for Bolt {
        const KIND: &'static str = "bolt";

        fn schema() -> EntitySchema<Self> {
            EntitySchema::new().index("size", |b: &Bolt| b.size)
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Impostor {
        id: EntityId,
    }

    impl Identifiable for Impostor {
        fn id(&self) -> EntityId {
            self.id
        }
    }

    impl Entity for Impostor {
        const KIND: &'static str = "bolt";
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Nested {
        id: EntityId,
    }

    impl Identifiable for Nested {
        fn id(&self) -> EntityId {
            self.id
        }
    }

    impl Entity for Nested {
        const KIND: &'static str = "a/b";
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = SchemaRegistry::new();
        registry.register::<Bolt>().unwrap();

        let schema = registry.schema::<Bolt>().unwrap();
        assert_eq!(schema.indexes()[0].name(), "size");
        assert!(registry.contains::<Bolt>());
        assert_eq!(registry.kinds(), vec!["bolt"]);
    }

    #[test]
    fn unregistered_type_is_rejected() {
        let registry = SchemaRegistry::new();
        let err = registry.schema::<Bolt>().unwrap_err();
        assert!(matches!(err, CoreError::TypeNotRegistered { kind: "bolt" }));
    }

    #[test]
    fn kind_collision_is_rejected() {
        let mut registry = SchemaRegistry::new();
        registry.register::<Bolt>().unwrap();
        let err = registry.register::<Impostor>().unwrap_err();
        assert!(matches!(err, CoreError::InvalidSchema { .. }));
        assert!(!registry.contains::<Impostor>());
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Lock {
        id: EntityId,
    }

    impl Identifiable for Lock {
        fn id(&self) -> EntityId {
            self.id
        }
    }

    impl Entity for Lock {
        const KIND: &'static str = "LOCK";
    }

    #[test]
    fn lock_file_name_is_reserved() {
        let mut registry = SchemaRegistry::new();
        let err = registry.register::<Lock>().unwrap_err();
        assert!(matches!(err, CoreError::InvalidSchema { kind: "LOCK", .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let mut registry = SchemaRegistry::new();
        assert!(registry.register::<Nested>().is_err());

        let duplicate = EntitySchema::new()
            .index("size", |b: &Bolt| b.size)
            .unique_index("size", |b: &Bolt| b.size);
        assert!(registry.register_schema(duplicate).is_err());

        let empty = EntitySchema::new().index("", |b: &Bolt| b.size);
        assert!(registry.register_schema(empty).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn reregistering_replaces_schema() {
        let mut registry = SchemaRegistry::new();
        registry.register::<Bolt>().unwrap();
        registry
            .register_schema(EntitySchema::<Bolt>::new().audited(2))
            .unwrap();

        let schema = registry.schema::<Bolt>().unwrap();
        assert!(schema.indexes().is_empty());
        assert_eq!(schema.max_audit_entries(), Some(2));
        assert_eq!(registry.len(), 1);
    }
}
