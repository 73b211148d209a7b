//! Sample entity types.
//!
//! - [`Widget`]: unique `name` index, audited with a cap of
//!   [`WIDGET_AUDIT_CAP`] entries
//! - [`Gadget`]: non-unique `color` index (optional) and `weight` index,
//!   not audited

use packdb_core::{Entity, EntityId, EntitySchema, Identifiable, SchemaRegistry};
use serde::{Deserialize, Serialize};

/// Audit cap declared by [`Widget`].
pub const WIDGET_AUDIT_CAP: usize = 3;

/// An entity with a unique name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Widget {
    /// Identifier.
    pub id: EntityId,
    /// Unique display name.
    pub name: String,
    /// Free-form revision counter.
    #[serde(default)]
    pub revision: u32,
}

impl Widget {
    /// Creates a widget at revision 0.
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(id),
            name: name.into(),
            revision: 0,
        }
    }

    /// Returns a copy with the revision set.
    #[must_use]
    pub fn at_revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }
}

impl Identifiable for Widget {
    fn id(&self) -> EntityId {
        self.id
    }
}

impl Entity for Widget {
    const KIND: &'static str = "widget";

    fn schema() -> EntitySchema<Self> {
        EntitySchema::new()
            .unique_index("name", |w: &Widget| w.name.clone())
            .audited(WIDGET_AUDIT_CAP)
    }
}

/// An entity with shared, optional property values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gadget {
    /// Identifier.
    pub id: EntityId,
    /// Color; gadgets without one are not indexed by color.
    #[serde(default)]
    pub color: Option<String>,
    /// Weight in grams.
    pub weight: u32,
}

impl Gadget {
    /// Creates a gadget.
    pub fn new(id: u64, color: Option<&str>, weight: u32) -> Self {
        Self {
            id: EntityId::new(id),
            color: color.map(Into::into),
            weight,
        }
    }
}

impl Identifiable for Gadget {
    fn id(&self) -> EntityId {
        self.id
    }
}

impl Entity for Gadget {
    const KIND: &'static str = "gadget";

    fn schema() -> EntitySchema<Self> {
        EntitySchema::new()
            .index("color", |g: &Gadget| g.color.clone())
            .index("weight", |g: &Gadget| g.weight)
    }
}

/// Returns a registry holding [`Widget`] and [`Gadget`].
///
/// # Panics
///
/// Panics if either schema fails validation, which would be a bug in this
/// crate.
pub fn sample_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register::<Widget>()
        .and_then(|registry| registry.register::<Gadget>())
        .expect("sample schemas are valid");
    registry
}
