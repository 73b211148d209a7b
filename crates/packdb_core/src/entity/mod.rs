//! Entity types, schemas and the record store.

mod id;
mod registry;
mod schema;
mod store;

pub use id::EntityId;
pub use registry::SchemaRegistry;
pub use schema::{AuditPolicy, Entity, EntitySchema, Extractor, Identifiable, IndexSpec};
pub use store::RecordStore;
