//! Per-entity audit logs.
//!
//! The [`AuditGenerator`] turns a lifecycle event into the next version of
//! an entity's [`AuditLog`]; the [`AuditStore`] stages that version next to
//! the record and publishes it once the record has been committed.

mod generator;
mod log;
mod store;

pub use generator::AuditGenerator;
pub use log::{AuditEntry, AuditKind, AuditLog};
pub use store::AuditStore;
