//! # PackDB Core
//!
//! Transactional record engine for PackDB.
//!
//! This crate provides:
//! - Staged record persistence with soft-delete, undelete and rollback
//! - Unique and non-unique secondary indexes
//! - Capped per-entity audit logs
//! - Timeout-bounded per-entity locks
//! - [`DataManager`], which makes every write atomic across all of the above
//!
//! Entity types describe themselves through the [`Entity`] trait and an
//! [`EntitySchema`] registered once at startup. Everything is persisted as
//! MessagePack through a [`packdb_storage::StorageBackend`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod audit;
mod config;
mod entity;
mod error;
mod index;
mod layout;
mod lock;
mod manager;
mod streams;
mod transaction;

pub use audit::{AuditEntry, AuditGenerator, AuditKind, AuditLog, AuditStore};
pub use config::Config;
pub use entity::{
    AuditPolicy, Entity, EntityId, EntitySchema, Extractor, Identifiable, IndexSpec, RecordStore,
    SchemaRegistry,
};
pub use error::{CoreError, CoreResult};
pub use index::{Index, IndexKey, IndexStore, IndexValue};
pub use lock::{
    KeyGuard, LockKey, LockProvider, Semaphore, SemaphoreFactory, TokioSemaphore,
    TokioSemaphoreFactory,
};
pub use manager::{DataManager, DataManagerBuilder};
