//! Multi-participant transactions.
//!
//! A PackDB write touches up to three participants: the record, every
//! index of the kind and the audit log. Each step that succeeds is written
//! to a [`Journal`] together with the way to take it back, and the whole
//! journal is unwound in reverse order if a later step fails. Combined
//! with the per-id lock, readers never observe a partially applied write.

mod journal;

pub(crate) use journal::{Journal, Undo};

use crate::audit::AuditStore;
use crate::entity::RecordStore;
use crate::index::IndexStore;

/// The stores a transaction coordinates.
#[derive(Debug)]
pub(crate) struct Participants {
    pub(crate) records: RecordStore,
    pub(crate) indexes: IndexStore,
    pub(crate) audit: AuditStore,
}
