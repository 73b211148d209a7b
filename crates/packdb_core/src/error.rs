//! Error types for PackDB core.

use crate::entity::EntityId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in PackDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] packdb_storage::StorageError),

    /// MessagePack codec error.
    #[error("codec error: {0}")]
    Codec(#[from] packdb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No committed record exists for the id.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity kind searched.
        kind: &'static str,
        /// The id that was not found.
        id: EntityId,
    },

    /// The record is soft-deleted and must be restored first.
    #[error("{kind} {id} is deleted")]
    SoftDeleted {
        /// Entity kind.
        kind: &'static str,
        /// The deleted id.
        id: EntityId,
    },

    /// A unique index already maps the value to another entity.
    #[error("unique index {kind}.{index} already maps {value} to {existing}")]
    ConstraintViolation {
        /// Entity kind.
        kind: &'static str,
        /// Name of the unique index.
        index: String,
        /// Display form of the conflicting value.
        value: String,
        /// The id that already holds the value.
        existing: EntityId,
    },

    /// Commit or discard was requested with nothing staged.
    #[error("no staged {participant} for {kind} {id}")]
    StageConflict {
        /// The participant that had nothing staged ("record" or "audit log").
        participant: &'static str,
        /// Entity kind.
        kind: &'static str,
        /// The id without a staged payload.
        id: EntityId,
    },

    /// The per-id lock was not acquired in time.
    #[error("timed out after {timeout_ms}ms waiting for the lock on {kind} {id}")]
    LockTimeout {
        /// Entity kind.
        kind: &'static str,
        /// The contended id.
        id: EntityId,
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u128,
    },

    /// The entity type was never registered with the schema registry.
    #[error("entity kind {kind} is not registered")]
    TypeNotRegistered {
        /// The unregistered kind.
        kind: &'static str,
    },

    /// A schema failed validation at registration.
    #[error("invalid schema for {kind}: {message}")]
    InvalidSchema {
        /// Entity kind.
        kind: &'static str,
        /// What is wrong with the schema.
        message: String,
    },

    /// The property is not declared as indexed for the kind.
    #[error("{kind} has no index named {index}")]
    IndexNotDeclared {
        /// Entity kind.
        kind: &'static str,
        /// The requested index name.
        index: String,
    },

    /// The requested audit entry does not exist.
    #[error("{kind} {id} has no audit entry at position {position}")]
    AuditEntryNotFound {
        /// Entity kind.
        kind: &'static str,
        /// Entity id.
        id: EntityId,
        /// The requested position in the log.
        position: usize,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a not found error.
    pub fn not_found(kind: &'static str, id: EntityId) -> Self {
        Self::NotFound { kind, id }
    }

    /// Creates a soft-deleted error.
    pub fn soft_deleted(kind: &'static str, id: EntityId) -> Self {
        Self::SoftDeleted { kind, id }
    }

    /// Creates a stage conflict error.
    pub fn stage_conflict(participant: &'static str, kind: &'static str, id: EntityId) -> Self {
        Self::StageConflict {
            participant,
            kind,
            id,
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(kind: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            kind,
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the error means the record does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
