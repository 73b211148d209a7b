//! Storage backend trait definition.

use crate::error::StorageResult;
use std::fmt;
use std::io::{Read, Write};

/// A stream opened for writing.
///
/// Bytes written to the stream are not visible to readers until
/// [`WriteStream::finish`] returns. Dropping the stream without finishing
/// it disposes of it; backends make no promise about what a disposed
/// stream leaves behind, which is why PackDB only ever writes to
/// scratch names and publishes them with [`StorageBackend::replace`].
pub trait WriteStream: Write + Send {
    /// Flushes and closes the stream, making its contents durable and
    /// visible under the name it was opened with.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or syncing fails.
    fn finish(self: Box<Self>) -> StorageResult<()>;
}

/// A low-level storage backend for PackDB.
///
/// Storage backends are **named byte streams**. PackDB owns all format
/// interpretation - backends do not understand records, indexes or
/// audit logs.
///
/// # Invariants
///
/// - `open_read` returns exactly the bytes of the last finished write
/// - `replace` is atomic from a reader's point of view
/// - `list` returns only direct children of the directory, sorted
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Opens the named stream for reading.
    ///
    /// Returns `None` if no stream exists under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or an I/O error occurs.
    fn open_read(&self, name: &str) -> StorageResult<Option<Box<dyn Read + Send>>>;

    /// Opens the named stream for writing, truncating any previous content.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the stream cannot be created.
    fn open_write(&self, name: &str) -> StorageResult<Box<dyn WriteStream>>;

    /// Atomically moves the stream `from` to `to`, replacing `to` if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if `from` does not exist,
    /// or an error if the rename fails.
    fn replace(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Removes the named stream.
    ///
    /// Returns `false` if there was nothing to remove.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal fails.
    fn remove(&self, name: &str) -> StorageResult<bool>;

    /// Returns true if a stream exists under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the check fails.
    fn exists(&self, name: &str) -> StorageResult<bool>;

    /// Lists the names of streams directly inside `dir`, sorted.
    ///
    /// Returned names are relative to `dir`. A directory that does not
    /// exist lists as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn list(&self, dir: &str) -> StorageResult<Vec<String>>;
}
