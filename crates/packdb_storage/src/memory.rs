//! In-memory storage backend for testing.

use crate::backend::{StorageBackend, WriteStream};
use crate::error::{StorageError, StorageResult};
use crate::name::validate_name;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

type Streams = Arc<RwLock<BTreeMap<String, Arc<Vec<u8>>>>>;

/// An in-memory storage backend.
///
/// This backend stores all streams in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// Cloning the backend shares the underlying streams.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use packdb_storage::{StorageBackend, InMemoryBackend};
/// use std::io::Write;
///
/// let backend = InMemoryBackend::new();
/// let mut stream = backend.open_write("test").unwrap();
/// stream.write_all(b"test data").unwrap();
/// assert!(!backend.exists("test").unwrap());
/// stream.finish().unwrap();
/// assert!(backend.exists("test").unwrap());
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    streams: Streams,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the named stream's bytes.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn data(&self, name: &str) -> Option<Vec<u8>> {
        self.streams.read().get(name).map(|data| data.as_ref().clone())
    }

    /// Returns the names of every stream in the backend.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.streams.read().keys().cloned().collect()
    }

    /// Removes every stream from the backend.
    pub fn clear(&self) {
        self.streams.write().clear();
    }
}

struct MemoryWriteStream {
    name: String,
    buffer: Vec<u8>,
    streams: Streams,
}

impl Write for MemoryWriteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WriteStream for MemoryWriteStream {
    fn finish(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        this.streams
            .write()
            .insert(this.name, Arc::new(this.buffer));
        Ok(())
    }
}

impl StorageBackend for InMemoryBackend {
    fn open_read(&self, name: &str) -> StorageResult<Option<Box<dyn Read + Send>>> {
        validate_name(name)?;
        let data = self.streams.read().get(name).cloned();
        Ok(data.map(|data| Box::new(Cursor::new(data.as_ref().clone())) as Box<dyn Read + Send>))
    }

    fn open_write(&self, name: &str) -> StorageResult<Box<dyn WriteStream>> {
        validate_name(name)?;
        Ok(Box::new(MemoryWriteStream {
            name: name.to_string(),
            buffer: Vec::new(),
            streams: Arc::clone(&self.streams),
        }))
    }

    fn replace(&self, from: &str, to: &str) -> StorageResult<()> {
        validate_name(from)?;
        validate_name(to)?;
        let mut streams = self.streams.write();
        let data = streams
            .remove(from)
            .ok_or_else(|| StorageError::not_found(from))?;
        streams.insert(to.to_string(), data);
        Ok(())
    }

    fn remove(&self, name: &str) -> StorageResult<bool> {
        validate_name(name)?;
        Ok(self.streams.write().remove(name).is_some())
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        validate_name(name)?;
        Ok(self.streams.read().contains_key(name))
    }

    fn list(&self, dir: &str) -> StorageResult<Vec<String>> {
        validate_name(dir)?;
        let prefix = format!("{dir}/");
        let streams = self.streams.read();
        Ok(streams
            .range(prefix.clone()..)
            .take_while(|(name, _)| name.starts_with(&prefix))
            .map(|(name, _)| &name[prefix.len()..])
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(backend: &InMemoryBackend, name: &str, data: &[u8]) {
        let mut stream = backend.open_write(name).unwrap();
        stream.write_all(data).unwrap();
        stream.finish().unwrap();
    }

    fn get(backend: &InMemoryBackend, name: &str) -> Option<Vec<u8>> {
        backend.open_read(name).unwrap().map(|mut reader| {
            let mut data = Vec::new();
            reader.read_to_end(&mut data).unwrap();
            data
        })
    }

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert!(backend.names().is_empty());
        assert!(get(&backend, "missing").is_none());
    }

    #[test]
    fn memory_write_and_read() {
        let backend = InMemoryBackend::new();
        put(&backend, "a/b", b"hello world");
        assert_eq!(get(&backend, "a/b").unwrap(), b"hello world");
    }

    #[test]
    fn memory_unfinished_write_is_invisible() {
        let backend = InMemoryBackend::new();
        {
            let mut stream = backend.open_write("a").unwrap();
            stream.write_all(b"partial").unwrap();
        }
        assert!(!backend.exists("a").unwrap());
    }

    #[test]
    fn memory_write_truncates() {
        let backend = InMemoryBackend::new();
        put(&backend, "a", b"long content");
        put(&backend, "a", b"short");
        assert_eq!(get(&backend, "a").unwrap(), b"short");
    }

    #[test]
    fn memory_replace_moves_stream() {
        let backend = InMemoryBackend::new();
        put(&backend, "a.staged", b"new");
        put(&backend, "a", b"old");

        backend.replace("a.staged", "a").unwrap();

        assert_eq!(get(&backend, "a").unwrap(), b"new");
        assert!(!backend.exists("a.staged").unwrap());
    }

    #[test]
    fn memory_replace_missing_source_fails() {
        let backend = InMemoryBackend::new();
        let result = backend.replace("nope", "a");
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[test]
    fn memory_remove() {
        let backend = InMemoryBackend::new();
        put(&backend, "a", b"x");
        assert!(backend.remove("a").unwrap());
        assert!(!backend.remove("a").unwrap());
    }

    #[test]
    fn memory_list_direct_children_only() {
        let backend = InMemoryBackend::new();
        put(&backend, "w/records/1.rec", b"1");
        put(&backend, "w/records/2.rec", b"2");
        put(&backend, "w/records/nested/3.rec", b"3");
        put(&backend, "w/recordsx/4.rec", b"4");

        assert_eq!(backend.list("w/records").unwrap(), vec!["1.rec", "2.rec"]);
        assert!(backend.list("empty").unwrap().is_empty());
    }

    #[test]
    fn memory_clones_share_streams() {
        let backend = InMemoryBackend::new();
        let clone = backend.clone();
        put(&backend, "a", b"shared");
        assert_eq!(clone.data("a").unwrap(), b"shared");

        clone.clear();
        assert!(backend.names().is_empty());
    }

    #[test]
    fn memory_rejects_invalid_names() {
        let backend = InMemoryBackend::new();
        assert!(matches!(
            backend.open_write("../escape"),
            Err(StorageError::InvalidName { .. })
        ));
    }
}
