//! Async access to the storage backend.

use crate::error::{CoreError, CoreResult};
use packdb_storage::{StorageBackend, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::task;

/// Runs backend calls on tokio's blocking pool and routes payloads
/// through the codec.
///
/// Every method suspends the calling task instead of blocking a runtime
/// worker, so slow disks only stall the operation that touches them.
#[derive(Debug, Clone)]
pub(crate) struct Streams {
    backend: Arc<dyn StorageBackend>,
}

impl Streams {
    pub(crate) fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub(crate) fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    async fn blocking<R, F>(&self, op: F) -> CoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&dyn StorageBackend) -> CoreResult<R> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        task::spawn_blocking(move || op(backend.as_ref()))
            .await
            .map_err(|err| CoreError::Io(io::Error::other(err)))?
    }

    /// Decodes the named stream, or returns `None` if it does not exist.
    pub(crate) async fn read<T>(&self, name: String) -> CoreResult<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.blocking(move |backend| match backend.open_read(&name)? {
            Some(reader) => Ok(Some(packdb_codec::deserialize(reader)?)),
            None => Ok(None),
        })
        .await
    }

    /// Encodes `value` and writes it to the named stream, replacing any
    /// previous content.
    pub(crate) async fn write<T>(&self, name: String, value: &T) -> CoreResult<()>
    where
        T: Serialize + ?Sized,
    {
        let bytes = packdb_codec::to_vec(value)?;
        self.blocking(move |backend| {
            let mut stream = backend.open_write(&name)?;
            stream.write_all(&bytes)?;
            stream.finish()?;
            Ok(())
        })
        .await
    }

    /// Atomically moves `from` over `to`.
    ///
    /// Returns `false` if `from` does not exist.
    pub(crate) async fn replace(&self, from: String, to: String) -> CoreResult<bool> {
        self.blocking(move |backend| match backend.replace(&from, &to) {
            Ok(()) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        })
        .await
    }

    pub(crate) async fn remove(&self, name: String) -> CoreResult<bool> {
        self.blocking(move |backend| Ok(backend.remove(&name)?))
            .await
    }

    pub(crate) async fn exists(&self, name: String) -> CoreResult<bool> {
        self.blocking(move |backend| Ok(backend.exists(&name)?))
            .await
    }

    pub(crate) async fn list(&self, dir: String) -> CoreResult<Vec<String>> {
        self.blocking(move |backend| Ok(backend.list(&dir)?)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packdb_storage::InMemoryBackend;

    fn streams() -> (InMemoryBackend, Streams) {
        let backend = InMemoryBackend::new();
        let streams = Streams::new(Arc::new(backend.clone()));
        (backend, streams)
    }

    #[tokio::test]
    async fn write_then_read() {
        let (_, streams) = streams();
        streams.write("a/1".into(), &vec![1u32, 2, 3]).await.unwrap();

        let value: Option<Vec<u32>> = streams.read("a/1".into()).await.unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
        let missing: Option<Vec<u32>> = streams.read("a/2".into()).await.unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn replace_reports_missing_source() {
        let (backend, streams) = streams();
        streams.write("a/1.staged".into(), &"x").await.unwrap();

        assert!(streams.replace("a/1.staged".into(), "a/1".into()).await.unwrap());
        assert!(!streams.replace("a/1.staged".into(), "a/1".into()).await.unwrap());
        assert_eq!(backend.names(), vec!["a/1".to_string()]);
    }

    #[tokio::test]
    async fn corrupt_payload_is_a_codec_error() {
        let (backend, streams) = streams();
        let mut stream = backend.open_write("a/1").unwrap();
        stream.write_all(&[0xc1]).unwrap();
        stream.finish().unwrap();

        let err = streams.read::<u32>("a/1".into()).await.unwrap_err();
        assert!(matches!(err, CoreError::Codec(_)));
    }
}
