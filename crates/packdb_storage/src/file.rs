//! File-based storage backend for persistent storage.

use crate::backend::{StorageBackend, WriteStream};
use crate::error::{StorageError, StorageResult};
use crate::name::validate_name;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Name of the advisory lock file held in the root directory for the
/// lifetime of a [`FileBackend`]. No stream may use it as a top-level
/// segment.
pub const LOCK_FILE: &str = "LOCK";

/// A file-based storage backend.
///
/// Every stream name maps to a file below the root directory, with `/`
/// separated segments becoming subdirectories. Data survives process
/// restarts.
///
/// # Durability
///
/// - Finishing a write stream flushes it and, unless disabled with
///   [`FileBackend::sync_on_finish`], calls `File::sync_all()`
/// - `replace` is a `rename(2)` followed by a sync of the target directory
///
/// # Exclusive Access
///
/// The root directory holds a `LOCK` file locked with an exclusive advisory
/// lock. A second `FileBackend` on the same root fails with
/// [`StorageError::Locked`].
///
/// # Example
///
/// ```no_run
/// use packdb_storage::{StorageBackend, FileBackend};
/// use std::io::Write;
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("store")).unwrap();
/// let mut stream = backend.open_write("widget/records/1.rec.staged").unwrap();
/// stream.write_all(b"persistent data").unwrap();
/// stream.finish().unwrap();
/// backend.replace("widget/records/1.rec.staged", "widget/records/1.rec").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    sync: bool,
    _lock_file: File,
}

impl FileBackend {
    /// Opens or creates a file backend rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, or
    /// [`StorageError::Locked`] if another backend holds the root.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            root: root.to_path_buf(),
            sync: true,
            _lock_file: lock_file,
        })
    }

    /// Sets whether finished streams and renames are synced to disk.
    #[must_use]
    pub fn sync_on_finish(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Returns the root directory of the backend.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> StorageResult<PathBuf> {
        validate_name(name)?;
        Ok(name.split('/').fold(self.root.clone(), |path, segment| path.join(segment)))
    }

    /// Syncs a directory so that renames inside it are durable.
    #[cfg(unix)]
    fn sync_dir(&self, dir: &Path) -> StorageResult<()> {
        if self.sync {
            File::open(dir)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(&self, _dir: &Path) -> StorageResult<()> {
        // NTFS journals metadata updates; directory handles cannot be synced
        Ok(())
    }
}

struct FileWriteStream {
    writer: BufWriter<File>,
    sync: bool,
}

impl Write for FileWriteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl WriteStream for FileWriteStream {
    fn finish(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        let file = this.writer.into_inner().map_err(|err| err.into_error())?;
        if this.sync {
            file.sync_all()?;
        }
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn open_read(&self, name: &str) -> StorageResult<Option<Box<dyn Read + Send>>> {
        let path = self.path(name)?;
        match File::open(&path) {
            Ok(file) => Ok(Some(Box::new(BufReader::new(file)))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn open_write(&self, name: &str) -> StorageResult<Box<dyn WriteStream>> {
        let path = self.path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        Ok(Box::new(FileWriteStream {
            writer: BufWriter::new(file),
            sync: self.sync,
        }))
    }

    fn replace(&self, from: &str, to: &str) -> StorageResult<()> {
        let from_path = self.path(from)?;
        let to_path = self.path(to)?;

        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent)?;
        }

        match fs::rename(&from_path, &to_path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(from));
            }
            Err(err) => return Err(err.into()),
        }

        if let Some(parent) = to_path.parent() {
            self.sync_dir(parent)?;
        }
        Ok(())
    }

    fn remove(&self, name: &str) -> StorageResult<bool> {
        let path = self.path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.path(name)?.is_file())
    }

    fn list(&self, dir: &str) -> StorageResult<Vec<String>> {
        let path = self.path(dir)?;
        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
