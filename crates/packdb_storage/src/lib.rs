//! # PackDB Storage
//!
//! Stream storage backends for PackDB.
//!
//! This crate provides the lowest-level storage abstraction for PackDB.
//! Backends are **named byte streams** - they do not interpret the data
//! they store.
//!
//! ## Design Principles
//!
//! - Backends open streams for reading and writing by name
//! - A write only becomes visible once its stream is finished
//! - `replace` is atomic: readers see the old stream or the new one, never a mix
//! - No knowledge of PackDB record, index or audit formats
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral stores
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use packdb_storage::{StorageBackend, InMemoryBackend};
//! use std::io::{Read, Write};
//!
//! let backend = InMemoryBackend::new();
//! let mut stream = backend.open_write("widget/1.staged").unwrap();
//! stream.write_all(b"hello world").unwrap();
//! stream.finish().unwrap();
//!
//! backend.replace("widget/1.staged", "widget/1").unwrap();
//!
//! let mut data = Vec::new();
//! backend.open_read("widget/1").unwrap().unwrap().read_to_end(&mut data).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod name;

pub use backend::{StorageBackend, WriteStream};
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, LOCK_FILE};
pub use memory::InMemoryBackend;
pub use name::validate_name;
