//! # PackDB Testkit
//!
//! Test utilities for PackDB.
//!
//! This crate provides:
//! - Sample entity types with indexed and audited schemas
//! - Store fixtures over memory, temporary directories and faulty backends
//! - A fault-injecting [`packdb_storage::StorageBackend`] wrapper
//! - A gated backend that freezes an operation between two steps
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use packdb_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn widgets_round_trip() {
//!     let store = TestStore::memory().await;
//!     let widget = Widget::new(1, "gear");
//!     store.write(&widget).await.unwrap();
//!     assert_eq!(store.read::<Widget>(widget.id).await.unwrap(), widget);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod entities;
pub mod faulty;
pub mod fixtures;
pub mod gated;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::entities::*;
    pub use crate::faulty::*;
    pub use crate::fixtures::*;
    pub use crate::gated::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
}

pub use entities::*;
pub use faulty::*;
pub use fixtures::*;
pub use gated::*;
pub use generators::*;

use tracing_subscriber::EnvFilter;

/// Installs a test-friendly `tracing` subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`. Calling this
/// more than once is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
