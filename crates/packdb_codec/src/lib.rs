//! # PackDB Codec
//!
//! MessagePack encoding/decoding for PackDB.
//!
//! Every payload PackDB persists - entity records, index structures and
//! audit logs - goes through this crate. The wire format is plain
//! MessagePack with these conventions:
//!
//! - Structs are maps keyed by field name, never positional arrays
//! - Unknown keys are skipped on decode
//! - Missing keys take the field's `#[serde(default)]` value
//!
//! which lets entity types gain or lose fields without a migration step.
//!
//! ## Usage
//!
//! ```
//! use packdb_codec::{from_slice, to_vec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Widget {
//!     id: u64,
//!     name: String,
//! }
//!
//! let widget = Widget { id: 1, name: "gear".into() };
//! let bytes = to_vec(&widget).unwrap();
//! let decoded: Widget = from_slice(&bytes).unwrap();
//! assert_eq!(widget, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;

pub use decoder::{deserialize, from_slice};
pub use encoder::{serialize, to_vec};
pub use error::{CodecError, CodecResult};
