//! Secondary indexes.
//!
//! Every property an [`crate::EntitySchema`] declares as indexed gets one
//! [`Index`] stream per kind. The index maps each distinct
//! [`IndexValue`] to the set of ids currently holding it; unique indexes
//! reject a second id under the same value.

mod store;
mod table;
mod value;

pub use store::IndexStore;
pub use table::{Index, IndexKey};
pub use value::IndexValue;
