//! Indexable property values.

use crate::entity::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A property value as stored in an index.
///
/// Index values must be:
/// - Totally ordered (keys are kept sorted for binary search)
/// - Hashable
/// - Serializable to MessagePack (indexes are persisted)
///
/// Every integer that fits in an `i64` is normalised to [`IndexValue::Int`]
/// whatever its Rust type, so a `u32` property can be looked up with an
/// `i32` literal. Only `u64` values above `i64::MAX` use
/// [`IndexValue::UInt`], which keeps the derived ordering numeric.
///
/// [`IndexValue::Null`] is never written to an index; entities whose
/// property is `None` are simply not indexed under that property.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IndexValue {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integer representable as `i64`.
    Int(i64),
    /// Unsigned integers above `i64::MAX`.
    UInt(u64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl IndexValue {
    /// Returns true for [`IndexValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::UInt(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value:?}"),
            Self::Bytes(value) => write!(f, "{} bytes", value.len()),
        }
    }
}

macro_rules! impl_from_small_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for IndexValue {
            fn from(value: $ty) -> Self {
                Self::Int(i64::from(value))
            }
        })*
    };
}

impl_from_small_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for IndexValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(value) => Self::Int(value),
            Err(_) => Self::UInt(value),
        }
    }
}

impl From<usize> for IndexValue {
    fn from(value: usize) -> Self {
        Self::from(value as u64)
    }
}

impl From<isize> for IndexValue {
    fn from(value: isize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<bool> for IndexValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<&String> for IndexValue {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<char> for IndexValue {
    fn from(value: char) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<u8>> for IndexValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for IndexValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<EntityId> for IndexValue {
    fn from(value: EntityId) -> Self {
        Self::from(value.as_u64())
    }
}

impl<V: Into<IndexValue>> From<Option<V>> for IndexValue {
    fn from(value: Option<V>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
