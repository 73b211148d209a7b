//! MessagePack encoder.

use crate::error::CodecResult;
use serde::Serialize;
use std::io::Write;

/// Serializes `value` onto `writer` as MessagePack.
///
/// Structs are written as maps keyed by field name rather than as
/// positional arrays, so a reader built against an older or newer
/// version of the type can still decode the payload.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized or the writer fails.
pub fn serialize<W, T>(writer: &mut W, value: &T) -> CodecResult<()>
where
    W: Write + ?Sized,
    T: Serialize + ?Sized,
{
    rmp_serde::encode::write_named(writer, value)?;
    Ok(())
}

/// Serializes `value` into a freshly allocated buffer.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn to_vec<T>(value: &T) -> CodecResult<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    Ok(rmp_serde::to_vec_named(value)?)
}
