//! MessagePack decoder.

use crate::error::CodecResult;
use serde::de::DeserializeOwned;
use std::io::Read;

/// Deserializes a value of type `T` from `reader`.
///
/// Accepts both map-keyed and positional struct encodings. Unknown map
/// keys are ignored and missing fields fall back to their
/// `#[serde(default)]` value when the type declares one.
///
/// # Errors
///
/// Returns [`crate::CodecError::UnexpectedEof`] if the stream ends mid-value,
/// or [`crate::CodecError::DecodingFailed`] if the bytes do not describe a `T`.
pub fn deserialize<R, T>(reader: R) -> CodecResult<T>
where
    R: Read,
    T: DeserializeOwned,
{
    Ok(rmp_serde::decode::from_read(reader)?)
}

/// Deserializes a value of type `T` from a byte slice.
///
/// # Errors
///
/// See [`deserialize`].
pub fn from_slice<T>(bytes: &[u8]) -> CodecResult<T>
where
    T: DeserializeOwned,
{
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use crate::to_vec;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize)]
    struct WidgetV1 {
        id: u64,
        name: String,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct WidgetV2 {
        id: u64,
        name: String,
        #[serde(default)]
        color: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Slim {
        id: u64,
    }

    #[test]
    fn added_field_defaults() {
        let bytes = to_vec(&WidgetV1 {
            id: 3,
            name: "gear".into(),
        })
        .unwrap();

        let decoded: WidgetV2 = from_slice(&bytes).unwrap();
        assert_eq!(
            decoded,
            WidgetV2 {
                id: 3,
                name: "gear".into(),
                color: None
            }
        );
    }

    #[test]
    fn removed_field_is_ignored() {
        let bytes = to_vec(&WidgetV1 {
            id: 9,
            name: "bolt".into(),
        })
        .unwrap();

        let decoded: Slim = from_slice(&bytes).unwrap();
        assert_eq!(decoded, Slim { id: 9 });
    }

    #[test]
    fn truncated_input_is_eof() {
        let bytes = to_vec(&WidgetV1 {
            id: 9,
            name: "a long enough name".into(),
        })
        .unwrap();

        let result: CodecResult<WidgetV2> = deserialize(&bytes[..bytes.len() - 4]);
        assert_eq!(result.unwrap_err(), CodecError::UnexpectedEof);
    }

    #[test]
    fn empty_input_is_eof() {
        let result: CodecResult<Slim> = from_slice(&[]);
        assert_eq!(result.unwrap_err(), CodecError::UnexpectedEof);
    }

    #[test]
    fn wrong_shape_fails() {
        let bytes = to_vec(&"just a string").unwrap();
        let result: CodecResult<Slim> = from_slice(&bytes);
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
    }
}
