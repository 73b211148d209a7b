//! Stream name validation.

use crate::error::{StorageError, StorageResult};

/// Checks that `name` is a relative, `/`-separated stream name.
///
/// Names are shared by every backend, so the rules are the strictest
/// common subset: no empty segments, no `.` or `..`, no backslashes and
/// no leading slash.
///
/// # Errors
///
/// Returns [`StorageError::InvalidName`] describing the first violation.
pub fn validate_name(name: &str) -> StorageResult<()> {
    let invalid = |reason| {
        Err(StorageError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return invalid("name is empty");
    }
    if name.contains('\\') {
        return invalid("backslashes are not allowed");
    }
    if name.contains('\0') {
        return invalid("NUL bytes are not allowed");
    }
    for segment in name.split('/') {
        match segment {
            "" => return invalid("empty path segment"),
            "." | ".." => return invalid("relative path segment"),
            _ => {}
        }
    }
    Ok(())
}
