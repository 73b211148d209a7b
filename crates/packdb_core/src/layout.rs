//! Stream names for everything a kind persists.
//!
//! ```text
//! {kind}/records/{id}.rec            committed payload
//! {kind}/records/{id}.rec.staged     staged payload
//! {kind}/records/{id}.rec.deleted    soft-deleted payload
//! {kind}/records/{id}.rec.rollback   transient rollback payload
//! {kind}/indexes/{name}.idx          index
//! {kind}/indexes/{name}.idx.staged   transient index rewrite
//! {kind}/audit/{id}.log              committed audit log
//! {kind}/audit/{id}.log.staged       staged audit log
//! ```

use crate::entity::EntityId;

const STAGED: &str = ".staged";
const ROLLBACK: &str = ".rollback";

pub(crate) fn records_dir(kind: &str) -> String {
    format!("{kind}/records")
}

pub(crate) fn record(kind: &str, id: EntityId) -> String {
    format!("{kind}/records/{id}.rec")
}

pub(crate) fn staged_record(kind: &str, id: EntityId) -> String {
    format!("{kind}/records/{id}.rec{STAGED}")
}

pub(crate) fn deleted_record(kind: &str, id: EntityId) -> String {
    format!("{kind}/records/{id}.rec.deleted")
}

pub(crate) fn rollback_record(kind: &str, id: EntityId) -> String {
    format!("{kind}/records/{id}.rec{ROLLBACK}")
}

pub(crate) fn indexes_dir(kind: &str) -> String {
    format!("{kind}/indexes")
}

pub(crate) fn index(kind: &str, name: &str) -> String {
    format!("{kind}/indexes/{name}.idx")
}

pub(crate) fn staged_index(kind: &str, name: &str) -> String {
    format!("{kind}/indexes/{name}.idx{STAGED}")
}

pub(crate) fn audit_dir(kind: &str) -> String {
    format!("{kind}/audit")
}

pub(crate) fn audit_log(kind: &str, id: EntityId) -> String {
    format!("{kind}/audit/{id}.log")
}

pub(crate) fn staged_audit_log(kind: &str, id: EntityId) -> String {
    format!("{kind}/audit/{id}.log{STAGED}")
}

/// Parses the id from a file name in a records or audit directory.
pub(crate) fn file_id(file_name: &str) -> Option<EntityId> {
    file_name.split('.').next()?.parse().ok()
}

/// Returns the id of a committed record file (`{id}.rec`).
pub(crate) fn committed_record_id(file_name: &str) -> Option<EntityId> {
    file_name.strip_suffix(".rec")?.parse().ok()
}

/// Returns true for files that only exist while an operation is running.
pub(crate) fn is_scratch(file_name: &str) -> bool {
    file_name.ends_with(STAGED) || file_name.ends_with(ROLLBACK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        let id = EntityId::new(12);
        assert_eq!(record("widget", id), "widget/records/12.rec");
        assert_eq!(staged_record("widget", id), "widget/records/12.rec.staged");
        assert_eq!(index("widget", "name"), "widget/indexes/name.idx");
        assert_eq!(audit_log("widget", id), "widget/audit/12.log");
    }

    #[test]
    fn parse_file_names() {
        assert_eq!(file_id("12.rec.deleted"), Some(EntityId::new(12)));
        assert_eq!(file_id("name.idx"), None);
        assert_eq!(committed_record_id("7.rec"), Some(EntityId::new(7)));
        assert_eq!(committed_record_id("7.rec.staged"), None);
        assert!(is_scratch("7.rec.rollback"));
        assert!(is_scratch("name.idx.staged"));
        assert!(!is_scratch("7.log"));
    }
}
