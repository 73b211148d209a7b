//! Builds audit logs from entity snapshots.

use crate::audit::{AuditEntry, AuditKind, AuditLog};
use chrono::Utc;

/// Produces the next version of an audit log for each lifecycle event.
///
/// The generator never touches storage; it takes the current log by value
/// and returns the log with one more entry, trimmed to the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditGenerator {
    max_entries: usize,
}

impl AuditGenerator {
    /// Creates a generator that keeps at most `max_entries` entries.
    /// Zero means unbounded.
    #[must_use]
    pub const fn new(max_entries: usize) -> Self {
        Self { max_entries }
    }

    /// Returns the cap.
    #[must_use]
    pub const fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Starts a log holding a single Create entry.
    #[must_use]
    pub fn new_log<T: Clone>(&self, data: &T) -> AuditLog<T> {
        self.append(AuditLog::new(), AuditKind::Create, data, None)
    }

    /// Appends a Create entry to an existing log, used when an id is
    /// written again after its record was purged.
    #[must_use]
    pub fn create_log<T: Clone>(&self, data: &T, log: AuditLog<T>) -> AuditLog<T> {
        self.append(log, AuditKind::Create, data, None)
    }

    /// Appends an Update entry holding both states.
    #[must_use]
    pub fn update_log<T: Clone>(&self, new_data: &T, old_data: &T, log: AuditLog<T>) -> AuditLog<T> {
        self.append(log, AuditKind::Update, new_data, Some(old_data))
    }

    /// Appends a Delete entry holding the deleted payload.
    #[must_use]
    pub fn delete_log<T: Clone>(&self, data: &T, log: AuditLog<T>) -> AuditLog<T> {
        self.append(log, AuditKind::Delete, data, None)
    }

    /// Appends an Undelete entry holding the restored payload.
    #[must_use]
    pub fn undelete_log<T: Clone>(&self, data: &T, log: AuditLog<T>) -> AuditLog<T> {
        self.append(log, AuditKind::Undelete, data, None)
    }

    /// Appends a Rollback entry holding the payload rolled back to.
    #[must_use]
    pub fn rollback_log<T: Clone>(&self, data: &T, log: AuditLog<T>) -> AuditLog<T> {
        self.append(log, AuditKind::Rollback, data, None)
    }

    fn append<T: Clone>(
        &self,
        mut log: AuditLog<T>,
        kind: AuditKind,
        data: &T,
        previous: Option<&T>,
    ) -> AuditLog<T> {
        log.push(
            AuditEntry {
                kind,
                recorded_at: Utc::now(),
                snapshot: data.clone(),
                previous: previous.cloned(),
            },
            self.max_entries,
        );
        log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_log_has_one_create() {
        let log = AuditGenerator::new(3).new_log(&"a");
        assert_eq!(log.kinds(), vec![AuditKind::Create]);
        assert_eq!(log.get(0).unwrap().snapshot, "a");
    }

    #[test]
    fn update_keeps_both_states() {
        let generator = AuditGenerator::new(0);
        let log = generator.update_log(&2, &1, generator.new_log(&1));

        let update = log.last().unwrap();
        assert_eq!(update.kind, AuditKind::Update);
        assert_eq!(update.snapshot, 2);
        assert_eq!(update.previous, Some(1));
    }

    #[test]
    fn every_event_respects_the_cap() {
        let generator = AuditGenerator::new(2);
        let log = generator.new_log(&0);
        let log = generator.delete_log(&0, log);
        let log = generator.undelete_log(&0, log);
        let log = generator.rollback_log(&7, log);

        assert_eq!(log.kinds(), vec![AuditKind::Undelete, AuditKind::Rollback]);
        assert_eq!(log.last().unwrap().snapshot, 7);
    }
}
