//! Undo journal.

use crate::entity::{Entity, EntityId};
use crate::error::CoreResult;
use crate::transaction::Participants;
use tracing::error;

/// One completed step and how to reverse it.
pub(crate) enum Undo<T> {
    /// A payload is staged in the record store.
    DiscardRecord,
    /// A log is staged in the audit store.
    DiscardAudit,
    /// The indexes were moved from `from` to `to`.
    Reindex { from: Option<T>, to: Option<T> },
    /// The committed payload was replaced. `None` means there was no
    /// payload before, so the record is purged.
    RestoreRecord { previous: Option<T> },
    /// The record was soft-deleted.
    Undelete,
    /// The record was restored from soft-delete.
    Redelete,
}

impl<T> Undo<T> {
    fn describe(&self) -> &'static str {
        match self {
            Self::DiscardRecord => "discard staged record",
            Self::DiscardAudit => "discard staged audit log",
            Self::Reindex { .. } => "revert indexes",
            Self::RestoreRecord { .. } => "restore committed record",
            Self::Undelete => "undelete record",
            Self::Redelete => "delete record again",
        }
    }
}

/// The steps a single operation on one entity has completed so far.
pub(crate) struct Journal<T> {
    id: EntityId,
    operation: &'static str,
    steps: Vec<Undo<T>>,
}

impl<T: Entity> Journal<T> {
    pub(crate) fn new(id: EntityId, operation: &'static str) -> Self {
        Self {
            id,
            operation,
            steps: Vec::new(),
        }
    }

    pub(crate) fn id(&self) -> EntityId {
        self.id
    }

    pub(crate) fn operation(&self) -> &'static str {
        self.operation
    }

    pub(crate) fn len(&self) -> usize {
        self.steps.len()
    }

    pub(crate) fn record(&mut self, step: Undo<T>) {
        self.steps.push(step);
    }

    /// Notes that the staged record was committed: there is no longer a
    /// stage to discard, and undoing now means restoring `restore`.
    pub(crate) fn record_committed(&mut self, restore: Undo<T>) {
        self.steps
            .retain(|step| !matches!(step, Undo::DiscardRecord));
        self.steps.push(restore);
    }

    /// Reverses every recorded step, newest first.
    ///
    /// Unwinding never stops early: a step that fails is logged and the
    /// remaining steps are still attempted. Returns the number of steps
    /// that could not be reversed.
    pub(crate) async fn unwind(self, participants: &Participants) -> usize {
        let Self {
            id,
            operation,
            steps,
        } = self;

        let mut failed = 0;
        for step in steps.into_iter().rev() {
            let action = step.describe();
            if let Err(err) = reverse(step, id, participants).await {
                failed += 1;
                error!(kind = T::KIND, %id, operation, action, error = %err, "unwind step failed");
            }
        }
        failed
    }
}

async fn reverse<T: Entity>(step: Undo<T>, id: EntityId, participants: &Participants) -> CoreResult<()> {
    let Participants {
        records,
        indexes,
        audit,
    } = participants;

    match step {
        Undo::DiscardRecord => records.discard_changes::<T>(id).await,
        Undo::DiscardAudit => audit.discard_events::<T>(id).await.map(drop),
        Undo::Reindex { from, to } => indexes.reindex(to.as_ref(), from.as_ref()).await,
        Undo::RestoreRecord {
            previous: Some(previous),
        } => records.rollback(&previous).await,
        Undo::RestoreRecord { previous: None } => records.purge::<T>(id).await.map(drop),
        Undo::Undelete => records.undelete::<T>(id).await,
        Undo::Redelete => records.delete::<T>(id).await,
    }
}
