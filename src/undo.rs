//! Undo coordination over snapshots, the recovery log and orphan cleanup
//!
//! [`UndoCoordinator`] sequences a rollback to the previous iteration or
//! to any earlier snapshot: write-ahead log the intent, restore the
//! snapshot, advance the log through its phases, collect orphaned
//! artifacts and retire the snapshots above the target. Each phase
//! transition is persisted before the next mutation,
//! so a crash at any point leaves a log entry that names exactly how far
//! the rollback got.
//!
//! Having nothing to undo and conflicts along the way are ordinary
//! outcomes, not errors: the only `Err` this module returns is a restore
//! that failed outright (in which case the log entry is marked failed and
//! kept for inspection).

use crate::error::{Result, VaultError};
use crate::history::CheckpointStore;
use crate::layout::WorkspaceLayout;
use crate::orphan::{CleanupResult, OrphanedDataCollector};
use crate::recovery::{RecoveryLog, RecoveryLogEntry, RecoveryPhase};
use crate::snapshot::{parse_iteration, SnapshotInfo, SnapshotStore};
use parking_lot::Mutex;
use tracing::{info, instrument, warn};

/// What a completed undo did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoReport {
    /// Snapshot the project was rolled back to
    pub restored_snapshot: String,
    /// Iteration number encoded in the restored snapshot id
    pub restored_iteration: u32,
    /// Snapshots newer than the target that were retired, newest first
    pub popped_snapshots: Vec<String>,
    /// Orphan cleanup outcome; `None` when cleanup was skipped after a
    /// scan failure
    pub cleanup: Option<CleanupResult>,
}

/// Result of an undo request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
    /// Fewer than two snapshots exist; the project was not touched
    NothingToUndo,
    /// The rollback ran to completion
    Completed(UndoReport),
}

impl UndoOutcome {
    /// Whether the project state was rolled back
    pub fn did_undo(&self) -> bool {
        matches!(self, UndoOutcome::Completed(_))
    }
}

/// What an undo would do, without doing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoInfo {
    /// Whether an undo is currently possible
    pub can_undo: bool,
    /// Snapshot an undo would restore
    pub target_snapshot: Option<SnapshotInfo>,
    /// Iteration an undo would land on
    pub target_iteration: Option<u32>,
    /// Iteration of the newest snapshot
    pub current_iteration: Option<u32>,
    /// Total snapshots on the stack
    pub snapshot_count: usize,
}

/// Serializes undo operations and drives them through their phases
#[derive(Debug)]
pub struct UndoCoordinator {
    recovery_log: RecoveryLog,
    op_lock: Mutex<()>,
}

impl UndoCoordinator {
    /// Create a coordinator for `layout`'s project
    pub fn new(layout: WorkspaceLayout) -> Self {
        Self {
            recovery_log: RecoveryLog::new(layout),
            op_lock: Mutex::new(()),
        }
    }

    /// Roll the project back to the previous snapshot
    ///
    /// Equivalent to [`undo_to_previous_with`](Self::undo_to_previous_with)
    /// with a no-op state-rebuild hook; the `state_rebuilt` phase is then
    /// advisory.
    pub fn undo_to_previous(
        &self,
        store: &SnapshotStore,
        checkpoints: &dyn CheckpointStore,
        thread_id: &str,
    ) -> Result<UndoOutcome> {
        self.undo_to_previous_with(store, checkpoints, thread_id, |_| Ok(()))
    }

    /// Roll the project back to the previous snapshot, rebuilding engine
    /// state through `rebuild_state`
    ///
    /// Only one undo runs at a time; concurrent callers block on the
    /// operation lock. The sequence:
    ///
    /// 1. Find the previous snapshot; with fewer than two on the stack
    ///    this returns [`UndoOutcome::NothingToUndo`] without touching
    ///    anything.
    /// 2. Write the recovery log entry, then restore.
    /// 3. Advance to `files_restored`, run `rebuild_state` with the
    ///    restored snapshot (the workflow engine moves its checkpoint
    ///    pointer here), advance to `state_rebuilt`.
    /// 4. Collect orphaned artifacts. A cleanup failure does not fail the
    ///    undo; it is reported in the outcome.
    /// 5. Retire the snapshots above the target and delete the log.
    ///
    /// # Errors
    ///
    /// Returns an error when the restore or `rebuild_state` fails. The
    /// log entry is then marked `failed` with the error and left in place
    /// for the next startup to inspect.
    #[instrument(skip(self, store, checkpoints, rebuild_state))]
    pub fn undo_to_previous_with<F>(
        &self,
        store: &SnapshotStore,
        checkpoints: &dyn CheckpointStore,
        thread_id: &str,
        rebuild_state: F,
    ) -> Result<UndoOutcome>
    where
        F: FnOnce(&SnapshotInfo) -> Result<()>,
    {
        let _guard = self.op_lock.lock();

        let Some(target) = store.get_previous()? else {
            info!("undo requested with no previous snapshot");
            return Ok(UndoOutcome::NothingToUndo);
        };
        self.run(store, checkpoints, thread_id, target, rebuild_state)
    }

    /// Roll the project back to an arbitrary snapshot, retiring everything
    /// newer than it
    ///
    /// Same phase sequence and failure behavior as
    /// [`undo_to_previous_with`](Self::undo_to_previous_with); the target
    /// is any existing snapshot rather than the second-newest.
    ///
    /// # Errors
    ///
    /// [`VaultError::SnapshotNotFound`] when no snapshot has this id.
    pub fn undo_to_snapshot(
        &self,
        store: &SnapshotStore,
        checkpoints: &dyn CheckpointStore,
        thread_id: &str,
        snapshot_id: &str,
    ) -> Result<UndoOutcome> {
        self.undo_to_snapshot_with(store, checkpoints, thread_id, snapshot_id, |_| Ok(()))
    }

    /// [`undo_to_snapshot`](Self::undo_to_snapshot) with a state-rebuild
    /// hook
    #[instrument(skip(self, store, checkpoints, rebuild_state))]
    pub fn undo_to_snapshot_with<F>(
        &self,
        store: &SnapshotStore,
        checkpoints: &dyn CheckpointStore,
        thread_id: &str,
        snapshot_id: &str,
        rebuild_state: F,
    ) -> Result<UndoOutcome>
    where
        F: FnOnce(&SnapshotInfo) -> Result<()>,
    {
        let _guard = self.op_lock.lock();

        let Some(target) = store.info(snapshot_id)? else {
            return Err(VaultError::SnapshotNotFound(snapshot_id.to_string()));
        };
        self.run(store, checkpoints, thread_id, target, rebuild_state)
    }

    fn run<F>(
        &self,
        store: &SnapshotStore,
        checkpoints: &dyn CheckpointStore,
        thread_id: &str,
        target: SnapshotInfo,
        rebuild_state: F,
    ) -> Result<UndoOutcome>
    where
        F: FnOnce(&SnapshotInfo) -> Result<()>,
    {
        info!(target = %target.id, "starting undo");

        self.recovery_log.write(&RecoveryLogEntry::undo(&target.id))?;

        if let Err(e) = store.restore(&target.id, true) {
            self.log_failure(&e.to_string());
            return Err(e);
        }
        self.recovery_log
            .update_phase(RecoveryPhase::FilesRestored, None)?;

        if let Err(e) = rebuild_state(&target) {
            self.log_failure(&format!("state rebuild failed: {e}"));
            return Err(e);
        }
        self.recovery_log
            .update_phase(RecoveryPhase::StateRebuilt, None)?;

        let cleanup = match OrphanedDataCollector::new(store.layout().clone())
            .cleanup(checkpoints, thread_id, false)
        {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(error = %e, "orphan cleanup skipped");
                if let Err(log_err) = self
                    .recovery_log
                    .append_error(&format!("orphan cleanup skipped: {e}"))
                {
                    warn!(error = %log_err, "failed to record cleanup failure");
                }
                None
            }
        };

        let popped_snapshots = self.pop_above(store, &target.id);

        self.recovery_log
            .update_phase(RecoveryPhase::Completed, None)?;
        self.recovery_log.delete()?;

        info!(restored = %target.id, popped = ?popped_snapshots, "undo complete");
        Ok(UndoOutcome::Completed(UndoReport {
            restored_iteration: parse_iteration(&target.id),
            restored_snapshot: target.id,
            popped_snapshots,
            cleanup,
        }))
    }

    /// Retire every snapshot newer than `target_id`, newest first
    ///
    /// Best effort: the rollback itself already succeeded, and a retained
    /// stale snapshot only costs disk space.
    fn pop_above(&self, store: &SnapshotStore, target_id: &str) -> Vec<String> {
        let snapshots = match store.list() {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(error = %e, "failed to list snapshots for retirement");
                return Vec::new();
            }
        };

        let mut popped = Vec::new();
        for snapshot in snapshots {
            if snapshot.id == target_id {
                break;
            }
            match store.delete(&snapshot.id) {
                Ok(()) => popped.push(snapshot.id),
                Err(e) => {
                    warn!(id = %snapshot.id, error = %e, "failed to retire undone snapshot")
                }
            }
        }
        popped
    }

    /// Describe what an undo would do right now
    pub fn undo_info(&self, store: &SnapshotStore) -> Result<UndoInfo> {
        let snapshots = store.list()?;
        let target_snapshot = snapshots.get(1).cloned();
        Ok(UndoInfo {
            can_undo: target_snapshot.is_some(),
            target_iteration: target_snapshot.as_ref().map(|s| s.iteration),
            current_iteration: snapshots.first().map(|s| s.iteration),
            target_snapshot,
            snapshot_count: snapshots.len(),
        })
    }

    /// Whether a previous undo left a pending recovery log entry
    pub fn has_pending_recovery(&self) -> Result<bool> {
        self.recovery_log.has_pending_recovery()
    }

    /// The pending recovery log entry, if any
    pub fn pending_recovery(&self) -> Result<Option<RecoveryLogEntry>> {
        match self.recovery_log.read()? {
            Some(entry) if entry.phase.is_pending() => Ok(Some(entry)),
            _ => Ok(None),
        }
    }

    /// Best-effort failure mark; the original restore error wins
    fn log_failure(&self, message: &str) {
        if let Err(e) = self
            .recovery_log
            .update_phase(RecoveryPhase::Failed, Some(message))
        {
            warn!(error = %e, "failed to mark recovery log as failed");
        }
    }
}
