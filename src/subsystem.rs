//! One entry point wiring the snapshot, recovery and cleanup components
//!
//! [`RecoverySubsystem`] is constructed once per project at startup and
//! passed to whoever needs it; all state hangs off the instance, nothing
//! is process-global. It is cheap to clone and safe to share across
//! threads.
//!
//! The core is synchronous filesystem code. For async callers every
//! blocking operation has an `_async` twin that runs the sync core on
//! tokio's blocking pool, so an interactive executor thread is never
//! stalled behind a directory copy.

use crate::error::{Result, VaultError};
use crate::history::CheckpointStore;
use crate::layout::WorkspaceLayout;
use crate::orphan::{CleanupResult, OrphanedDataCollector};
use crate::recovery::RecoveryLogEntry;
use crate::snapshot::{generate_snapshot_id, SnapshotInfo, SnapshotStore, DEFAULT_KEEP_COUNT};
use crate::undo::{UndoCoordinator, UndoInfo, UndoOutcome};
use crate::version_tracker::FileVersionTracker;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug)]
struct Inner {
    layout: WorkspaceLayout,
    store: SnapshotStore,
    coordinator: UndoCoordinator,
}

/// Per-project handle to the iteration snapshot and recovery machinery
///
/// ## Examples
///
/// ```no_run
/// use itervault::RecoverySubsystem;
///
/// # fn main() -> itervault::Result<()> {
/// let subsystem = RecoverySubsystem::new("/path/to/project")?;
///
/// if subsystem.has_pending_recovery()? {
///     // A previous rollback was interrupted; inspect and resolve.
/// }
///
/// let snapshot_id = subsystem.create_iteration_snapshot(1)?;
/// println!("saved {snapshot_id}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RecoverySubsystem {
    inner: Arc<Inner>,
}

impl RecoverySubsystem {
    /// Create a subsystem rooted at `project_root`, using the default
    /// application directory
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::ProjectRootNotFound`] when `project_root`
    /// does not name an existing directory.
    pub fn new(project_root: impl AsRef<Path>) -> Result<Self> {
        Self::from_layout(WorkspaceLayout::new(project_root)?)
    }

    /// Like [`new`](Self::new) with a custom application directory name
    pub fn with_app_dir(project_root: impl AsRef<Path>, app_dir_name: &str) -> Result<Self> {
        Self::from_layout(WorkspaceLayout::with_app_dir(project_root, app_dir_name)?)
    }

    fn from_layout(layout: WorkspaceLayout) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                store: SnapshotStore::new(layout.clone()),
                coordinator: UndoCoordinator::new(layout.clone()),
                layout,
            }),
        })
    }

    /// The workspace layout this subsystem operates on
    pub fn layout(&self) -> &WorkspaceLayout {
        &self.inner.layout
    }

    /// The underlying snapshot store
    pub fn snapshot_store(&self) -> &SnapshotStore {
        &self.inner.store
    }

    // --- snapshots ---

    /// Capture a full-project snapshot under an explicit id
    #[instrument(skip(self))]
    pub fn create_snapshot(&self, snapshot_id: &str, extra_ignore: &[String]) -> Result<PathBuf> {
        self.inner.store.create(snapshot_id, extra_ignore)
    }

    /// Capture a snapshot for `iteration`, returning the generated id
    #[instrument(skip(self))]
    pub fn create_iteration_snapshot(&self, iteration: u32) -> Result<String> {
        let snapshot_id = generate_snapshot_id(iteration);
        self.inner.store.create(&snapshot_id, &[])?;
        Ok(snapshot_id)
    }

    /// All snapshots, newest first
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        self.inner.store.list()
    }

    /// Metadata for one snapshot, if it exists
    pub fn snapshot_info(&self, snapshot_id: &str) -> Result<Option<SnapshotInfo>> {
        self.inner.store.info(snapshot_id)
    }

    /// Whether a snapshot with this id exists
    pub fn snapshot_exists(&self, snapshot_id: &str) -> bool {
        self.inner.store.exists(snapshot_id)
    }

    /// Total bytes across all stored snapshots
    pub fn total_snapshot_size(&self) -> Result<u64> {
        self.inner.store.total_size()
    }

    /// Delete snapshots beyond the newest `keep_count`
    #[instrument(skip(self))]
    pub fn cleanup_old_snapshots(&self, keep_count: usize) -> Result<usize> {
        self.inner.store.cleanup_old(keep_count)
    }

    // --- undo and recovery ---

    /// Roll the project back to the previous snapshot
    ///
    /// See [`UndoCoordinator::undo_to_previous`] for the sequence and
    /// failure behavior.
    pub fn undo_to_previous(
        &self,
        checkpoints: &dyn CheckpointStore,
        thread_id: &str,
    ) -> Result<UndoOutcome> {
        self.inner
            .coordinator
            .undo_to_previous(&self.inner.store, checkpoints, thread_id)
    }

    /// Roll the project back to the previous snapshot, rebuilding engine
    /// state through `rebuild_state` between the restore and the
    /// `state_rebuilt` phase
    pub fn undo_to_previous_with<F>(
        &self,
        checkpoints: &dyn CheckpointStore,
        thread_id: &str,
        rebuild_state: F,
    ) -> Result<UndoOutcome>
    where
        F: FnOnce(&SnapshotInfo) -> Result<()>,
    {
        self.inner.coordinator.undo_to_previous_with(
            &self.inner.store,
            checkpoints,
            thread_id,
            rebuild_state,
        )
    }

    /// Roll the project back to an arbitrary snapshot, retiring everything
    /// newer than it
    pub fn undo_to_snapshot(
        &self,
        checkpoints: &dyn CheckpointStore,
        thread_id: &str,
        snapshot_id: &str,
    ) -> Result<UndoOutcome> {
        self.inner.coordinator.undo_to_snapshot(
            &self.inner.store,
            checkpoints,
            thread_id,
            snapshot_id,
        )
    }

    /// What an undo would do right now
    pub fn undo_info(&self) -> Result<UndoInfo> {
        self.inner.coordinator.undo_info(&self.inner.store)
    }

    /// Whether a prior rollback was interrupted mid-flight
    ///
    /// Call at startup; a pending entry means the project may be in a
    /// partially rolled-back state.
    pub fn has_pending_recovery(&self) -> Result<bool> {
        self.inner.coordinator.has_pending_recovery()
    }

    /// The interrupted rollback's log entry, if one is pending
    pub fn pending_recovery(&self) -> Result<Option<RecoveryLogEntry>> {
        self.inner.coordinator.pending_recovery()
    }

    // --- version tracking and GC ---

    /// Fresh file-version tracker for one tool round
    ///
    /// Trackers are deliberately short-lived; never reuse one across
    /// rounds.
    pub fn new_tracker(&self) -> FileVersionTracker {
        FileVersionTracker::new()
    }

    /// Collect artifact files unreachable from checkpoint history
    pub fn cleanup_orphans(
        &self,
        checkpoints: &dyn CheckpointStore,
        thread_id: &str,
        dry_run: bool,
    ) -> Result<CleanupResult> {
        OrphanedDataCollector::new(self.inner.layout.clone()).cleanup(checkpoints, thread_id, dry_run)
    }

    // --- async shell ---

    /// Async twin of [`create_snapshot`](Self::create_snapshot)
    pub async fn create_snapshot_async(
        &self,
        snapshot_id: String,
        extra_ignore: Vec<String>,
    ) -> Result<PathBuf> {
        let this = self.clone();
        run_blocking(move || this.create_snapshot(&snapshot_id, &extra_ignore)).await
    }

    /// Async twin of [`create_iteration_snapshot`](Self::create_iteration_snapshot)
    pub async fn create_iteration_snapshot_async(&self, iteration: u32) -> Result<String> {
        let this = self.clone();
        run_blocking(move || this.create_iteration_snapshot(iteration)).await
    }

    /// Async twin of [`undo_to_previous`](Self::undo_to_previous)
    pub async fn undo_to_previous_async(
        &self,
        checkpoints: Arc<dyn CheckpointStore>,
        thread_id: String,
    ) -> Result<UndoOutcome> {
        let this = self.clone();
        run_blocking(move || this.undo_to_previous(checkpoints.as_ref(), &thread_id)).await
    }

    /// Async twin of [`undo_to_snapshot`](Self::undo_to_snapshot)
    pub async fn undo_to_snapshot_async(
        &self,
        checkpoints: Arc<dyn CheckpointStore>,
        thread_id: String,
        snapshot_id: String,
    ) -> Result<UndoOutcome> {
        let this = self.clone();
        run_blocking(move || {
            this.undo_to_snapshot(checkpoints.as_ref(), &thread_id, &snapshot_id)
        })
        .await
    }

    /// Async twin of [`cleanup_old_snapshots`](Self::cleanup_old_snapshots),
    /// defaulting to keeping [`DEFAULT_KEEP_COUNT`] snapshots
    pub async fn cleanup_old_snapshots_async(&self, keep_count: Option<usize>) -> Result<usize> {
        let this = self.clone();
        run_blocking(move || {
            this.cleanup_old_snapshots(keep_count.unwrap_or(DEFAULT_KEEP_COUNT))
        })
        .await
    }

    /// Async twin of [`cleanup_orphans`](Self::cleanup_orphans)
    pub async fn cleanup_orphans_async(
        &self,
        checkpoints: Arc<dyn CheckpointStore>,
        thread_id: String,
        dry_run: bool,
    ) -> Result<CleanupResult> {
        let this = self.clone();
        run_blocking(move || this.cleanup_orphans(checkpoints.as_ref(), &thread_id, dry_run)).await
    }

    /// Async twin of [`list_snapshots`](Self::list_snapshots)
    pub async fn list_snapshots_async(&self) -> Result<Vec<SnapshotInfo>> {
        let this = self.clone();
        run_blocking(move || this.list_snapshots()).await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VaultError::internal(format!("blocking task failed: {e}")))?
}
