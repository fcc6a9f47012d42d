//! Full-copy project snapshots with crash-visible atomicity
//!
//! A snapshot is an immutable, timestamped full copy of the project tree
//! (minus ignored paths) taken at an iteration boundary. Snapshots form a
//! linear stack ordered strictly by creation timestamp — ids are
//! human-readable but never compared as strings for ordering.
//!
//! ## Atomicity
//!
//! Snapshots are copied into a hidden staging directory and renamed into
//! place, so a partially written snapshot is never visible to [`list`]
//! (`SnapshotStore::list`). Restores swap the project tree entry by
//! top-level entry after taking a transient `_backup_<timestamp>` safety
//! copy, which becomes the rollback target if the restore itself fails.
//!
//! ## Retention
//!
//! [`cleanup_old`](SnapshotStore::cleanup_old) keeps the N newest
//! non-transient snapshots; [`pop_latest`](SnapshotStore::pop_latest)
//! discards the stack top after a successful undo consumes it.

use crate::error::{Result, VaultError};
use crate::layout::WorkspaceLayout;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, trace, warn};
use walkdir::WalkDir;

/// Default number of non-transient snapshots retained by cleanup
pub const DEFAULT_KEEP_COUNT: usize = 10;

/// Metadata sidecar written inside every snapshot directory
const META_FILE: &str = ".snapshot_meta.json";

/// Staging prefix used while a snapshot is being copied
const STAGING_PREFIX: &str = ".staging_";

/// Free space must be at least this multiple of the estimated copy size
const DISK_HEADROOM: f64 = 1.5;

/// Directory names never included in a snapshot and never touched by restore
const IGNORED_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    ".pytest_cache",
    "node_modules",
    ".venv",
    "venv",
    "target",
];

/// File glob patterns never included in a snapshot
const IGNORED_FILES: &[&str] = &["*.pyc", "*.pyo", "*.log", ".DS_Store", "Thumbs.db"];

/// Metadata about one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// Snapshot id (`iter_<NNN>_<YYYYMMDD_HHMMSS>` or `_backup_<timestamp>`)
    pub id: String,
    /// Iteration number parsed from the id (0 when unparseable)
    pub iteration: u32,
    /// Creation timestamp; the source of truth for stack ordering
    pub created_at: DateTime<Utc>,
    /// Total size of all files in the snapshot
    pub size_bytes: u64,
    /// Number of files in the snapshot
    pub file_count: usize,
    /// Absolute path of the snapshot directory
    pub storage_path: PathBuf,
}

/// Sidecar record persisted as `.snapshot_meta.json`
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMeta {
    snapshot_id: String,
    created_at: DateTime<Utc>,
}

/// Outcome of a successful restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    /// Snapshot that was restored
    pub snapshot_id: String,
    /// True if the pre-restore safety backup could not be created;
    /// the restore proceeded without a rollback target
    pub backup_skipped: bool,
}

/// Generate a snapshot id for an iteration boundary
///
/// Format: `iter_<NNN>_<YYYYMMDD_HHMMSS>`, e.g. `iter_007_20250830_142233`.
pub fn generate_snapshot_id(iteration: u32) -> String {
    format!(
        "iter_{:03}_{}",
        iteration,
        Utc::now().format("%Y%m%d_%H%M%S")
    )
}

/// Parse the iteration number out of a snapshot id; 0 when unparseable
pub fn parse_iteration(snapshot_id: &str) -> u32 {
    snapshot_id
        .strip_prefix("iter_")
        .and_then(|rest| rest.split('_').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// Keep only filesystem-safe id characters (alphanumeric, `_`, `-`)
fn sanitize_id(snapshot_id: &str) -> Result<String> {
    let safe: String = snapshot_id
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe.is_empty() {
        return Err(VaultError::InvalidSnapshotId(snapshot_id.to_string()));
    }
    Ok(safe)
}

/// Stateless store of full-copy snapshots for one project
///
/// All methods are blocking filesystem sequences; callers needing an
/// interactive front end offload them onto a worker pool (see the async
/// wrappers on `RecoverySubsystem`). Mutating operations must be serialized
/// per project by the caller.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    layout: WorkspaceLayout,
}

impl SnapshotStore {
    /// Create a store for `layout`'s project
    pub fn new(layout: WorkspaceLayout) -> Self {
        Self { layout }
    }

    /// Workspace layout this store operates on
    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    /// Create a full snapshot of the project tree
    ///
    /// Copies everything under the project root except the app directory,
    /// the built-in ignore list and `extra_ignore` glob patterns. The copy
    /// lands in a staging directory and is renamed into place, so no
    /// partial snapshot is ever visible; on failure the staging directory
    /// is removed before the error propagates.
    ///
    /// # Errors
    ///
    /// - [`VaultError::SnapshotAlreadyExists`] if the id is taken
    /// - [`VaultError::InsufficientDiskSpace`] from the best-effort
    ///   pre-flight check (fails fast instead of mid-copy)
    /// - [`VaultError::InvalidSnapshotId`] if the id sanitizes to nothing
    #[instrument(skip(self, extra_ignore))]
    pub fn create(&self, snapshot_id: &str, extra_ignore: &[String]) -> Result<PathBuf> {
        let safe_id = sanitize_id(snapshot_id)?;
        let dest = self.layout.snapshot_dir(&safe_id);
        if dest.exists() {
            return Err(VaultError::SnapshotAlreadyExists(safe_id));
        }

        let snapshots_dir = self.layout.snapshots_dir();
        fs::create_dir_all(&snapshots_dir)?;
        self.check_disk_space()?;

        let extra = build_globset(extra_ignore)?;
        let builtin_files = build_globset(
            &IGNORED_FILES
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>(),
        )?;

        let staging = snapshots_dir.join(format!("{STAGING_PREFIX}{safe_id}"));
        if staging.exists() {
            // Leftover from a crashed create; safe to discard.
            fs::remove_dir_all(&staging)?;
        }

        let result = self.copy_project_into(&staging, &builtin_files, &extra);
        if let Err(e) = result {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        let meta = SnapshotMeta {
            snapshot_id: safe_id.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = fs::write(staging.join(META_FILE), serde_json::to_vec_pretty(&meta)?) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e.into());
        }

        fs::rename(&staging, &dest)?;
        info!(id = %safe_id, path = ?dest, "snapshot created");
        Ok(dest)
    }

    /// Restore the project tree from a snapshot
    ///
    /// When `backup_current` is set, a transient `_backup_<timestamp>`
    /// snapshot of the current state is taken first; if that backup fails
    /// the restore still proceeds and the outcome reports
    /// `backup_skipped`. On a restore failure the backup (when present) is
    /// restored in turn, and the returned error message records the whole
    /// fallback sequence so the caller can log it durably.
    ///
    /// The transient backup is deleted after any confirmed-successful
    /// restore. It is kept only if both the restore and the fallback
    /// failed, in which case it holds the only good copy of the
    /// pre-restore state.
    #[instrument(skip(self))]
    pub fn restore(&self, snapshot_id: &str, backup_current: bool) -> Result<RestoreOutcome> {
        let safe_id = sanitize_id(snapshot_id)?;
        let snapshot_dir = self.layout.snapshot_dir(&safe_id);
        if !snapshot_dir.is_dir() {
            return Err(VaultError::SnapshotNotFound(safe_id));
        }

        let mut backup_id = None;
        let mut backup_skipped = false;
        if backup_current {
            let candidate = format!("_backup_{}", Utc::now().format("%Y%m%d_%H%M%S"));
            match self.create(&candidate, &[]) {
                Ok(_) => backup_id = Some(candidate),
                Err(e) => {
                    warn!(error = %e, "pre-restore backup failed; restoring without one");
                    backup_skipped = true;
                }
            }
        }

        match self.swap_in(&snapshot_dir) {
            Ok(()) => {
                if let Some(id) = &backup_id {
                    if let Err(e) = self.delete(id) {
                        warn!(backup = %id, error = %e, "failed to delete transient backup");
                    }
                }
                info!(id = %safe_id, "snapshot restored");
                Ok(RestoreOutcome {
                    snapshot_id: safe_id,
                    backup_skipped,
                })
            }
            Err(primary) => {
                let mut message = format!("file swap failed: {primary}");
                if let Some(id) = &backup_id {
                    match self.swap_in(&self.layout.snapshot_dir(id)) {
                        Ok(()) => {
                            message.push_str("; pre-restore state recovered from backup");
                            if let Err(e) = self.delete(id) {
                                warn!(backup = %id, error = %e, "failed to delete transient backup");
                            }
                        }
                        Err(fallback) => {
                            // Backup kept on disk; it is the only good copy.
                            message.push_str(&format!(
                                "; backup restore also failed: {fallback}; backup '{id}' retained"
                            ));
                        }
                    }
                } else {
                    message.push_str("; no backup was available");
                }
                Err(VaultError::restore_failed(safe_id, message))
            }
        }
    }

    /// List non-transient snapshots, newest first
    ///
    /// Ordering comes from the metadata sidecar's creation timestamp
    /// (directory mtime as fallback), never from id comparison. Transient
    /// `_backup_*` snapshots and staging directories are excluded.
    pub fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let snapshots_dir = self.layout.snapshots_dir();
        if !snapshots_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&snapshots_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.path().is_dir() || name.starts_with('_') || name.starts_with('.') {
                continue;
            }
            if let Some(info) = self.read_info(&entry.path(), &name)? {
                snapshots.push(info);
            }
        }

        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(snapshots)
    }

    /// Whether a snapshot directory exists for `snapshot_id`
    pub fn exists(&self, snapshot_id: &str) -> bool {
        sanitize_id(snapshot_id)
            .map(|id| self.layout.snapshot_dir(&id).is_dir())
            .unwrap_or(false)
    }

    /// Metadata for one snapshot, `None` if it does not exist
    pub fn info(&self, snapshot_id: &str) -> Result<Option<SnapshotInfo>> {
        let safe_id = sanitize_id(snapshot_id)?;
        let dir = self.layout.snapshot_dir(&safe_id);
        if !dir.is_dir() {
            return Ok(None);
        }
        self.read_info(&dir, &safe_id)
    }

    /// Delete one snapshot
    pub fn delete(&self, snapshot_id: &str) -> Result<()> {
        let safe_id = sanitize_id(snapshot_id)?;
        let dir = self.layout.snapshot_dir(&safe_id);
        if !dir.is_dir() {
            return Err(VaultError::SnapshotNotFound(safe_id));
        }
        fs::remove_dir_all(&dir)?;
        debug!(id = %safe_id, "snapshot deleted");
        Ok(())
    }

    /// Delete all but the `keep_count` newest non-transient snapshots
    ///
    /// Individual delete failures are logged and skipped so one bad
    /// snapshot cannot block cleanup of the rest. Returns the number of
    /// snapshots actually deleted.
    #[instrument(skip(self))]
    pub fn cleanup_old(&self, keep_count: usize) -> Result<usize> {
        let snapshots = self.list()?;
        let mut deleted = 0;
        for snapshot in snapshots.iter().skip(keep_count) {
            match self.delete(&snapshot.id) {
                Ok(()) => deleted += 1,
                Err(e) => warn!(id = %snapshot.id, error = %e, "retention delete failed; skipping"),
            }
        }
        if deleted > 0 {
            info!(deleted, keep_count, "old snapshots cleaned up");
        }
        Ok(deleted)
    }

    /// The second-newest non-transient snapshot — the natural "undo one
    /// step" target — or `None` if fewer than two exist
    pub fn get_previous(&self) -> Result<Option<SnapshotInfo>> {
        Ok(self.list()?.into_iter().nth(1))
    }

    /// Delete the newest non-transient snapshot and return its id
    ///
    /// Used after a successful undo to discard the now-superseded
    /// "current" snapshot. `None` when the stack is empty.
    pub fn pop_latest(&self) -> Result<Option<String>> {
        match self.list()?.into_iter().next() {
            Some(latest) => {
                self.delete(&latest.id)?;
                Ok(Some(latest.id))
            }
            None => Ok(None),
        }
    }

    /// Total size in bytes of all non-transient snapshots
    pub fn total_size(&self) -> Result<u64> {
        Ok(self.list()?.iter().map(|s| s.size_bytes).sum())
    }

    // Internal helpers

    fn read_info(&self, dir: &Path, name: &str) -> Result<Option<SnapshotInfo>> {
        let (id, created_at) = match fs::read(dir.join(META_FILE))
            .ok()
            .and_then(|bytes| serde_json::from_slice::<SnapshotMeta>(&bytes).ok())
        {
            Some(meta) => (meta.snapshot_id, meta.created_at),
            None => {
                // Sidecar missing or corrupt; fall back to directory mtime.
                let mtime = fs::metadata(dir)?.modified()?;
                (name.to_string(), DateTime::<Utc>::from(mtime))
            }
        };

        let (size_bytes, file_count) = directory_stats(dir);
        Ok(Some(SnapshotInfo {
            iteration: parse_iteration(&id),
            id,
            created_at,
            size_bytes,
            file_count,
            storage_path: dir.to_path_buf(),
        }))
    }

    /// Estimate the copy size and fail fast when free space is short
    ///
    /// Best effort: an unreadable filesystem statistic never blocks the
    /// copy, only a confirmed shortfall does.
    fn check_disk_space(&self) -> Result<()> {
        let (source_size, _) = directory_stats_excluding(
            self.layout.project_root(),
            Some(&self.layout.app_dir()),
        );
        let required = (source_size as f64 * DISK_HEADROOM) as u64;

        match fs2::available_space(self.layout.app_dir()) {
            Ok(available) if available < required => {
                Err(VaultError::InsufficientDiskSpace {
                    required,
                    available,
                })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                trace!(error = %e, "disk space probe unavailable; skipping pre-flight check");
                Ok(())
            }
        }
    }

    /// Copy the project tree into `dest`, honoring the ignore rules
    fn copy_project_into(
        &self,
        dest: &Path,
        builtin_files: &GlobSet,
        extra: &GlobSet,
    ) -> Result<()> {
        let root = self.layout.project_root();
        let app_dir_name = self.layout.app_dir_name();
        fs::create_dir_all(dest)?;

        let walker = WalkDir::new(root).min_depth(1).into_iter();
        for entry in walker.filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            // The app directory must never be snapshotted (recursive copies);
            // neither are VCS metadata, caches and virtual environments.
            if e.depth() == 1 && name == app_dir_name {
                return false;
            }
            if e.file_type().is_dir() && IGNORED_DIRS.contains(&name.as_ref()) {
                return false;
            }
            true
        }) {
            let entry = entry.map_err(|e| VaultError::internal(format!("walk failed: {e}")))?;
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|_| VaultError::internal("walked path escaped project root"))?;

            if entry.file_type().is_file()
                && (builtin_files.is_match(rel) || extra.is_match(rel) || extra.is_match(entry.file_name()))
            {
                continue;
            }
            if entry.file_type().is_dir() && extra.is_match(rel) {
                continue;
            }

            let target = dest.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else if entry.file_type().is_file() {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &target)?;
            } else {
                trace!(path = ?entry.path(), "skipping non-regular file");
            }
        }
        Ok(())
    }

    /// Swap the project tree to match `snapshot_dir`, entry by top-level entry
    ///
    /// Removes project entries not present in the snapshot first, then
    /// copies the snapshot's entries in. The app directory and ignored
    /// directories are never touched in either direction.
    fn swap_in(&self, snapshot_dir: &Path) -> Result<()> {
        let root = self.layout.project_root();
        let app_dir_name = self.layout.app_dir_name();

        let keep = |name: &str| {
            name == app_dir_name || IGNORED_DIRS.contains(&name) || name == META_FILE
        };

        // Names present at the snapshot's top level.
        let mut snapshot_names = Vec::new();
        for entry in fs::read_dir(snapshot_dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if !keep(&name) {
                snapshot_names.push(name);
            }
        }

        // Drop project entries that the snapshot does not contain.
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if keep(&name) || snapshot_names.iter().any(|n| n == &name) {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }

        // Copy the snapshot's entries over the project's.
        for name in &snapshot_names {
            let src = snapshot_dir.join(name);
            let dst = root.join(name);
            if src.is_dir() {
                if dst.exists() {
                    fs::remove_dir_all(&dst)?;
                }
                copy_dir_recursive(&src, &dst)?;
            } else {
                if dst.is_dir() {
                    fs::remove_dir_all(&dst)?;
                }
                fs::copy(&src, &dst)?;
            }
        }
        Ok(())
    }
}

/// Recursively copy a directory tree
fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| VaultError::internal(format!("walk failed: {e}")))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| VaultError::internal("walked path escaped source"))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Total size and file count of a directory tree (errors counted as zero)
fn directory_stats(dir: &Path) -> (u64, usize) {
    directory_stats_excluding(dir, None)
}

fn directory_stats_excluding(dir: &Path, exclude: Option<&Path>) -> (u64, usize) {
    let mut size = 0u64;
    let mut count = 0usize;
    let walker = WalkDir::new(dir).min_depth(1).into_iter();
    for entry in walker
        .filter_entry(|e| exclude.map_or(true, |ex| e.path() != ex))
        .flatten()
    {
        if entry.file_type().is_file() {
            if let Ok(meta) = entry.metadata() {
                size += meta.len();
                count += 1;
            }
        }
    }
    (size, count)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| VaultError::internal(format!("invalid ignore pattern {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| VaultError::internal(format!("ignore pattern set: {e}")))
}
