//! Garbage collection of orphaned per-iteration artifacts
//!
//! A rollback discards iterations, and with them the simulation results and
//! conversation transcripts those iterations produced. This collector
//! deletes artifact files under the cleanable directories that no
//! still-reachable checkpoint references.
//!
//! ## Safety posture
//!
//! - The reference set is recomputed fresh from the *full* checkpoint
//!   history on every run; there is no cache to go stale.
//! - Reference collection failing aborts the entire cleanup
//!   ([`VaultError::OrphanScanAborted`]): leaking disk space is harmless,
//!   deleting a still-needed file is not.
//! - A candidate is compared against the reference set both with and
//!   without the app-dir prefix, because history records paths in both
//!   forms; ambiguity always resolves toward keeping the file.
//! - Every deletion re-checks that the target sits directly inside a
//!   whitelisted cleanable directory. Per-file delete failures are
//!   accumulated in the result, never fatal to the batch.

use crate::error::{Result, VaultError};
use crate::history::CheckpointStore;
use crate::layout::WorkspaceLayout;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

/// Outcome of one cleanup run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    /// Files that were deleted (or would be, in a dry run)
    pub deleted_files: Vec<PathBuf>,
    /// Number of deleted files
    pub deleted_count: usize,
    /// Disk space reclaimed in bytes
    pub freed_bytes: u64,
    /// Per-file failures; non-empty does not mean the run failed
    pub errors: Vec<String>,
}

/// Collector of artifact files unreachable from checkpoint history
#[derive(Debug, Clone)]
pub struct OrphanedDataCollector {
    layout: WorkspaceLayout,
}

impl OrphanedDataCollector {
    /// Create a collector for `layout`'s project
    pub fn new(layout: WorkspaceLayout) -> Self {
        Self { layout }
    }

    /// Scan and delete orphans in one pass
    ///
    /// Convenience driver around [`collect_referenced_paths`],
    /// [`scan_orphaned`] and [`delete`]; `dry_run` reports candidates and
    /// their sizes without deleting anything.
    ///
    /// [`collect_referenced_paths`]: Self::collect_referenced_paths
    /// [`scan_orphaned`]: Self::scan_orphaned
    /// [`delete`]: Self::delete
    #[instrument(skip(self, store))]
    pub fn cleanup(
        &self,
        store: &dyn CheckpointStore,
        thread_id: &str,
        dry_run: bool,
    ) -> Result<CleanupResult> {
        let referenced = self.collect_referenced_paths(store, thread_id)?;
        let candidates = self.scan_orphaned(&referenced)?;
        if candidates.is_empty() {
            return Ok(CleanupResult::default());
        }
        let result = self.delete(&candidates, dry_run);
        info!(
            deleted = result.deleted_count,
            freed_bytes = result.freed_bytes,
            errors = result.errors.len(),
            dry_run,
            "orphan cleanup finished"
        );
        Ok(result)
    }

    /// Normalized file pointers from every reachable checkpoint
    ///
    /// Walks the full history, not just the latest checkpoint: an artifact
    /// referenced by any still-reachable checkpoint — even one several
    /// rollbacks in the past — must never be collected. Any failure here
    /// fails the whole cleanup closed.
    pub fn collect_referenced_paths(
        &self,
        store: &dyn CheckpointStore,
        thread_id: &str,
    ) -> Result<BTreeSet<String>> {
        let checkpoints = store
            .list_checkpoints(thread_id)
            .map_err(|e| VaultError::OrphanScanAborted(format!("checkpoint listing failed: {e}")))?;

        let mut referenced = BTreeSet::new();
        for checkpoint in &checkpoints {
            for pointer in checkpoint.channel_values.file_pointers() {
                if let Some(normalized) = normalize_pointer(pointer) {
                    referenced.insert(normalized);
                }
            }
        }
        debug!(
            checkpoints = checkpoints.len(),
            referenced = referenced.len(),
            "collected reference set"
        );
        Ok(referenced)
    }

    /// Files under the cleanable directories absent from `referenced`
    ///
    /// The cleanable directories are flat, so the listing is deliberately
    /// non-recursive. A path is matched against the reference set both
    /// with and without the app-dir prefix; a hit in either form keeps the
    /// file.
    pub fn scan_orphaned(&self, referenced: &BTreeSet<String>) -> Result<Vec<PathBuf>> {
        let mut orphaned = Vec::new();
        for dir in self.layout.cleanable_dirs() {
            if !dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let Ok(rel) = path.strip_prefix(self.layout.project_root()) else {
                    continue;
                };
                let rel = rel.to_string_lossy().replace('\\', "/");
                if !self.is_referenced(&rel, referenced) {
                    orphaned.push(path);
                }
            }
        }
        debug!(candidates = orphaned.len(), "orphan scan complete");
        Ok(orphaned)
    }

    /// Delete orphan candidates, collecting per-file failures
    ///
    /// Each target is re-checked against the cleanable scope before
    /// deletion; an out-of-scope path is recorded as an error and skipped.
    /// With `dry_run`, candidates and sizes are reported but nothing is
    /// removed.
    pub fn delete(&self, candidates: &[PathBuf], dry_run: bool) -> CleanupResult {
        let mut result = CleanupResult::default();

        for path in candidates {
            if !path.exists() {
                continue;
            }
            if !self.layout.is_in_cleanable_scope(path) {
                let err = VaultError::PathOutOfScope(path.clone());
                warn!(path = ?path, "refusing to delete out-of-scope candidate");
                result.errors.push(err.to_string());
                continue;
            }

            let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            if !dry_run {
                if let Err(e) = fs::remove_file(path) {
                    warn!(path = ?path, error = %e, "orphan delete failed");
                    result.errors.push(format!("failed to delete {}: {e}", path.display()));
                    continue;
                }
                debug!(path = ?path, "deleted orphan file");
            }
            result.deleted_files.push(path.clone());
            result.deleted_count += 1;
            result.freed_bytes += size;
        }
        result
    }

    /// Whether `rel` (project-relative, forward slashes) is referenced
    ///
    /// Tries the exact form, then the form with the app-dir prefix
    /// stripped or added. History records pointers in both forms; a future
    /// revision should normalize pointers at write time instead.
    fn is_referenced(&self, rel: &str, referenced: &BTreeSet<String>) -> bool {
        if referenced.contains(rel) {
            return true;
        }
        let prefix = format!("{}/", self.layout.app_dir_name());
        match rel.strip_prefix(&prefix) {
            Some(without) => referenced.contains(without),
            None => referenced.contains(&format!("{prefix}{rel}")),
        }
    }
}

/// Normalize a recorded pointer: forward slashes, no leading `./` or `/`
fn normalize_pointer(path: &str) -> Option<String> {
    let mut normalized = path.replace('\\', "/");
    while let Some(stripped) = normalized
        .strip_prefix("./")
        .or_else(|| normalized.strip_prefix('/'))
    {
        normalized = stripped.to_string();
    }
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{ChannelValues, CheckpointRecord, InMemoryCheckpointStore};
    use tempfile::TempDir;

    struct FailingStore;

    impl CheckpointStore for FailingStore {
        fn list_checkpoints(&self, _thread_id: &str) -> Result<Vec<CheckpointRecord>> {
            Err(VaultError::internal("state store unavailable"))
        }
    }

    fn collector_in(tmp: &TempDir) -> OrphanedDataCollector {
        OrphanedDataCollector::new(WorkspaceLayout::new(tmp.path()).unwrap())
    }

    fn write_artifact(tmp: &TempDir, rel: &str) -> PathBuf {
        let path = tmp.path().join(".itervault").join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{}").unwrap();
        path
    }

    fn checkpoint_with_sim(path: &str) -> CheckpointRecord {
        CheckpointRecord {
            channel_values: ChannelValues {
                sim_result_path: Some(path.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_pointer() {
        assert_eq!(
            normalize_pointer("./sim_results/a.json").as_deref(),
            Some("sim_results/a.json")
        );
        assert_eq!(
            normalize_pointer("/sim_results/a.json").as_deref(),
            Some("sim_results/a.json")
        );
        assert_eq!(
            normalize_pointer("sim_results\\a.json").as_deref(),
            Some("sim_results/a.json")
        );
        assert_eq!(normalize_pointer(""), None);
    }

    #[test]
    fn test_unreferenced_artifact_collected() {
        let tmp = TempDir::new().unwrap();
        let collector = collector_in(&tmp);
        let referenced = write_artifact(&tmp, "sim_results/run_001.json");
        let orphan = write_artifact(&tmp, "sim_results/run_002.json");

        let store = InMemoryCheckpointStore::new();
        store.push("t1", checkpoint_with_sim("sim_results/run_001.json"));

        let result = collector.cleanup(&store, "t1", false).unwrap();
        assert_eq!(result.deleted_count, 1);
        assert!(result.errors.is_empty());
        assert!(referenced.exists());
        assert!(!orphan.exists());
    }

    #[test]
    fn test_reference_anywhere_in_history_protects() {
        let tmp = TempDir::new().unwrap();
        let collector = collector_in(&tmp);
        let old = write_artifact(&tmp, "sim_results/ancient.json");

        let store = InMemoryCheckpointStore::new();
        // Referenced only by the oldest checkpoint, several steps back.
        store.push("t1", checkpoint_with_sim("sim_results/ancient.json"));
        store.push("t1", checkpoint_with_sim("sim_results/missing_1.json"));
        store.push("t1", checkpoint_with_sim("sim_results/missing_2.json"));

        let result = collector.cleanup(&store, "t1", false).unwrap();
        assert_eq!(result.deleted_count, 0);
        assert!(old.exists());
    }

    #[test]
    fn test_prefix_form_mismatch_is_not_an_orphan() {
        let tmp = TempDir::new().unwrap();
        let collector = collector_in(&tmp);
        let artifact = write_artifact(&tmp, "conversations/turn_07.json");

        let store = InMemoryCheckpointStore::new();
        // History recorded the pointer with the app-dir prefix.
        store.push(
            "t1",
            CheckpointRecord {
                channel_values: ChannelValues {
                    design_goals_path: Some(".itervault/conversations/turn_07.json".into()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        let result = collector.cleanup(&store, "t1", false).unwrap();
        assert_eq!(result.deleted_count, 0);
        assert!(artifact.exists());
    }

    #[test]
    fn test_failed_reference_collection_aborts() {
        let tmp = TempDir::new().unwrap();
        let collector = collector_in(&tmp);
        let artifact = write_artifact(&tmp, "sim_results/keep.json");

        let err = collector.cleanup(&FailingStore, "t1", false).unwrap_err();
        assert!(matches!(err, VaultError::OrphanScanAborted(_)));
        // Fail closed: nothing was deleted.
        assert!(artifact.exists());
    }

    #[test]
    fn test_dry_run_reports_without_deleting() {
        let tmp = TempDir::new().unwrap();
        let collector = collector_in(&tmp);
        let orphan = write_artifact(&tmp, "conversations/stale.json");

        let store = InMemoryCheckpointStore::new();
        let result = collector.cleanup(&store, "t1", true).unwrap();
        assert_eq!(result.deleted_count, 1);
        assert_eq!(result.freed_bytes, 2);
        assert!(orphan.exists());
    }

    #[test]
    fn test_out_of_scope_delete_refused() {
        let tmp = TempDir::new().unwrap();
        let collector = collector_in(&tmp);

        let outside = tmp.path().join("precious.cir");
        fs::write(&outside, b"R1 1k\n").unwrap();

        let result = collector.delete(&[outside.clone()], false);
        assert_eq!(result.deleted_count, 0);
        assert_eq!(result.errors.len(), 1);
        assert!(outside.exists());
    }

    #[test]
    fn test_scan_is_non_recursive() {
        let tmp = TempDir::new().unwrap();
        let collector = collector_in(&tmp);
        write_artifact(&tmp, "sim_results/nested/deep.json");

        let candidates = collector.scan_orphaned(&BTreeSet::new()).unwrap();
        assert!(candidates.is_empty());
    }
}
