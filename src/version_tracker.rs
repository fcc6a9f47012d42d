//! Optimistic file-version tracking for long tool-call windows
//!
//! An LLM edit follows a read-think-write pattern whose thinking window can
//! last tens of seconds. If the user saves the same file from their editor
//! inside that window, a write based on the stale read would silently
//! overwrite the user's change. [`FileVersionTracker`] detects exactly that
//! TOCTOU race: it records a content hash at read time and re-hashes the
//! on-disk file just before the write is committed.
//!
//! A detected conflict is the designed outcome of this module, not a
//! failure: [`verify_before_write`](FileVersionTracker::verify_before_write)
//! returns a [`VersionCheckResult`] value either way, and the caller decides
//! whether to surface the conflict to the LLM or the user. No merge is ever
//! attempted — three-way merging semi-structured circuit text is how syntax
//! errors are born.
//!
//! ## Lifecycle
//!
//! One tracker instance per tool-execution round. Populate it with
//! `record_read` as files are read, consult `verify_before_write` before
//! each write, and drop (or [`clear`](FileVersionTracker::clear)) it when
//! the round ends. Records are never persisted.
//!
//! ## Example
//!
//! ```rust,no_run
//! use itervault::version_tracker::FileVersionTracker;
//! use std::path::Path;
//!
//! let mut tracker = FileVersionTracker::new();
//! tracker.record_read(Path::new("amplifier.cir"), "R1 1 2 10k\n");
//!
//! // ... LLM thinks, user may edit the file meanwhile ...
//!
//! let check = tracker.verify_before_write(Path::new("amplifier.cir"));
//! if !check.is_consistent {
//!     // report the conflict; do not overwrite
//! }
//! ```

use crate::hashing;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Outcome of a pre-write version check
///
/// `is_consistent == false` is a normal, expected result — it means the
/// file changed (or disappeared) between read and write and the caller must
/// not commit the pending write blindly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCheckResult {
    /// Whether the on-disk content still matches the recorded read
    pub is_consistent: bool,
    /// Path the check was performed for (as given by the caller)
    pub path: PathBuf,
    /// Hash recorded at read time, if the path was tracked
    pub recorded_hash: Option<String>,
    /// Current on-disk hash, if the file exists and was tracked
    pub current_hash: Option<String>,
    /// Whether the file currently exists on disk
    pub file_exists: bool,
    /// Whether the path had a recorded read at all
    pub was_tracked: bool,
}

/// Per-round map of path → content hash recorded at read time
///
/// Keys are canonicalized so different spellings of one path share a
/// record. Instances are cheap and must not outlive one tool round.
#[derive(Debug, Default)]
pub struct FileVersionTracker {
    versions: HashMap<PathBuf, String>,
}

impl FileVersionTracker {
    /// Create an empty tracker for a new tool-execution round
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `content` was read from `path`; returns the content hash
    pub fn record_read(&mut self, path: &Path, content: &str) -> String {
        let key = Self::normalize(path);
        let digest = hashing::hash_content(content);
        trace!(path = ?key, hash = %digest, "recorded file read");
        self.versions.insert(key, digest.clone());
        digest
    }

    /// Check whether `path` may be written without clobbering an external edit
    ///
    /// An untracked path always passes (`was_tracked == false`): first
    /// writes to new or never-read files are unconstrained. For tracked
    /// paths the on-disk content is re-hashed; a deleted file or a hash
    /// mismatch yields `is_consistent == false`.
    pub fn verify_before_write(&self, path: &Path) -> VersionCheckResult {
        let key = Self::normalize(path);

        let Some(recorded) = self.versions.get(&key) else {
            return VersionCheckResult {
                is_consistent: true,
                path: path.to_path_buf(),
                recorded_hash: None,
                current_hash: None,
                file_exists: path.exists(),
                was_tracked: false,
            };
        };

        // An I/O error while re-hashing is indistinguishable from "cannot
        // prove consistency"; err toward reporting a conflict.
        let current = hashing::hash_file(&key).unwrap_or(None);

        match current {
            None => {
                debug!(path = ?key, "tracked file missing at write time");
                VersionCheckResult {
                    is_consistent: false,
                    path: path.to_path_buf(),
                    recorded_hash: Some(recorded.clone()),
                    current_hash: None,
                    file_exists: false,
                    was_tracked: true,
                }
            }
            Some(current_hash) => {
                let is_consistent = &current_hash == recorded;
                if !is_consistent {
                    debug!(path = ?key, "version conflict detected");
                }
                VersionCheckResult {
                    is_consistent,
                    path: path.to_path_buf(),
                    recorded_hash: Some(recorded.clone()),
                    current_hash: Some(current_hash),
                    file_exists: true,
                    was_tracked: true,
                }
            }
        }
    }

    /// Drop all records; called at the end of every tool-execution round
    pub fn clear(&mut self) {
        self.versions.clear();
    }

    /// Paths with a recorded read in this round
    pub fn tracked_paths(&self) -> Vec<&Path> {
        self.versions.keys().map(PathBuf::as_path).collect()
    }

    /// Hash recorded for `path`, if any
    pub fn recorded_hash(&self, path: &Path) -> Option<&str> {
        self.versions.get(&Self::normalize(path)).map(String::as_str)
    }

    /// Whether `path` has a recorded read
    pub fn is_tracked(&self, path: &Path) -> bool {
        self.versions.contains_key(&Self::normalize(path))
    }

    /// Number of tracked paths
    pub fn tracked_count(&self) -> usize {
        self.versions.len()
    }

    /// Canonical form, stable across the tracked file being deleted
    ///
    /// A deleted file cannot be canonicalized directly, so the parent
    /// directory is resolved instead and the file name re-appended. This
    /// keeps a record reachable after deletion — the exact case a deleted
    /// tracked file must still conflict on. Purely lexical cleanup is the
    /// last resort when even the parent is gone.
    fn normalize(path: &Path) -> PathBuf {
        if let Ok(canonical) = path.canonicalize() {
            return canonical;
        }
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if let (Ok(dir), Some(name)) = (parent.canonicalize(), path.file_name()) {
            return dir.join(name);
        }
        lexical_clean(path)
    }
}

/// Resolve `.` and `..` components without touching the filesystem
fn lexical_clean(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned.push(component.as_os_str());
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}
