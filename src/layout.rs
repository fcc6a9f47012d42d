//! Filesystem layout of the recovery subsystem inside a project root
//!
//! All on-disk state lives under a single application directory in the
//! project root (default `.itervault/`):
//!
//! ```text
//! <project_root>/
//!   .itervault/
//!     snapshots/<snapshot_id>/   full tree copies
//!     recovery.json              single WAL record (+ .tmp sibling)
//!     sim_results/*.json         cleanable ephemeral artifacts
//!     conversations/*.json       cleanable ephemeral artifacts
//! ```
//!
//! [`WorkspaceLayout`] is an explicit value passed to every component, so
//! there is no ambient global path configuration anywhere in the crate.

use crate::error::{Result, VaultError};
use std::path::{Path, PathBuf};

/// Default application directory name inside the project root
pub const DEFAULT_APP_DIR: &str = ".itervault";

/// Directory under the app dir holding full snapshots
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// File name of the single recovery log record
pub const RECOVERY_LOG_FILE: &str = "recovery.json";

/// Directories under the app dir that the orphan collector may delete from.
/// Everything else is off limits for garbage collection.
pub const CLEANABLE_DIRS: &[&str] = &["sim_results", "conversations"];

/// Resolved filesystem layout for one project
///
/// Cheap to clone; construct once per project and share by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    project_root: PathBuf,
    app_dir_name: String,
}

impl WorkspaceLayout {
    /// Create a layout rooted at `project_root` with the default app dir
    ///
    /// The root is canonicalized so all derived paths are absolute and
    /// stable. Fails if the root does not exist or is not a directory.
    pub fn new(project_root: impl AsRef<Path>) -> Result<Self> {
        Self::with_app_dir(project_root, DEFAULT_APP_DIR)
    }

    /// Create a layout with a custom application directory name
    pub fn with_app_dir(project_root: impl AsRef<Path>, app_dir_name: &str) -> Result<Self> {
        let root = project_root.as_ref();
        if !root.is_dir() {
            return Err(VaultError::ProjectRootNotFound(root.to_path_buf()));
        }
        Ok(Self {
            project_root: root.canonicalize()?,
            app_dir_name: app_dir_name.to_string(),
        })
    }

    /// Canonical absolute project root
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Name of the application directory (e.g. `.itervault`)
    pub fn app_dir_name(&self) -> &str {
        &self.app_dir_name
    }

    /// Absolute path of the application directory
    pub fn app_dir(&self) -> PathBuf {
        self.project_root.join(&self.app_dir_name)
    }

    /// Absolute path of the snapshots directory
    pub fn snapshots_dir(&self) -> PathBuf {
        self.app_dir().join(SNAPSHOTS_DIR)
    }

    /// Absolute path of one snapshot directory
    pub fn snapshot_dir(&self, snapshot_id: &str) -> PathBuf {
        self.snapshots_dir().join(snapshot_id)
    }

    /// Absolute path of the recovery log record
    pub fn recovery_log_path(&self) -> PathBuf {
        self.app_dir().join(RECOVERY_LOG_FILE)
    }

    /// Absolute paths of the cleanable artifact directories
    pub fn cleanable_dirs(&self) -> Vec<PathBuf> {
        CLEANABLE_DIRS
            .iter()
            .map(|d| self.app_dir().join(d))
            .collect()
    }

    /// Whether `path` lies directly inside one of the cleanable directories
    ///
    /// Scope check used as the last line of defense before an orphan
    /// deletion: a referenced-path bug must never turn into a delete
    /// outside `sim_results/` or `conversations/`.
    pub fn is_in_cleanable_scope(&self, path: &Path) -> bool {
        self.cleanable_dirs()
            .iter()
            .any(|dir| path.parent() == Some(dir.as_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let tmp = TempDir::new().unwrap();
        let layout = WorkspaceLayout::new(tmp.path()).unwrap();

        assert!(layout.app_dir().ends_with(".itervault"));
        assert!(layout.snapshots_dir().ends_with(".itervault/snapshots"));
        assert!(layout.recovery_log_path().ends_with(".itervault/recovery.json"));
        assert_eq!(layout.cleanable_dirs().len(), 2);
    }

    #[test]
    fn test_missing_root_rejected() {
        let tmp = TempDir::new().unwrap();
        let gone = tmp.path().join("does_not_exist");
        assert!(matches!(
            WorkspaceLayout::new(&gone),
            Err(VaultError::ProjectRootNotFound(_))
        ));
    }

    #[test]
    fn test_cleanable_scope() {
        let tmp = TempDir::new().unwrap();
        let layout = WorkspaceLayout::new(tmp.path()).unwrap();
        fs::create_dir_all(layout.app_dir().join("sim_results")).unwrap();

        let inside = layout.app_dir().join("sim_results").join("run_001.json");
        let nested = layout
            .app_dir()
            .join("sim_results")
            .join("sub")
            .join("x.json");
        let outside = layout.app_dir().join("snapshots").join("iter_001");

        assert!(layout.is_in_cleanable_scope(&inside));
        // Cleanable dirs are flat; anything deeper is out of scope.
        assert!(!layout.is_in_cleanable_scope(&nested));
        assert!(!layout.is_in_cleanable_scope(&outside));
    }
}
