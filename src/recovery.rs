//! Write-ahead recovery log for crash-safe rollback
//!
//! A rollback is a multi-step filesystem operation; a crash in the middle
//! must be diagnosable and resumable on the next start. The recovery log is
//! a single JSON record at a well-known path (`.itervault/recovery.json`)
//! describing the in-flight rollback and its phase. It is written before the
//! rollback touches any files and deleted only after everything finished.
//!
//! Every write goes to a temporary file in the same directory followed by an
//! atomic rename, so the record on disk is always either the previous
//! complete entry or the new complete entry — never a half-written file,
//! even if the process is killed mid-write.
//!
//! A record that exists but fails to parse reads as "no recoverable state"
//! (`Ok(None)`). Trading a theoretical missed recovery for never
//! crash-looping on bad data is the right side of that bargain.
//!
//! ## Phase state machine
//!
//! ```text
//! started → files_restored → state_rebuilt → completed
//!     \________\________________\→ failed (terminal, error populated)
//! ```
//!
//! Anything short of `completed` found at startup means the rollback did
//! not finish; `started` and `failed` additionally mean project files may
//! not yet reflect the target snapshot.

use crate::error::Result;
use crate::layout::WorkspaceLayout;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use tracing::{debug, warn};

/// Phase of an in-flight rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    /// Log written, no files touched yet
    Started,
    /// Project files match the target snapshot
    FilesRestored,
    /// External workflow state pointer rebuilt
    StateRebuilt,
    /// Rollback finished; log is about to be deleted
    Completed,
    /// Rollback aborted; `error` holds the failure sequence
    Failed,
}

impl RecoveryPhase {
    /// Whether this phase means a rollback is still unfinished
    pub fn is_pending(self) -> bool {
        !matches!(self, RecoveryPhase::Completed | RecoveryPhase::Failed)
    }
}

/// The single WAL record for this subsystem
///
/// At most one entry exists at a time. Serialized exactly per the on-disk
/// schema: `{"action", "target_snapshot", "phase", "started_at", "error"?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryLogEntry {
    /// Operation kind; currently only `"undo"`
    pub action: String,
    /// Snapshot id the rollback is restoring
    pub target_snapshot: String,
    /// Current phase
    pub phase: RecoveryPhase,
    /// ISO-8601 start timestamp
    pub started_at: String,
    /// Failure sequence, populated on `failed` and by fallback attempts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecoveryLogEntry {
    /// Create a fresh `undo` entry in the `started` phase
    pub fn undo(target_snapshot: impl Into<String>) -> Self {
        Self {
            action: "undo".to_string(),
            target_snapshot: target_snapshot.into(),
            phase: RecoveryPhase::Started,
            started_at: Utc::now().to_rfc3339(),
            error: None,
        }
    }
}

/// Handle to the on-disk recovery log of one project
#[derive(Debug, Clone)]
pub struct RecoveryLog {
    layout: WorkspaceLayout,
}

impl RecoveryLog {
    /// Create a log handle for `layout`'s project
    pub fn new(layout: WorkspaceLayout) -> Self {
        Self { layout }
    }

    /// Atomically write `entry` as the current record
    ///
    /// Serializes to `recovery.json.tmp` in the same directory, then
    /// renames over the canonical path.
    pub fn write(&self, entry: &RecoveryLogEntry) -> Result<()> {
        let path = self.layout.recovery_log_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&serde_json::to_vec_pretty(entry)?)?;
        // Flush to stable storage before the rename makes it visible, so
        // the record survives power loss, not just process death.
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &path)?;
        debug!(phase = ?entry.phase, target = %entry.target_snapshot, "wrote recovery log");
        Ok(())
    }

    /// Read the current record
    ///
    /// `Ok(None)` when the file is absent *or* unparseable — a corrupted
    /// log is treated as no recoverable state rather than a hard error.
    pub fn read(&self) -> Result<Option<RecoveryLogEntry>> {
        let path = self.layout.recovery_log_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(path = ?path, error = %e, "recovery log unparseable; treating as absent");
                Ok(None)
            }
        }
    }

    /// Advance the current record to `phase`, optionally appending an error
    ///
    /// Read-modify-write through the same atomic-rename path. A no-op
    /// returning `Ok(false)` when no record exists.
    pub fn update_phase(&self, phase: RecoveryPhase, error: Option<&str>) -> Result<bool> {
        let Some(mut entry) = self.read()? else {
            return Ok(false);
        };
        entry.phase = phase;
        if let Some(text) = error {
            entry.error = Some(match entry.error.take() {
                Some(prev) => format!("{prev}; {text}"),
                None => text.to_string(),
            });
        }
        self.write(&entry)?;
        Ok(true)
    }

    /// Append a fallback-attempt note to the record's error field
    ///
    /// Keeps the phase unchanged. Used so best-effort retry chains leave a
    /// reconstructable trace instead of being swallowed.
    pub fn append_error(&self, text: &str) -> Result<bool> {
        let Some(mut entry) = self.read()? else {
            return Ok(false);
        };
        entry.error = Some(match entry.error.take() {
            Some(prev) => format!("{prev}; {text}"),
            None => text.to_string(),
        });
        self.write(&entry)?;
        Ok(true)
    }

    /// Delete the record; idempotent
    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(self.layout.recovery_log_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether an unfinished rollback is recorded
    pub fn has_pending_recovery(&self) -> Result<bool> {
        Ok(self
            .read()?
            .map(|entry| entry.phase.is_pending())
            .unwrap_or(false))
    }
}
