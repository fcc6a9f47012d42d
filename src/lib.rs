//! # Itervault - Iteration snapshots and crash-safe rollback
//!
//! A recovery layer for iterative, tool-driven editing of a project
//! directory: full-project snapshots per design iteration, an undo that
//! rolls the whole project back one iteration, and the bookkeeping that
//! keeps both safe when the process dies mid-operation.
//!
//! ## Overview
//!
//! Itervault gives an LLM-driven workflow engine a safety net around its
//! edits, allowing you to:
//! - Capture a full snapshot of the project before each design iteration
//! - Roll back to the previous iteration in one atomic-feeling operation
//! - Detect when a file changed under a tool between its read and its
//!   write (optimistic version tracking)
//! - Survive a crash during rollback: a write-ahead recovery log records
//!   how far the rollback got, and a transient backup preserves the
//!   pre-rollback state until success is confirmed
//! - Garbage-collect simulation results and conversation transcripts that
//!   no reachable checkpoint references anymore
//! - Decide when the iteration loop should stop (goals met, budgets
//!   exhausted, stagnation)
//!
//! ## Architecture
//!
//! Everything hangs off a [`RecoverySubsystem`] constructed once per
//! project; there is no process-global state. The key components:
//!
//! - **Snapshot store**: full directory copies under
//!   `.itervault/snapshots/<id>/`, staged invisibly and renamed into
//!   place so a partially written snapshot is never listed
//! - **Recovery log**: a single-record write-ahead log at
//!   `.itervault/recovery.json`, replaced atomically on every phase
//!   transition; a pending entry at startup means the last rollback was
//!   interrupted
//! - **Version tracker**: per-tool-round map from file path to the
//!   SHA-256 of its content as last read, with line endings normalized so
//!   a CRLF/LF difference is never a conflict
//! - **Orphan collector**: recomputes the referenced-artifact set from
//!   the full checkpoint history on every run and deletes only inside the
//!   whitelisted artifact directories, failing closed on any doubt
//! - **Termination policy**: pure decision logic over loop counters and
//!   a trailing metric window
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use itervault::{InMemoryCheckpointStore, RecoverySubsystem, UndoOutcome};
//!
//! # fn main() -> itervault::Result<()> {
//! let subsystem = RecoverySubsystem::new("./my_project")?;
//!
//! // At startup: was a previous rollback interrupted?
//! if let Some(pending) = subsystem.pending_recovery()? {
//!     println!("interrupted rollback toward {}", pending.target_snapshot);
//! }
//!
//! // Before each design iteration
//! let snapshot_id = subsystem.create_iteration_snapshot(1)?;
//! println!("saved {snapshot_id}");
//!
//! // ... the engine edits files, runs simulations ...
//!
//! // Roll back to the previous iteration
//! let checkpoints = InMemoryCheckpointStore::new();
//! match subsystem.undo_to_previous(&checkpoints, "session_1")? {
//!     UndoOutcome::Completed(report) => {
//!         println!("back at iteration {}", report.restored_iteration);
//!     }
//!     UndoOutcome::NothingToUndo => println!("already at the first iteration"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Version tracking
//!
//! ```rust,no_run
//! # use itervault::RecoverySubsystem;
//! # use std::path::Path;
//! # fn main() -> itervault::Result<()> {
//! # let subsystem = RecoverySubsystem::new(".")?;
//! let mut tracker = subsystem.new_tracker();
//! let path = Path::new("./my_project/main.cir");
//!
//! // When a tool reads the file
//! let content = std::fs::read_to_string(path)?;
//! tracker.record_read(path, &content);
//!
//! // Before the tool writes it back
//! let check = tracker.verify_before_write(path);
//! if !check.is_consistent {
//!     // Another actor changed the file; re-read instead of writing.
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`](Result) with [`VaultError`]
//! describing what went wrong. Two conditions are deliberately *not*
//! errors: a version conflict is an ordinary
//! [`VersionCheckResult`](FileVersionTracker::verify_before_write), and
//! undoing with nothing to undo is [`UndoOutcome::NothingToUndo`]. A
//! corrupt recovery log reads as absent rather than failing startup.
//!
//! ## Module Organization
//!
//! - [`subsystem`]: the per-project [`RecoverySubsystem`] entry point
//! - [`snapshot`]: snapshot capture, restore, listing and retention
//! - [`recovery`]: the write-ahead recovery log and its phases
//! - [`undo`]: the coordinator sequencing rollback, cleanup and retirement
//! - [`version_tracker`]: optimistic per-round file version tracking
//! - [`orphan`]: garbage collection of unreferenced artifact files
//! - [`history`]: read-only view of the workflow engine's checkpoints
//! - [`termination`]: the iteration stop policy
//! - [`layout`]: filesystem layout of the application directory
//! - [`hashing`]: content hashing with line-ending normalization
//! - [`error`]: error types and handling

pub mod error;
pub mod hashing;
pub mod history;
pub mod layout;
pub mod orphan;
pub mod recovery;
pub mod snapshot;
pub mod subsystem;
pub mod termination;
pub mod undo;
pub mod version_tracker;

// Re-export main types for convenience
pub use error::{Result, VaultError};
pub use hashing::{hash_content, hash_file, normalize_line_endings};
pub use history::{ChannelValues, CheckpointRecord, CheckpointStore, InMemoryCheckpointStore};
pub use layout::{WorkspaceLayout, DEFAULT_APP_DIR};
pub use orphan::{CleanupResult, OrphanedDataCollector};
pub use recovery::{RecoveryLog, RecoveryLogEntry, RecoveryPhase};
pub use snapshot::{
    generate_snapshot_id, parse_iteration, RestoreOutcome, SnapshotInfo, SnapshotStore,
    DEFAULT_KEEP_COUNT,
};
pub use subsystem::RecoverySubsystem;
pub use termination::{
    IterationStatus, TerminationChecker, TerminationDecision, TerminationReason,
};
pub use undo::{UndoCoordinator, UndoInfo, UndoOutcome, UndoReport};
pub use version_tracker::{FileVersionTracker, VersionCheckResult};
