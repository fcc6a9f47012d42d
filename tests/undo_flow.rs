//! End-to-end rollback scenarios
//!
//! Exercises the full undo path over a realistic project: snapshots,
//! restore, recovery-log lifecycle, orphan cleanup and the undo boundary.

use itervault::{
    ChannelValues, CheckpointRecord, InMemoryCheckpointStore, RecoveryLog, RecoveryLogEntry,
    RecoveryPhase, RecoverySubsystem, UndoOutcome, WorkspaceLayout,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Opt-in diagnostics: run with RUST_LOG=itervault=debug to see the flow
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Lay down a small circuit project with one artifact per iteration
fn seed_project(root: &Path) {
    fs::write(root.join("main.cir"), "* amp v1\nR1 in out 1k\n").unwrap();
    fs::write(root.join("README.md"), "amplifier design\n").unwrap();
    fs::create_dir_all(root.join("lib")).unwrap();
    fs::write(root.join("lib").join("opamp.sub"), ".subckt opamp 1 2 3\n").unwrap();
}

fn write_artifact(root: &Path, rel: &str) {
    let path = root.join(".itervault").join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, format!("artifact: {rel}\n")).unwrap();
}

fn sim_checkpoint(rel: &str) -> CheckpointRecord {
    CheckpointRecord {
        channel_values: ChannelValues {
            sim_result_path: Some(rel.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn undo_restores_files_and_collects_orphans() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    seed_project(tmp.path());
    let subsystem = RecoverySubsystem::new(tmp.path()).unwrap();
    let checkpoints = InMemoryCheckpointStore::new();

    // Iteration 1: snapshot, then produce an artifact the engine records.
    subsystem.create_iteration_snapshot(1).unwrap();
    write_artifact(tmp.path(), "sim_results/run_001.json");
    checkpoints.push("session", sim_checkpoint("sim_results/run_001.json"));

    // Iteration 2: the engine edits files and produces another artifact,
    // but this checkpoint will be discarded by the rollback.
    subsystem.create_iteration_snapshot(2).unwrap();
    fs::write(tmp.path().join("main.cir"), "* amp v2\nR1 in out 2k\n").unwrap();
    fs::write(tmp.path().join("new_stage.cir"), "C1 out 0 1p\n").unwrap();
    write_artifact(tmp.path(), "sim_results/run_002.json");

    let outcome = subsystem.undo_to_previous(&checkpoints, "session").unwrap();
    let UndoOutcome::Completed(report) = outcome else {
        panic!("expected a completed undo");
    };

    // Files are back at the iteration-2 capture point.
    assert_eq!(
        fs::read_to_string(tmp.path().join("main.cir")).unwrap(),
        "* amp v1\nR1 in out 1k\n"
    );
    assert!(!tmp.path().join("new_stage.cir").exists());
    assert_eq!(
        fs::read_to_string(tmp.path().join("lib").join("opamp.sub")).unwrap(),
        ".subckt opamp 1 2 3\n"
    );

    // The referenced artifact survives; the unreferenced one is gone.
    let cleanup = report.cleanup.expect("cleanup should have run");
    assert_eq!(cleanup.deleted_count, 1);
    assert!(tmp
        .path()
        .join(".itervault/sim_results/run_001.json")
        .exists());
    assert!(!tmp
        .path()
        .join(".itervault/sim_results/run_002.json")
        .exists());

    // The undone snapshot is retired, the target remains on the stack.
    assert_eq!(report.restored_iteration, 1);
    assert_eq!(subsystem.list_snapshots().unwrap().len(), 1);

    // The recovery log is gone and nothing is pending.
    assert!(!subsystem.has_pending_recovery().unwrap());
}

#[test]
fn undo_boundary_never_mutates_the_project() {
    let tmp = TempDir::new().unwrap();
    seed_project(tmp.path());
    let subsystem = RecoverySubsystem::new(tmp.path()).unwrap();
    let checkpoints = InMemoryCheckpointStore::new();

    // No snapshots at all.
    let outcome = subsystem.undo_to_previous(&checkpoints, "session").unwrap();
    assert_eq!(outcome, UndoOutcome::NothingToUndo);

    // Exactly one snapshot: still nothing to undo to.
    subsystem.create_iteration_snapshot(1).unwrap();
    fs::write(tmp.path().join("main.cir"), "* amp v2\n").unwrap();
    let outcome = subsystem.undo_to_previous(&checkpoints, "session").unwrap();
    assert_eq!(outcome, UndoOutcome::NothingToUndo);

    // The edit survived both attempts and no log entry was written.
    assert_eq!(
        fs::read_to_string(tmp.path().join("main.cir")).unwrap(),
        "* amp v2\n"
    );
    assert!(!subsystem.has_pending_recovery().unwrap());
    assert_eq!(subsystem.list_snapshots().unwrap().len(), 1);
}

#[test]
fn interrupted_rollback_is_visible_at_startup() {
    let tmp = TempDir::new().unwrap();
    seed_project(tmp.path());

    // Simulate a crash mid-rollback: a log entry stuck before completion.
    let layout = WorkspaceLayout::new(tmp.path()).unwrap();
    let log = RecoveryLog::new(layout);
    log.write(&RecoveryLogEntry::undo("iter_004_20260815_120000"))
        .unwrap();
    log.update_phase(RecoveryPhase::FilesRestored, None).unwrap();

    // A fresh subsystem (the "restarted process") sees the pending entry.
    let subsystem = RecoverySubsystem::new(tmp.path()).unwrap();
    assert!(subsystem.has_pending_recovery().unwrap());
    let pending = subsystem.pending_recovery().unwrap().unwrap();
    assert_eq!(pending.target_snapshot, "iter_004_20260815_120000");
    assert_eq!(pending.phase, RecoveryPhase::FilesRestored);

    // Once resolved, the signal clears.
    log.update_phase(RecoveryPhase::Completed, None).unwrap();
    log.delete().unwrap();
    assert!(!subsystem.has_pending_recovery().unwrap());
}

#[test]
fn repeated_undo_walks_back_through_iterations() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    seed_project(tmp.path());
    let subsystem = RecoverySubsystem::new(tmp.path()).unwrap();
    let checkpoints = InMemoryCheckpointStore::new();

    for i in 1..=3u32 {
        fs::write(tmp.path().join("main.cir"), format!("* amp v{i}\n")).unwrap();
        subsystem.create_iteration_snapshot(i).unwrap();
    }

    let UndoOutcome::Completed(first) =
        subsystem.undo_to_previous(&checkpoints, "session").unwrap()
    else {
        panic!("expected first undo to complete");
    };
    assert_eq!(first.restored_iteration, 2);
    assert_eq!(
        fs::read_to_string(tmp.path().join("main.cir")).unwrap(),
        "* amp v2\n"
    );

    let UndoOutcome::Completed(second) =
        subsystem.undo_to_previous(&checkpoints, "session").unwrap()
    else {
        panic!("expected second undo to complete");
    };
    assert_eq!(second.restored_iteration, 1);
    assert_eq!(
        fs::read_to_string(tmp.path().join("main.cir")).unwrap(),
        "* amp v1\n"
    );

    // One snapshot left; the boundary holds again.
    let outcome = subsystem.undo_to_previous(&checkpoints, "session").unwrap();
    assert_eq!(outcome, UndoOutcome::NothingToUndo);
}

#[test]
fn jump_undo_lands_on_the_named_iteration() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    seed_project(tmp.path());
    let subsystem = RecoverySubsystem::new(tmp.path()).unwrap();
    let checkpoints = InMemoryCheckpointStore::new();

    let mut ids = Vec::new();
    for i in 1..=3u32 {
        fs::write(tmp.path().join("main.cir"), format!("* amp v{i}\n")).unwrap();
        ids.push(subsystem.create_iteration_snapshot(i).unwrap());
    }

    let UndoOutcome::Completed(report) = subsystem
        .undo_to_snapshot(&checkpoints, "session", &ids[0])
        .unwrap()
    else {
        panic!("expected the jump undo to complete");
    };
    assert_eq!(report.restored_iteration, 1);
    assert_eq!(report.popped_snapshots, vec![ids[2].clone(), ids[1].clone()]);
    assert_eq!(
        fs::read_to_string(tmp.path().join("main.cir")).unwrap(),
        "* amp v1\n"
    );
    assert_eq!(subsystem.list_snapshots().unwrap().len(), 1);

    // A target that was never created is rejected before anything runs.
    let err = subsystem
        .undo_to_snapshot(&checkpoints, "session", "iter_099_20260101_000000")
        .unwrap_err();
    assert!(matches!(err, itervault::VaultError::SnapshotNotFound(_)));
    assert!(!subsystem.has_pending_recovery().unwrap());
}

#[test]
fn failed_orphan_scan_does_not_fail_the_undo() {
    use itervault::{CheckpointStore, Result, VaultError};

    struct BrokenStore;
    impl CheckpointStore for BrokenStore {
        fn list_checkpoints(&self, _thread_id: &str) -> Result<Vec<CheckpointRecord>> {
            Err(VaultError::internal("checkpointer offline"))
        }
    }

    let tmp = TempDir::new().unwrap();
    seed_project(tmp.path());
    let subsystem = RecoverySubsystem::new(tmp.path()).unwrap();

    subsystem.create_iteration_snapshot(1).unwrap();
    fs::write(tmp.path().join("main.cir"), "* amp v2\n").unwrap();
    subsystem.create_iteration_snapshot(2).unwrap();
    write_artifact(tmp.path(), "sim_results/run_001.json");

    let UndoOutcome::Completed(report) =
        subsystem.undo_to_previous(&BrokenStore, "session").unwrap()
    else {
        panic!("expected the undo to complete despite the scan failure");
    };

    // The rollback happened, cleanup was skipped, and nothing was deleted.
    assert!(report.cleanup.is_none());
    assert_eq!(
        fs::read_to_string(tmp.path().join("main.cir")).unwrap(),
        "* amp v1\nR1 in out 1k\n"
    );
    assert!(tmp
        .path()
        .join(".itervault/sim_results/run_001.json")
        .exists());
}

#[tokio::test]
async fn async_undo_matches_sync_behavior() {
    let tmp = TempDir::new().unwrap();
    seed_project(tmp.path());
    let subsystem = RecoverySubsystem::new(tmp.path()).unwrap();

    subsystem.create_iteration_snapshot_async(1).await.unwrap();
    fs::write(tmp.path().join("main.cir"), "* amp v2\n").unwrap();
    subsystem.create_iteration_snapshot_async(2).await.unwrap();

    let checkpoints: Arc<dyn itervault::CheckpointStore> =
        Arc::new(InMemoryCheckpointStore::new());
    let outcome = subsystem
        .undo_to_previous_async(checkpoints, "session".to_string())
        .await
        .unwrap();
    assert!(outcome.did_undo());
    assert_eq!(
        fs::read_to_string(tmp.path().join("main.cir")).unwrap(),
        "* amp v1\nR1 in out 1k\n"
    );
}
