//! Read-only interface to the external workflow state store
//!
//! The workflow engine owns an authoritative, checkpointed state machine;
//! each checkpoint carries loosely-shaped "channel values" that include
//! file pointers into the project's ephemeral artifact directories. This
//! crate only ever *reads* that store — to learn which artifact files are
//! still referenced — through the [`CheckpointStore`] trait.
//!
//! Channel values are modeled as a typed structure with explicit optional
//! fields for the known file-pointer keys, while unknown keys are preserved
//! opaquely. Any unknown key ending in `_path` with a string value is also
//! treated as a file pointer, so a future pointer field added by the
//! workflow engine stays safe from garbage collection without a change
//! here.

use crate::error::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Known file-pointer suffix for dynamically discovered keys
const PATH_KEY_SUFFIX: &str = "_path";

/// Loosely-shaped per-checkpoint state, with the file-pointer fields typed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelValues {
    /// Pointer to a simulation-result artifact, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sim_result_path: Option<String>,
    /// Pointer to the design-goals document, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub design_goals_path: Option<String>,
    /// All other channel values, preserved opaquely
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ChannelValues {
    /// Every file pointer carried by this checkpoint's state
    ///
    /// The known typed fields, plus any `extra` key ending in `_path`
    /// whose value is a non-empty string.
    pub fn file_pointers(&self) -> Vec<&str> {
        let mut pointers = Vec::new();
        if let Some(p) = self.sim_result_path.as_deref() {
            pointers.push(p);
        }
        if let Some(p) = self.design_goals_path.as_deref() {
            pointers.push(p);
        }
        for (key, value) in &self.extra {
            if key.ends_with(PATH_KEY_SUFFIX) {
                if let Some(s) = value.as_str() {
                    if !s.is_empty() {
                        pointers.push(s);
                    }
                }
            }
        }
        pointers
    }
}

/// One checkpoint as exposed by the workflow state store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// The checkpoint's channel values (state snapshot)
    pub channel_values: ChannelValues,
    /// Opaque checkpoint metadata, unused by this crate
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Read access to the workflow engine's checkpoint history
///
/// Implemented by the application over its actual state store (e.g. a
/// SQLite-backed checkpointer). This crate never writes through it.
pub trait CheckpointStore: Send + Sync {
    /// All still-reachable checkpoints for one thread, any order
    fn list_checkpoints(&self, thread_id: &str) -> Result<Vec<CheckpointRecord>>;
}

/// In-memory store, for tests and embedding
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<BTreeMap<String, Vec<CheckpointRecord>>>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a checkpoint to a thread's history
    pub fn push(&self, thread_id: &str, record: CheckpointRecord) {
        self.checkpoints
            .lock()
            .entry(thread_id.to_string())
            .or_default()
            .push(record);
    }

    /// Truncate a thread's history to its first `len` checkpoints
    pub fn truncate(&self, thread_id: &str, len: usize) {
        if let Some(records) = self.checkpoints.lock().get_mut(thread_id) {
            records.truncate(len);
        }
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn list_checkpoints(&self, thread_id: &str) -> Result<Vec<CheckpointRecord>> {
        Ok(self
            .checkpoints
            .lock()
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }
}
