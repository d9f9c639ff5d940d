//! Storage trait definitions

use crate::chapter::ParsedChapter;
use crate::ontology::ActiveOntology;
use crate::payload::ExtractionPayload;
use crate::resolve::ResolutionPlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unresolved temp_id(s) referenced by extraction: {0}")]
    UnresolvedReference(String),

    #[error("Unknown entity uuid: {0}")]
    UnknownEntity(uuid::Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of a commit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    Success,
    Failed,
}

/// Commit audit record. The workflow folds its edit-loop counters into
/// `metrics` before the report is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitReport {
    pub run_id: String,
    pub status: CommitStatus,
    pub committed_at: DateTime<Utc>,
    pub metrics: BTreeMap<String, i64>,
}

/// Trait for graph storage backends
///
/// Implementations must be thread-safe (Send + Sync); the pipeline
/// relies on the store to serialize concurrent commits.
pub trait GraphStore: Send + Sync {
    /// Assemble the active-ontology snapshot a run resolves against.
    fn load_ontology(&self, run_id: &str) -> StorageResult<ActiveOntology>;

    /// Apply a committed extraction + resolution plan atomically.
    ///
    /// Fails with `UnresolvedReference` (committing nothing) when any
    /// temp_id referenced by the payload's events, state changes, or
    /// relationships is missing from the plan.
    fn commit(
        &self,
        chapter: &ParsedChapter,
        payload: &ExtractionPayload,
        plan: &ResolutionPlan,
    ) -> StorageResult<CommitReport>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: GraphStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
