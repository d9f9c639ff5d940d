//! Graph persistence — the commit boundary of the pipeline
//!
//! The store is the sole writer of graph state. It loads the active
//! ontology snapshot a run resolves against, and applies a committed
//! extraction + resolution plan atomically.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{CommitReport, CommitStatus, GraphStore, OpenStore, StorageError, StorageResult};
