//! Fabula: Narrative-to-Knowledge-Graph Ingestion Pipeline
//!
//! Turns a chapter of narrative prose into a validated, versioned
//! knowledge-graph mutation. The pipeline runs in fixed stages:
//!
//! - **Extractor**: LLM-backed structured extraction with a bounded
//!   retry/validation loop
//! - **Resolver**: reconciles candidate entities against the active
//!   ontology (exact match, fuzzy match, generic-name promotion)
//! - **DiffValidator**: summarizes the proposed change for human review
//! - **Commit workflow**: gates the graph mutation behind an interactive
//!   edit-and-revalidate loop, then commits atomically
//!
//! Every stage exchanges serialized JSON artifacts; nothing reaches the
//! graph store until the final workflow step succeeds.
//!
//! # Example
//!
//! ```
//! use fabula::ParsedChapter;
//!
//! let chapter = ParsedChapter::from_markdown("ch01", "# One\n\nElara walked in.");
//! assert_eq!(chapter.title.as_deref(), Some("One"));
//! ```

pub mod artifacts;
pub mod chapter;
pub mod config;
pub mod diff;
pub mod extract;
pub mod llm;
pub mod ontology;
pub mod payload;
pub mod pipeline;
pub mod resolve;
pub mod storage;
pub mod workflow;

pub use chapter::{ChapterBlock, ParsedChapter};
pub use config::{ConfigError, PipelineConfig};
pub use diff::{Decision, DecisionStatus, DiffReport, ReviewPolicy};
pub use extract::{ExtractionError, ExtractionMeta, Extractor};
pub use llm::{ClientError, ExtractionClient, MockClient, SubprocessClient};
pub use ontology::{ActiveOntology, OntologyEntity, RelationshipSnapshot, StateSnapshot};
pub use payload::{ExtractionPayload, PayloadError};
pub use pipeline::{DecisionOverride, Pipeline, PipelineError};
pub use resolve::{
    Conflict, GenericNames, ResolutionError, ResolutionMetrics, ResolutionPlan, Resolver, Warning,
};
pub use storage::{
    CommitReport, CommitStatus, GraphStore, OpenStore, SqliteStore, StorageError, StorageResult,
};
pub use workflow::{EditOutcome, EditorSession, ReviewSession, Workflow, WorkflowError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
