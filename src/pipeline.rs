//! Pipeline orchestration — extract, resolve, review, commit
//!
//! Runs the stages in their fixed order and persists each stage's
//! artifact into the run directory before the next stage consumes it.
//! The extraction audit record is written win or lose, so a failed run
//! still leaves its attempt counters on disk.

use crate::artifacts::{self, ArtifactError, RunDir};
use crate::chapter::ParsedChapter;
use crate::config::PipelineConfig;
use crate::diff::{self, Decision, DecisionStatus};
use crate::extract::{ExtractionError, Extractor};
use crate::llm::ExtractionClient;
use crate::resolve::{ResolutionError, Resolver};
use crate::storage::{CommitReport, GraphStore, StorageError};
use crate::workflow::{ReviewSession, Workflow, WorkflowError};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Umbrella error for a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Runner-level override of the diff decision. `Accept` force-commits
/// without review; `Reject` drops the run after the diff report is
/// written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecisionOverride {
    #[default]
    None,
    Accept,
    Reject,
}

/// One configured pipeline, reusable across runs.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute a full ingestion run for one chapter.
    ///
    /// Artifacts land in `run_dir` in stage order; the returned commit
    /// report is also persisted there as the final artifact.
    pub async fn run(
        &self,
        run_id: &str,
        chapter: &ParsedChapter,
        client: Arc<dyn ExtractionClient>,
        store: &dyn GraphStore,
        session: &mut dyn ReviewSession,
        run_dir: &RunDir,
        decision_override: DecisionOverride,
    ) -> Result<CommitReport, PipelineError> {
        info!(run_id, chapter_id = %chapter.chapter_id, "pipeline run starting");
        run_dir.write_json(artifacts::PARSED_CHAPTER, chapter)?;

        let ontology = store.load_ontology(run_id)?;
        run_dir.write_json(artifacts::ACTIVE_ONTOLOGY, &ontology)?;

        let extractor = Extractor::new(
            client,
            self.config.model.clone(),
            self.config.max_extraction_attempts,
        );
        let (result, meta) = extractor.extract(chapter, &ontology).await;
        // Audit record first; the `?` below must not lose the counters.
        run_dir.write_json(artifacts::EXTRACTION_META, &meta)?;
        let payload = result?;
        run_dir.write_json(artifacts::EXTRACTED_PAYLOAD, &payload)?;

        let resolver = Resolver::new(
            self.config.conflict_threshold,
            self.config.generic_names(),
        );
        let plan = resolver.resolve(&payload, &ontology)?;
        run_dir.write_json(artifacts::RESOLUTION_PLAN, &plan)?;

        let mut report = diff::summarize(&plan, &payload, self.config.review_policy());
        match decision_override {
            DecisionOverride::None => {}
            DecisionOverride::Accept => {
                report.decision = Decision {
                    status: DecisionStatus::Accepted,
                    edit_target: None,
                };
            }
            DecisionOverride::Reject => {
                report.decision = Decision {
                    status: DecisionStatus::Rejected,
                    edit_target: None,
                };
            }
        }
        run_dir.write_json(artifacts::DIFF_REPORT, &report)?;

        let workflow = Workflow::new(
            store,
            Resolver::new(
                self.config.conflict_threshold,
                self.config.generic_names(),
            ),
            self.config.max_edit_attempts,
        );
        let commit = workflow.run(
            &report,
            &ontology,
            chapter,
            &run_dir.path(artifacts::EXTRACTED_PAYLOAD),
            session,
        )?;
        run_dir.write_json(artifacts::COMMIT_REPORT, &commit)?;

        info!(
            run_id,
            status = ?commit.status,
            "pipeline run committed"
        );
        Ok(commit)
    }
}
