//! Diff validator — human-reviewable summary of a proposed graph change
//!
//! Folds the resolution plan and the raw extraction into one report and
//! assigns the review decision. Editing rewrites the extraction, not the
//! plan, so an `edited` decision always names the extraction artifact as
//! its target.

use crate::artifacts;
use crate::payload::ExtractionPayload;
use crate::resolve::ResolutionPlan;
use serde::{Deserialize, Serialize};

/// Review outcome for a diff report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Accepted,
    Edited,
    Rejected,
}

/// The decision driving the commit workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub status: DecisionStatus,
    /// Artifact the reviewer edits; always set when status is `edited`
    #[serde(default)]
    pub edit_target: Option<String>,
}

/// Per-deployment review policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReviewPolicy {
    /// Force review even for trivial diffs
    pub mandatory_review: bool,
}

/// Headline counts for the human reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffSummary {
    pub resolved_entities: usize,
    pub new_entities: usize,
    pub warnings: usize,
    pub events: usize,
    pub state_changes: usize,
    pub relationships: usize,
}

/// The review artifact: decision plus a serialized view of the plan and
/// extraction for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffReport {
    pub decision: Decision,
    pub summary: DiffSummary,
    pub plan: ResolutionPlan,
    pub extraction: ExtractionPayload,
}

/// Summarize a plan and extraction into a diff report.
///
/// Policy: `edited` when any resolution went through the fuzzy path,
/// when the plan carries warnings, or when review is mandatory;
/// `accepted` only for a trivial diff.
pub fn summarize(
    plan: &ResolutionPlan,
    extraction: &ExtractionPayload,
    policy: ReviewPolicy,
) -> DiffReport {
    let needs_review =
        policy.mandatory_review || plan.has_fuzzy_resolutions() || !plan.warnings.is_empty();

    let decision = if needs_review {
        Decision {
            status: DecisionStatus::Edited,
            edit_target: Some(artifacts::EXTRACTED_PAYLOAD.to_string()),
        }
    } else {
        Decision {
            status: DecisionStatus::Accepted,
            edit_target: None,
        }
    };

    DiffReport {
        decision,
        summary: DiffSummary {
            resolved_entities: plan.resolved_entities.len(),
            new_entities: plan.new_entities.len(),
            warnings: plan.warnings.len(),
            events: extraction.events.len(),
            state_changes: extraction.state_changes.len(),
            relationships: extraction.relationships.len(),
        },
        plan: plan.clone(),
        extraction: extraction.clone(),
    }
}
