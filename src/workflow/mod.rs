//! Commit workflow — the gate between a review decision and the store
//!
//! The workflow is the only code path that calls `GraphStore::commit`.
//! It dispatches on the diff decision: rejected diffs never touch the
//! store, accepted diffs commit directly, and edited diffs go through a
//! bounded edit-and-revalidate loop before the (re-resolved) payload is
//! committed. Cancelling or exhausting the loop surfaces as a rejection
//! at the workflow boundary.

use crate::artifacts::atomic_write;
use crate::chapter::ParsedChapter;
use crate::diff::{DecisionStatus, DiffReport};
use crate::ontology::ActiveOntology;
use crate::payload::ExtractionPayload;
use crate::resolve::{ResolutionError, Resolver};
use crate::storage::{CommitReport, GraphStore, StorageError};
use std::io::{IsTerminal, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Workflow failures. `Rejected` covers every path where the reviewer
/// (or the environment) declined the commit: an explicit rejection, a
/// non-interactive session facing a review-gated diff, a cancelled edit
/// loop, or an exhausted one.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("commit rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("workflow io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A human review channel: interactivity probe, editor invocation, and
/// a cancel prompt. Production uses [`EditorSession`]; tests script one.
pub trait ReviewSession {
    /// Whether this session can actually put a human in front of an
    /// editor. Edited diffs are rejected outright when it cannot.
    fn is_interactive(&self) -> bool;

    /// Open `path` for editing and block until the reviewer is done.
    fn edit(&mut self, path: &Path) -> std::io::Result<()>;

    /// Ask whether to abandon the edit. `detail` explains why the
    /// question is being asked. Returns true to cancel.
    fn confirm_cancel(&mut self, detail: &str) -> std::io::Result<bool>;
}

/// Terminal-backed review session. Editor choice follows the usual
/// chain: explicit override, then `$VISUAL`, then `$EDITOR`, then `vi`.
pub struct EditorSession {
    editor: String,
}

impl EditorSession {
    pub fn new(editor_override: Option<String>) -> Self {
        let editor = editor_override
            .or_else(|| std::env::var("VISUAL").ok())
            .or_else(|| std::env::var("EDITOR").ok())
            .unwrap_or_else(|| "vi".to_string());
        Self { editor }
    }
}

impl ReviewSession for EditorSession {
    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
    }

    fn edit(&mut self, path: &Path) -> std::io::Result<()> {
        // Split the editor setting into program + flags ("code --wait")
        // and hand the path over as its own argv element, so paths with
        // shell metacharacters survive intact.
        let mut words = self.editor.split_whitespace();
        let program = words.next().unwrap_or("vi");
        let status = std::process::Command::new(program)
            .args(words)
            .arg(path)
            .status()?;
        // The exit code is not authoritative: some editors report
        // non-zero on a clean save. The content check decides.
        if !status.success() {
            warn!(editor = %self.editor, code = ?status.code(), "editor exited non-zero");
        }
        Ok(())
    }

    fn confirm_cancel(&mut self, detail: &str) -> std::io::Result<bool> {
        eprintln!("{detail}");
        eprint!("Abandon this edit? [y/N] ");
        std::io::stderr().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        let answer = line.trim().to_ascii_lowercase();
        Ok(answer == "y" || answer == "yes")
    }
}

/// What a successful edit loop produced.
#[derive(Debug)]
pub struct EditOutcome {
    pub payload: ExtractionPayload,
    /// Editor invocations, including the successful one
    pub edit_attempts: u32,
    /// Edits that came back unparseable or structurally invalid
    pub validation_failures: u32,
}

/// Edit loop failures.
#[derive(Debug, Error)]
pub enum EditLoopError {
    #[error("edit cancelled by reviewer")]
    Cancelled,

    #[error("no valid edit after {attempts} attempt(s)")]
    AttemptsExhausted { attempts: u32, validation_failures: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Run the bounded edit-and-revalidate loop over the extraction
/// artifact at `artifact`.
///
/// The reviewer edits a scratch copy; the artifact itself is only
/// overwritten (atomically) once an edit parses and validates. A
/// byte-identical edit prompts for cancellation instead of silently
/// re-committing the original. Invalid edits are kept in the scratch
/// copy so the reviewer resumes from their own text.
pub fn run_edit_loop(
    artifact: &Path,
    session: &mut dyn ReviewSession,
    max_attempts: u32,
) -> Result<EditOutcome, EditLoopError> {
    let original = std::fs::read(artifact)?;
    let dir = artifact.parent().unwrap_or_else(|| Path::new("."));
    let scratch = tempfile::Builder::new()
        .prefix("edit-")
        .suffix(".json")
        .tempfile_in(dir)?;
    std::fs::write(scratch.path(), &original)?;

    let mut edit_attempts = 0u32;
    let mut validation_failures = 0u32;

    while edit_attempts < max_attempts.max(1) {
        session.edit(scratch.path())?;
        edit_attempts += 1;

        let edited = std::fs::read(scratch.path())?;
        if edited == original {
            if session.confirm_cancel("No changes were made to the extraction.")? {
                return Err(EditLoopError::Cancelled);
            }
            continue;
        }

        let problem = match serde_json::from_slice::<serde_json::Value>(&edited) {
            Err(e) => format!("Edited extraction is not valid JSON: {e}"),
            Ok(raw) => match crate::payload::validate_payload(&raw) {
                Err(e) => format!("Edited extraction failed validation: {e}"),
                Ok(payload) => {
                    atomic_write(artifact, &edited)?;
                    info!(attempts = edit_attempts, "edited extraction accepted");
                    return Ok(EditOutcome {
                        payload,
                        edit_attempts,
                        validation_failures,
                    });
                }
            },
        };

        validation_failures += 1;
        warn!(attempts = edit_attempts, %problem, "edit rejected");
        if session.confirm_cancel(&problem)? {
            return Err(EditLoopError::Cancelled);
        }
    }

    Err(EditLoopError::AttemptsExhausted {
        attempts: edit_attempts,
        validation_failures,
    })
}

/// The commit gate. Owns the re-resolution step edited payloads go
/// through before reaching the store.
pub struct Workflow<'a> {
    store: &'a dyn GraphStore,
    resolver: Resolver,
    max_edit_attempts: u32,
}

impl<'a> Workflow<'a> {
    pub fn new(store: &'a dyn GraphStore, resolver: Resolver, max_edit_attempts: u32) -> Self {
        Self {
            store,
            resolver,
            max_edit_attempts,
        }
    }

    /// Every committed report carries the edit-loop counters, zeroed on
    /// the direct-commit path.
    fn fold_edit_metrics(mut commit: CommitReport, outcome: Option<&EditOutcome>) -> CommitReport {
        let (edited, attempts, failures) = match outcome {
            Some(o) => (1, i64::from(o.edit_attempts), i64::from(o.validation_failures)),
            None => (0, 0, 0),
        };
        commit.metrics.insert("edited_before_commit".to_string(), edited);
        commit.metrics.insert("edit_attempts".to_string(), attempts);
        commit.metrics.insert("validation_failures".to_string(), failures);
        commit
    }

    /// Drive a diff report through to a commit (or a rejection).
    ///
    /// `extraction_path` is the on-disk extraction artifact the edit
    /// loop works on; `ontology` is the snapshot edited payloads are
    /// re-resolved against.
    pub fn run(
        &self,
        report: &DiffReport,
        ontology: &ActiveOntology,
        chapter: &ParsedChapter,
        extraction_path: &Path,
        session: &mut dyn ReviewSession,
    ) -> Result<CommitReport, WorkflowError> {
        match report.decision.status {
            DecisionStatus::Rejected => {
                info!("diff rejected by reviewer; store untouched");
                Err(WorkflowError::Rejected(
                    "diff was rejected during review".to_string(),
                ))
            }
            DecisionStatus::Accepted => {
                let commit = self
                    .store
                    .commit(chapter, &report.extraction, &report.plan)?;
                Ok(Self::fold_edit_metrics(commit, None))
            }
            DecisionStatus::Edited => {
                if !session.is_interactive() {
                    return Err(WorkflowError::Rejected(
                        "diff requires review but the session is not interactive".to_string(),
                    ));
                }

                let outcome =
                    run_edit_loop(extraction_path, session, self.max_edit_attempts).map_err(
                        |e| match e {
                            EditLoopError::Io(io) => WorkflowError::Io(io),
                            other => WorkflowError::Rejected(other.to_string()),
                        },
                    )?;

                // The old plan described the pre-edit payload; build a
                // fresh one so coverage and conflicts reflect what the
                // reviewer actually wrote.
                let plan = self.resolver.resolve(&outcome.payload, ontology)?;

                let commit = self.store.commit(chapter, &outcome.payload, &plan)?;
                Ok(Self::fold_edit_metrics(commit, Some(&outcome)))
            }
        }
    }
}
