//! Extractor — LLM-backed structured extraction with a bounded retry loop
//!
//! One extraction call per attempt; a payload that fails structural or
//! semantic validation burns an attempt and triggers a fresh adapter
//! call, up to the configured ceiling. Transport errors are fatal and
//! never retried. Attempt and failure counters are returned alongside
//! the result so the caller can persist `extraction_meta.json` win or
//! lose.

use crate::chapter::ParsedChapter;
use crate::llm::{ClientError, ExtractionClient};
use crate::ontology::ActiveOntology;
use crate::payload::{self, ExtractionPayload};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Audit record for one extraction run, persisted regardless of outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionMeta {
    pub attempts: u32,
    pub validation_failures: u32,
}

/// Extraction failures.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Transport/config failure from the adapter. Fatal, not retried.
    #[error("extraction adapter error: {0}")]
    Adapter(#[from] ClientError),
    /// No valid payload after the retry budget was exhausted.
    #[error("no valid payload after {attempts} attempts: {detail}")]
    Schema {
        attempts: u32,
        validation_failures: u32,
        detail: String,
    },
}

/// LLM-backed extractor with validation-gated retries.
pub struct Extractor {
    client: Arc<dyn ExtractionClient>,
    model: String,
    max_attempts: u32,
}

impl Extractor {
    /// `max_attempts` is clamped to at least 1.
    pub fn new(client: Arc<dyn ExtractionClient>, model: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            client,
            model: model.into(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Build the extraction prompt embedding the chapter text and the
    /// active ontology, so the model can reference existing entities by
    /// name instead of inventing duplicates.
    pub fn build_prompt(&self, chapter: &ParsedChapter, ontology: &ActiveOntology) -> String {
        let mut prompt = String::new();
        prompt.push_str(
            "Extract entities, events, state changes, and relationships from the chapter below.\n\
             Reference existing ontology entities by their exact name and set is_new to false for them.\n\
             Give every entity a temp_id unique within your response, and reference entities in events,\n\
             state changes, and relationships only by those temp_ids.\n\n",
        );

        if ontology.entities.is_empty() {
            prompt.push_str("The ontology is empty; every entity is new.\n");
        } else {
            prompt.push_str("Known entities:\n");
            for entity in &ontology.entities {
                prompt.push_str(&format!("- {} ({})", entity.name, entity.entity_type));
                if !entity.aliases.is_empty() {
                    prompt.push_str(&format!(" aka {}", entity.aliases.join(", ")));
                }
                prompt.push('\n');
            }
        }
        if !ontology.known_event_types.is_empty() {
            prompt.push_str(&format!(
                "Known event types: {}\n",
                ontology.known_event_types.join(", ")
            ));
        }

        prompt.push_str("\n--- CHAPTER ---\n");
        if let Some(title) = &chapter.title {
            prompt.push_str(&format!("# {}\n\n", title));
        }
        prompt.push_str(&chapter.full_text());
        prompt.push('\n');
        prompt
    }

    /// Run the extraction loop.
    ///
    /// Returns the result together with the audit counters; the counters
    /// are valid even when the result is an error. Retries are sequential
    /// so the counters stay deterministic.
    pub async fn extract(
        &self,
        chapter: &ParsedChapter,
        ontology: &ActiveOntology,
    ) -> (Result<ExtractionPayload, ExtractionError>, ExtractionMeta) {
        let schema = payload::json_schema();
        let prompt = self.build_prompt(chapter, ontology);

        let mut attempts = 0u32;
        let mut failures = 0u32;
        let mut last_detail = String::new();

        while attempts < self.max_attempts {
            attempts += 1;
            let raw = match self
                .client
                .structured_extract(&self.model, &prompt, &schema)
                .await
            {
                Ok(v) => v,
                // The model produced non-JSON content: counts as a
                // validation failure and burns the attempt.
                Err(ClientError::ParseError(msg)) => {
                    failures += 1;
                    last_detail = msg;
                    warn!(attempt = attempts, "extractor returned non-JSON content");
                    continue;
                }
                // Transport-level failure: hard stop, no retry.
                Err(e) => {
                    let meta = ExtractionMeta {
                        attempts,
                        validation_failures: failures,
                    };
                    return (Err(ExtractionError::Adapter(e)), meta);
                }
            };

            match payload::validate_payload(&raw) {
                Ok(valid) => {
                    debug!(
                        attempt = attempts,
                        entities = valid.entities.len(),
                        events = valid.events.len(),
                        "extraction payload validated"
                    );
                    let meta = ExtractionMeta {
                        attempts,
                        validation_failures: failures,
                    };
                    return (Ok(valid), meta);
                }
                Err(e) => {
                    failures += 1;
                    last_detail = e.to_string();
                    warn!(attempt = attempts, error = %e, "extraction payload failed validation");
                }
            }
        }

        let meta = ExtractionMeta {
            attempts,
            validation_failures: failures,
        };
        (
            Err(ExtractionError::Schema {
                attempts,
                validation_failures: failures,
                detail: last_detail,
            }),
            meta,
        )
    }
}
