//! Extraction payload — the schema-constrained JSON contract between stages
//!
//! The extractor, the edit loop, and the commit path all consume raw JSON
//! through [`validate_payload`]: structural shape is checked by serde,
//! referential integrity (dangling temp_ids) by [`check_references`].
//! Typed structs are only constructed after both checks pass; upstream
//! structure is never trusted implicitly.
//!
//! The schemars-derived JSON Schema is handed to the structured-extraction
//! adapter so the model is constrained at the source.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Validation failures for an extraction payload.
///
/// `Structure` wraps the serde error for shape violations; the reference
/// variants carry the offending location so the edit loop can surface it.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload structure invalid: {0}")]
    Structure(String),
    #[error("duplicate temp_id '{0}' declared in entities")]
    DuplicateTempId(String),
    #[error("{location} references undeclared temp_id '{temp_id}'")]
    DanglingReference { location: String, temp_id: String },
}

/// A candidate entity surfaced by extraction.
///
/// `temp_id` is unique only within one payload; resolution assigns the
/// stable identity.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CandidateEntity {
    pub temp_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    /// The model's claim that this entity is not yet in the ontology.
    /// The resolver may auto-correct it.
    pub is_new: bool,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A candidate narrative event referencing entities by temp_id.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CandidateEvent {
    pub temp_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub summary: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub location_temp_id: Option<String>,
}

/// A candidate attribute change on an entity.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CandidateStateChange {
    pub entity_temp_id: String,
    pub attribute: String,
    pub value: String,
    /// Event temp_id that opens this state's validity window
    #[serde(default)]
    pub trigger_event: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}

/// A candidate relationship between two entities.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CandidateRelationship {
    pub source_temp_id: String,
    pub target_temp_id: String,
    pub nature: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub context: Option<String>,
}

/// The full extraction payload.
///
/// Produced by the extractor, mutated at most once via the edit loop,
/// consumed by the resolver and then by commit.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractionPayload {
    pub entities: Vec<CandidateEntity>,
    pub events: Vec<CandidateEvent>,
    #[serde(default)]
    pub state_changes: Vec<CandidateStateChange>,
    #[serde(default)]
    pub relationships: Vec<CandidateRelationship>,
}

impl ExtractionPayload {
    /// All temp_ids declared in `entities`.
    pub fn declared_temp_ids(&self) -> HashSet<&str> {
        self.entities.iter().map(|e| e.temp_id.as_str()).collect()
    }

    /// All entity temp_ids referenced by events, state changes, and
    /// relationships. Each must be covered by a resolution plan before
    /// commit.
    pub fn referenced_temp_ids(&self) -> HashSet<&str> {
        let mut ids = HashSet::new();
        for event in &self.events {
            ids.extend(event.participants.iter().map(String::as_str));
            if let Some(loc) = &event.location_temp_id {
                ids.insert(loc.as_str());
            }
        }
        for change in &self.state_changes {
            ids.insert(change.entity_temp_id.as_str());
        }
        for rel in &self.relationships {
            ids.insert(rel.source_temp_id.as_str());
            ids.insert(rel.target_temp_id.as_str());
        }
        ids
    }
}

/// Validate raw JSON into a typed payload.
///
/// Structural violations (wrong shape, missing fields) and semantic
/// violations (duplicate or dangling temp_ids in events) both fail; the
/// extractor counts either as one validation failure.
pub fn validate_payload(raw: &serde_json::Value) -> Result<ExtractionPayload, PayloadError> {
    let payload: ExtractionPayload = serde_json::from_value(raw.clone())
        .map_err(|e| PayloadError::Structure(e.to_string()))?;
    check_references(&payload)?;
    Ok(payload)
}

/// Semantic checks the schema cannot express: entity temp_ids are unique,
/// and every event participant / location resolves to a declared temp_id.
pub fn check_references(payload: &ExtractionPayload) -> Result<(), PayloadError> {
    let mut declared = HashSet::new();
    for entity in &payload.entities {
        if !declared.insert(entity.temp_id.as_str()) {
            return Err(PayloadError::DuplicateTempId(entity.temp_id.clone()));
        }
    }

    for (i, event) in payload.events.iter().enumerate() {
        for participant in &event.participants {
            if !declared.contains(participant.as_str()) {
                return Err(PayloadError::DanglingReference {
                    location: format!("events[{}].participants", i),
                    temp_id: participant.clone(),
                });
            }
        }
        if let Some(loc) = &event.location_temp_id {
            if !declared.contains(loc.as_str()) {
                return Err(PayloadError::DanglingReference {
                    location: format!("events[{}].location_temp_id", i),
                    temp_id: loc.clone(),
                });
            }
        }
    }
    Ok(())
}

/// The JSON Schema constraining extraction output, for the adapter call.
pub fn json_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(ExtractionPayload))
        .unwrap_or(serde_json::Value::Null)
}
