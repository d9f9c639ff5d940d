//! Active ontology — run-scoped snapshot of previously committed graph state
//!
//! The resolver matches extraction candidates against this snapshot.
//! Entity `uuid` values are unique within a snapshot; names are not
//! (generic placeholders like "She" may coexist with named entities).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

/// Errors from ontology snapshot validation.
#[derive(Debug, Error)]
pub enum OntologyError {
    #[error("duplicate entity uuid in ontology: {0}")]
    DuplicateUuid(Uuid),
}

/// A previously committed entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologyEntity {
    /// Stable identity, immutable once assigned
    pub uuid: Uuid,
    /// Canonical name (may be updated by a name promotion)
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Alternate names accumulated across runs
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Free-form descriptor captured when the entity was first committed
    #[serde(default)]
    pub baseline_state: Option<String>,
}

impl OntologyEntity {
    /// Case-insensitive match against the canonical name or any alias.
    pub fn matches_name(&self, name: &str) -> bool {
        let lower = name.trim().to_lowercase();
        self.name.to_lowercase() == lower
            || self.aliases.iter().any(|a| a.to_lowercase() == lower)
    }

    /// Case-insensitive type compatibility.
    pub fn matches_type(&self, entity_type: &str) -> bool {
        self.entity_type.eq_ignore_ascii_case(entity_type)
    }
}

/// A committed attribute state, with a validity window expressed as
/// event identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub entity_uuid: Uuid,
    pub attribute: String,
    pub value: String,
    #[serde(default)]
    pub valid_from_event: Option<String>,
    #[serde(default)]
    pub valid_to_event: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A committed relationship between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipSnapshot {
    pub source_uuid: Uuid,
    pub target_uuid: Uuid,
    pub nature: String,
    pub weight: f64,
    #[serde(default)]
    pub context: Option<String>,
}

/// Run-scoped snapshot of everything already committed to the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveOntology {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub entities: Vec<OntologyEntity>,
    #[serde(default)]
    pub states: Vec<StateSnapshot>,
    #[serde(default)]
    pub relationships: Vec<RelationshipSnapshot>,
    /// Event types observed in prior commits, embedded into extraction prompts
    #[serde(default)]
    pub known_event_types: Vec<String>,
    /// How this snapshot was assembled (store backend, entity counts)
    #[serde(default)]
    pub retrieval: Option<serde_json::Value>,
}

impl ActiveOntology {
    /// Create an empty snapshot for a run.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            timestamp: Utc::now(),
            entities: Vec::new(),
            states: Vec::new(),
            relationships: Vec::new(),
            known_event_types: Vec::new(),
            retrieval: None,
        }
    }

    /// Check the uuid-uniqueness invariant.
    pub fn validate(&self) -> Result<(), OntologyError> {
        let mut seen = HashSet::new();
        for entity in &self.entities {
            if !seen.insert(entity.uuid) {
                return Err(OntologyError::DuplicateUuid(entity.uuid));
            }
        }
        Ok(())
    }

    /// Find an entity whose name or alias equals `name` (case-insensitive)
    /// with a compatible type. First match wins; snapshot order is the
    /// commit order, so older entities take precedence.
    pub fn find_exact(&self, name: &str, entity_type: &str) -> Option<&OntologyEntity> {
        self.entities
            .iter()
            .find(|e| e.matches_type(entity_type) && e.matches_name(name))
    }

    /// Look up an entity by stable uuid.
    pub fn get(&self, uuid: &Uuid) -> Option<&OntologyEntity> {
        self.entities.iter().find(|e| &e.uuid == uuid)
    }

    /// Entities with a type compatible with `entity_type`.
    pub fn entities_of_type<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> impl Iterator<Item = &'a OntologyEntity> + 'a {
        self.entities.iter().filter(move |e| e.matches_type(entity_type))
    }
}
