//! SQLite storage backend for Fabula

use super::traits::{CommitReport, CommitStatus, GraphStore, OpenStore, StorageError, StorageResult};
use crate::chapter::ParsedChapter;
use crate::ontology::{ActiveOntology, OntologyEntity, RelationshipSnapshot, StateSnapshot};
use crate::payload::ExtractionPayload;
use crate::resolve::{ResolutionMethod, ResolutionPlan};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// SQLite-backed graph store
///
/// Single database file with tables for entities, aliases, events,
/// states, relationships, and commit reports. Thread-safe via internal
/// mutex on the connection; each commit runs in one transaction, so a
/// failed commit leaves no partial graph mutation.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            -- Stable entities; uuid is immutable, name may be promoted
            CREATE TABLE IF NOT EXISTS entities (
                uuid TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                baseline_state TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name);
            CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);

            CREATE TABLE IF NOT EXISTS aliases (
                entity_uuid TEXT NOT NULL,
                alias TEXT NOT NULL,
                PRIMARY KEY (entity_uuid, alias),
                FOREIGN KEY (entity_uuid) REFERENCES entities(uuid) ON DELETE CASCADE
            );

            -- Narrative events; event_key is the payload temp_id, which
            -- is only unique within one chapter's extraction
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                chapter_id TEXT NOT NULL,
                event_key TEXT NOT NULL,
                event_type TEXT NOT NULL,
                summary TEXT NOT NULL,
                location_uuid TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (run_id, chapter_id, event_key)
            );

            CREATE TABLE IF NOT EXISTS event_participants (
                event_id INTEGER NOT NULL,
                entity_uuid TEXT NOT NULL,
                PRIMARY KEY (event_id, entity_uuid),
                FOREIGN KEY (event_id) REFERENCES events(id) ON DELETE CASCADE
            );

            -- Attribute states with event-bounded validity windows
            CREATE TABLE IF NOT EXISTS states (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_uuid TEXT NOT NULL,
                attribute TEXT NOT NULL,
                value TEXT NOT NULL,
                valid_from_event TEXT,
                valid_to_event TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (entity_uuid) REFERENCES entities(uuid) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_states_entity ON states(entity_uuid);

            CREATE TABLE IF NOT EXISTS relationships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_uuid TEXT NOT NULL,
                target_uuid TEXT NOT NULL,
                nature TEXT NOT NULL,
                weight REAL NOT NULL,
                context TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_relationships_source
                ON relationships(source_uuid);

            CREATE TABLE IF NOT EXISTS commits (
                run_id TEXT PRIMARY KEY,
                chapter_id TEXT NOT NULL,
                status TEXT NOT NULL,
                metrics_json TEXT NOT NULL,
                committed_at TEXT NOT NULL
            );

            PRAGMA foreign_keys = ON;

            -- WAL mode for concurrent reads during a commit
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn load_entities(conn: &Connection) -> StorageResult<Vec<OntologyEntity>> {
        let mut stmt = conn.prepare(
            "SELECT uuid, name, entity_type, baseline_state FROM entities ORDER BY created_at, uuid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut entities = Vec::new();
        for row in rows {
            let (uuid_str, name, entity_type, baseline_state) = row?;
            let uuid = Self::parse_uuid(&uuid_str)?;
            entities.push(OntologyEntity {
                uuid,
                name,
                entity_type,
                aliases: Vec::new(),
                baseline_state,
            });
        }

        // Attach aliases
        let mut alias_stmt = conn.prepare("SELECT entity_uuid, alias FROM aliases")?;
        let alias_rows = alias_stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut by_uuid: HashMap<String, Vec<String>> = HashMap::new();
        for row in alias_rows {
            let (uuid, alias) = row?;
            by_uuid.entry(uuid).or_default().push(alias);
        }
        for entity in &mut entities {
            if let Some(aliases) = by_uuid.remove(&entity.uuid.to_string()) {
                entity.aliases = aliases;
            }
        }

        Ok(entities)
    }

    fn parse_uuid(text: &str) -> StorageResult<Uuid> {
        Uuid::parse_str(text).map_err(|e| {
            StorageError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl GraphStore for SqliteStore {
    fn load_ontology(&self, run_id: &str) -> StorageResult<ActiveOntology> {
        let conn = self.conn.lock().unwrap();

        let entities = Self::load_entities(&conn)?;

        let mut state_stmt = conn.prepare(
            "SELECT entity_uuid, attribute, value, valid_from_event, valid_to_event, created_at
             FROM states ORDER BY id",
        )?;
        let state_rows = state_stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut states = Vec::new();
        for row in state_rows {
            let (uuid, attribute, value, from, to, created_at) = row?;
            states.push(StateSnapshot {
                entity_uuid: Self::parse_uuid(&uuid)?,
                attribute,
                value,
                valid_from_event: from,
                valid_to_event: to,
                created_at: created_at
                    .parse()
                    .unwrap_or_else(|_| Utc::now()),
            });
        }

        let mut rel_stmt = conn.prepare(
            "SELECT source_uuid, target_uuid, nature, weight, context FROM relationships ORDER BY id",
        )?;
        let rel_rows = rel_stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;
        let mut relationships = Vec::new();
        for row in rel_rows {
            let (source, target, nature, weight, context) = row?;
            relationships.push(RelationshipSnapshot {
                source_uuid: Self::parse_uuid(&source)?,
                target_uuid: Self::parse_uuid(&target)?,
                nature,
                weight,
                context,
            });
        }

        let mut type_stmt =
            conn.prepare("SELECT DISTINCT event_type FROM events ORDER BY event_type")?;
        let known_event_types = type_stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let entity_count = entities.len();
        Ok(ActiveOntology {
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            entities,
            states,
            relationships,
            known_event_types,
            retrieval: Some(serde_json::json!({
                "backend": "sqlite",
                "entities": entity_count,
            })),
        })
    }

    fn commit(
        &self,
        chapter: &ParsedChapter,
        payload: &ExtractionPayload,
        plan: &ResolutionPlan,
    ) -> StorageResult<CommitReport> {
        // Coverage invariant: every referenced temp_id must be in the plan.
        plan.verify_coverage(payload)
            .map_err(|missing| StorageError::UnresolvedReference(missing.join(", ")))?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let mut uuid_map: HashMap<&str, Uuid> = HashMap::new();
        let mut promotions = 0i64;

        for resolved in &plan.resolved_entities {
            uuid_map.insert(resolved.temp_id.as_str(), resolved.uuid);
            if let ResolutionMethod::Promoted { old_name, .. } = &resolved.method {
                // Promotion: candidate name becomes canonical, the old
                // placeholder survives as an alias.
                let updated = tx.execute(
                    "UPDATE entities SET name = ?1 WHERE uuid = ?2",
                    params![resolved.name, resolved.uuid.to_string()],
                )?;
                if updated == 0 {
                    return Err(StorageError::UnknownEntity(resolved.uuid));
                }
                tx.execute(
                    "INSERT OR IGNORE INTO aliases (entity_uuid, alias) VALUES (?1, ?2)",
                    params![resolved.uuid.to_string(), old_name],
                )?;
                promotions += 1;
            }
        }

        for new_entity in &plan.new_entities {
            let uuid = Uuid::new_v4();
            uuid_map.insert(new_entity.temp_id.as_str(), uuid);
            tx.execute(
                "INSERT INTO entities (uuid, name, entity_type, baseline_state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    uuid.to_string(),
                    new_entity.name,
                    new_entity.entity_type,
                    new_entity.description,
                    now,
                ],
            )?;
            for alias in &new_entity.aliases {
                tx.execute(
                    "INSERT OR IGNORE INTO aliases (entity_uuid, alias) VALUES (?1, ?2)",
                    params![uuid.to_string(), alias],
                )?;
            }
        }

        let resolve_temp = |temp_id: &str| -> StorageResult<Uuid> {
            uuid_map
                .get(temp_id)
                .copied()
                .ok_or_else(|| StorageError::UnresolvedReference(temp_id.to_string()))
        };

        for event in &payload.events {
            let location_uuid = event
                .location_temp_id
                .as_deref()
                .map(resolve_temp)
                .transpose()?;
            // Re-ingesting a chapter replaces its events; participants
            // cascade with the replaced row.
            tx.execute(
                "INSERT OR REPLACE INTO events
                 (run_id, chapter_id, event_key, event_type, summary, location_uuid, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    plan.run_id,
                    chapter.chapter_id,
                    event.temp_id,
                    event.event_type,
                    event.summary,
                    location_uuid.map(|u| u.to_string()),
                    now,
                ],
            )?;
            let event_id = tx.last_insert_rowid();
            for participant in &event.participants {
                tx.execute(
                    "INSERT OR IGNORE INTO event_participants (event_id, entity_uuid)
                     VALUES (?1, ?2)",
                    params![event_id, resolve_temp(participant)?.to_string()],
                )?;
            }
        }

        for change in &payload.state_changes {
            tx.execute(
                "INSERT INTO states (entity_uuid, attribute, value, valid_from_event, valid_to_event, created_at)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
                params![
                    resolve_temp(&change.entity_temp_id)?.to_string(),
                    change.attribute,
                    change.value,
                    change.trigger_event,
                    now,
                ],
            )?;
        }

        for rel in &payload.relationships {
            tx.execute(
                "INSERT INTO relationships (source_uuid, target_uuid, nature, weight, context, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    resolve_temp(&rel.source_temp_id)?.to_string(),
                    resolve_temp(&rel.target_temp_id)?.to_string(),
                    rel.nature,
                    rel.weight,
                    rel.context,
                    now,
                ],
            )?;
        }

        let mut metrics: BTreeMap<String, i64> = BTreeMap::new();
        metrics.insert("entities_created".to_string(), plan.new_entities.len() as i64);
        metrics.insert(
            "entities_resolved".to_string(),
            plan.resolved_entities.len() as i64,
        );
        metrics.insert("names_promoted".to_string(), promotions);
        metrics.insert("events_committed".to_string(), payload.events.len() as i64);
        metrics.insert(
            "states_committed".to_string(),
            payload.state_changes.len() as i64,
        );
        metrics.insert(
            "relationships_committed".to_string(),
            payload.relationships.len() as i64,
        );

        let report = CommitReport {
            run_id: plan.run_id.clone(),
            status: CommitStatus::Success,
            committed_at: Utc::now(),
            metrics,
        };

        tx.execute(
            "INSERT OR REPLACE INTO commits (run_id, chapter_id, status, metrics_json, committed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                report.run_id,
                chapter.chapter_id,
                "success",
                serde_json::to_string(&report.metrics)?,
                report.committed_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        info!(
            run_id = %report.run_id,
            chapter = %chapter.chapter_id,
            entities_created = plan.new_entities.len(),
            "commit applied"
        );
        Ok(report)
    }
}

impl SqliteStore {
    /// Commit report for a prior run, if one exists.
    pub fn commit_report(&self, run_id: &str) -> StorageResult<Option<CommitReport>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT status, metrics_json, committed_at FROM commits WHERE run_id = ?1",
            params![run_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?
        .map(|(status, metrics_json, committed_at)| {
            Ok(CommitReport {
                run_id: run_id.to_string(),
                status: if status == "success" {
                    CommitStatus::Success
                } else {
                    CommitStatus::Failed
                },
                committed_at: committed_at.parse().unwrap_or_else(|_| Utc::now()),
                metrics: serde_json::from_str(&metrics_json)?,
            })
        })
        .transpose()
    }

    /// Number of committed entities (test and CLI convenience).
    pub fn entity_count(&self) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
