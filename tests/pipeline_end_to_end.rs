//! End-to-end pipeline runs against an in-memory store
//!
//! Each test drives a full ingestion run: scripted extraction client,
//! real resolver and diff validator, scripted review session, SQLite
//! store. Artifacts are checked on disk where the behavior under test
//! depends on them.

mod common;

use common::{dangling_extraction, valid_extraction, ScriptedSession};
use fabula::artifacts::{self, RunDir};
use fabula::{
    DecisionOverride, ExtractionMeta, GraphStore, MockClient, OpenStore, ParsedChapter, Pipeline,
    PipelineConfig, PipelineError, SqliteStore, WorkflowError,
};
use serde_json::json;
use std::sync::Arc;

fn chapter(id: &str) -> ParsedChapter {
    ParsedChapter::from_markdown(id, "# Arrival\n\nElara crossed the marsh at dusk.")
}

fn run_dir() -> (tempfile::TempDir, RunDir) {
    let dir = tempfile::tempdir().unwrap();
    let run = RunDir::create(dir.path().join("run")).unwrap();
    (dir, run)
}

// --- Scenario: clean run commits and leaves a full artifact trail ---

#[tokio::test]
async fn accepted_run_commits_and_writes_artifacts() {
    let (_guard, run) = run_dir();
    let store = SqliteStore::open_in_memory().unwrap();
    let client = Arc::new(MockClient::available().with_response(valid_extraction("Elara", true)));
    let mut session = ScriptedSession::non_interactive();

    let pipeline = Pipeline::new(PipelineConfig::default());
    let commit = pipeline
        .run(
            "saga",
            &chapter("ch01"),
            client,
            &store,
            &mut session,
            &run,
            DecisionOverride::None,
        )
        .await
        .unwrap();

    assert_eq!(commit.metrics["entities_created"], 1);
    assert_eq!(commit.metrics["events_committed"], 1);
    assert_eq!(commit.metrics["edited_before_commit"], 0);
    assert_eq!(commit.metrics["edit_attempts"], 0);
    assert_eq!(commit.metrics["validation_failures"], 0);
    assert_eq!(session.edit_call_count(), 0);

    for name in [
        artifacts::PARSED_CHAPTER,
        artifacts::ACTIVE_ONTOLOGY,
        artifacts::EXTRACTION_META,
        artifacts::EXTRACTED_PAYLOAD,
        artifacts::RESOLUTION_PLAN,
        artifacts::DIFF_REPORT,
        artifacts::COMMIT_REPORT,
    ] {
        assert!(run.exists(name), "missing artifact {}", name);
    }

    let ontology = store.load_ontology("saga").unwrap();
    assert_eq!(ontology.entities.len(), 1);
    assert_eq!(ontology.entities[0].name, "Elara");
    assert_eq!(ontology.known_event_types, vec!["arrival"]);
}

// --- Scenario: second chapter resolves against the committed graph ---

#[tokio::test]
async fn second_run_resolves_exactly_without_duplicating() {
    let (_guard, run1) = run_dir();
    let (_guard2, run2) = run_dir();
    let store = SqliteStore::open_in_memory().unwrap();
    let pipeline = Pipeline::new(PipelineConfig::default());

    let client = Arc::new(MockClient::available().with_response(valid_extraction("Elara", true)));
    let mut session = ScriptedSession::non_interactive();
    pipeline
        .run(
            "saga",
            &chapter("ch01"),
            client,
            &store,
            &mut session,
            &run1,
            DecisionOverride::None,
        )
        .await
        .unwrap();

    // The model references Elara again, correctly flagged as known.
    let client = Arc::new(MockClient::available().with_response(valid_extraction("Elara", false)));
    let mut session = ScriptedSession::non_interactive();
    let commit = pipeline
        .run(
            "saga",
            &chapter("ch02"),
            client,
            &store,
            &mut session,
            &run2,
            DecisionOverride::None,
        )
        .await
        .unwrap();

    assert_eq!(commit.metrics["entities_created"], 0);
    assert_eq!(commit.metrics["entities_resolved"], 1);
    assert_eq!(store.entity_count().unwrap(), 1, "no duplicate Elara");
}

// --- Scenario: invalid first response is retried, counters persisted ---

#[tokio::test]
async fn retry_recovers_and_meta_records_the_failure() {
    let (_guard, run) = run_dir();
    let store = SqliteStore::open_in_memory().unwrap();
    let client = Arc::new(
        MockClient::available()
            .with_response(dangling_extraction())
            .with_response(valid_extraction("Elara", true)),
    );
    let mut session = ScriptedSession::non_interactive();

    Pipeline::new(PipelineConfig::default())
        .run(
            "saga",
            &chapter("ch01"),
            client,
            &store,
            &mut session,
            &run,
            DecisionOverride::None,
        )
        .await
        .unwrap();

    let meta: ExtractionMeta = run.read_json(artifacts::EXTRACTION_META).unwrap();
    assert_eq!(meta.attempts, 2);
    assert_eq!(meta.validation_failures, 1);
}

// --- Scenario: exhausted retries fail the run, meta still on disk ---

#[tokio::test]
async fn exhausted_extraction_fails_but_meta_is_written() {
    let (_guard, run) = run_dir();
    let store = SqliteStore::open_in_memory().unwrap();
    let client = Arc::new(
        MockClient::available()
            .with_response(dangling_extraction())
            .with_response(dangling_extraction()),
    );
    let mut session = ScriptedSession::non_interactive();

    let err = Pipeline::new(PipelineConfig::default())
        .run(
            "saga",
            &chapter("ch01"),
            client,
            &store,
            &mut session,
            &run,
            DecisionOverride::None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Extraction(_)));
    let meta: ExtractionMeta = run.read_json(artifacts::EXTRACTION_META).unwrap();
    assert_eq!(meta.attempts, 2);
    assert_eq!(meta.validation_failures, 2);
    assert!(!run.exists(artifacts::COMMIT_REPORT));
    assert_eq!(store.entity_count().unwrap(), 0);
}

// --- Scenario: reject override drops the run after the diff report ---

#[tokio::test]
async fn reject_override_leaves_the_store_untouched() {
    let (_guard, run) = run_dir();
    let store = SqliteStore::open_in_memory().unwrap();
    let client = Arc::new(MockClient::available().with_response(valid_extraction("Elara", true)));
    let mut session = ScriptedSession::non_interactive();

    let err = Pipeline::new(PipelineConfig::default())
        .run(
            "saga",
            &chapter("ch01"),
            client,
            &store,
            &mut session,
            &run,
            DecisionOverride::Reject,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Workflow(WorkflowError::Rejected(_))
    ));
    assert!(run.exists(artifacts::DIFF_REPORT));
    assert!(!run.exists(artifacts::COMMIT_REPORT));
    assert_eq!(store.entity_count().unwrap(), 0);
}

// --- Scenario: review-gated diff in a headless run is rejected ---

#[tokio::test]
async fn mandatory_review_without_terminal_rejects_without_editing() {
    let (_guard, run) = run_dir();
    let store = SqliteStore::open_in_memory().unwrap();
    let client = Arc::new(MockClient::available().with_response(valid_extraction("Elara", true)));
    let mut session = ScriptedSession::non_interactive();

    let config = PipelineConfig {
        mandatory_review: true,
        ..Default::default()
    };
    let err = Pipeline::new(config)
        .run(
            "saga",
            &chapter("ch01"),
            client,
            &store,
            &mut session,
            &run,
            DecisionOverride::None,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Workflow(WorkflowError::Rejected(_))
    ));
    assert_eq!(session.edit_call_count(), 0);
    assert_eq!(store.entity_count().unwrap(), 0);
}

// --- Scenario: edit loop — broken edit, then a valid one, commits ---

#[tokio::test]
async fn edit_loop_revalidates_and_commits_the_edited_payload() {
    let (_guard, run) = run_dir();
    let store = SqliteStore::open_in_memory().unwrap();
    let client = Arc::new(MockClient::available().with_response(valid_extraction("Elara", true)));

    let edited_payload = json!({
        "entities": [
            { "temp_id": "e1", "name": "Elara", "type": "character", "is_new": true },
            { "temp_id": "e2", "name": "Maren", "type": "character", "is_new": true }
        ],
        "events": [
            {
                "temp_id": "ev1",
                "type": "arrival",
                "summary": "Elara and Maren arrive",
                "participants": ["e1", "e2"]
            }
        ]
    });
    let mut session = ScriptedSession::new(
        vec![
            Some("{ this is not json".to_string()),
            Some(serde_json::to_string_pretty(&edited_payload).unwrap()),
        ],
        vec![false],
    );

    let config = PipelineConfig {
        mandatory_review: true,
        ..Default::default()
    };
    let commit = Pipeline::new(config)
        .run(
            "saga",
            &chapter("ch01"),
            client,
            &store,
            &mut session,
            &run,
            DecisionOverride::None,
        )
        .await
        .unwrap();

    assert_eq!(commit.metrics["edited_before_commit"], 1);
    assert_eq!(commit.metrics["edit_attempts"], 2);
    assert_eq!(commit.metrics["validation_failures"], 1);
    assert_eq!(commit.metrics["entities_created"], 2);
    assert_eq!(session.edit_call_count(), 2);

    // The artifact on disk is the edited version the store committed.
    let body = std::fs::read_to_string(run.path(artifacts::EXTRACTED_PAYLOAD)).unwrap();
    assert!(body.contains("Maren"));
    assert_eq!(store.entity_count().unwrap(), 2);
}

// --- Scenario: accept override skips review on a gated diff ---

#[tokio::test]
async fn accept_override_commits_without_review() {
    let (_guard, run) = run_dir();
    let store = SqliteStore::open_in_memory().unwrap();
    let client = Arc::new(MockClient::available().with_response(valid_extraction("Elara", true)));
    let mut session = ScriptedSession::non_interactive();

    let config = PipelineConfig {
        mandatory_review: true,
        ..Default::default()
    };
    let commit = Pipeline::new(config)
        .run(
            "saga",
            &chapter("ch01"),
            client,
            &store,
            &mut session,
            &run,
            DecisionOverride::Accept,
        )
        .await
        .unwrap();

    assert_eq!(commit.metrics["edited_before_commit"], 0);
    assert_eq!(commit.metrics["edit_attempts"], 0);
    assert_eq!(session.edit_call_count(), 0);
    assert_eq!(store.entity_count().unwrap(), 1);
}
