//! Fabula CLI — narrative ingestion into a knowledge graph.
//!
//! Usage:
//!   fabula ingest <chapter.md|chapter.json> [--db path] [--run-id id]
//!   fabula ontology list [--db path] [--run-id id]
//!   fabula ontology show <name> [--db path] [--run-id id]

use clap::{Parser, Subcommand};
use fabula::artifacts::RunDir;
use fabula::workflow::ReviewSession;
use fabula::{
    DecisionOverride, EditorSession, GraphStore, OpenStore, ParsedChapter, Pipeline,
    PipelineConfig, SqliteStore, SubprocessClient,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "fabula",
    version,
    about = "Narrative-to-knowledge-graph ingestion pipeline"
)]
struct Cli {
    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one chapter through extract, resolve, review, and commit
    Ingest {
        /// Chapter file: markdown, or a pre-parsed chapter JSON
        chapter: PathBuf,
        /// Path to SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,
        /// Directory for run artifacts (default: runs/<chapter-id>)
        #[arg(long)]
        run_dir: Option<PathBuf>,
        /// Graph the chapter belongs to
        #[arg(long, default_value = "default")]
        run_id: String,
        /// YAML config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Commit without review, regardless of the diff decision
        #[arg(long, conflicts_with = "reject")]
        accept: bool,
        /// Drop the run after the diff report is written
        #[arg(long)]
        reject: bool,
        /// Never open an editor; review-gated diffs are rejected
        #[arg(long)]
        non_interactive: bool,
    },
    /// Inspect the active ontology
    Ontology {
        #[command(subcommand)]
        action: OntologyAction,
        /// Path to SQLite database file
        #[arg(long, global = true)]
        db: Option<PathBuf>,
        /// Graph to inspect
        #[arg(long, global = true, default_value = "default")]
        run_id: String,
    },
}

#[derive(Subcommand)]
enum OntologyAction {
    /// List all entities
    List,
    /// Show one entity with its states and relationships
    Show {
        /// Entity name (case-insensitive, aliases included)
        name: String,
    },
}

/// Review session for `--non-interactive` runs: reports no terminal, so
/// the workflow rejects anything that needs an editor.
struct HeadlessSession;

impl ReviewSession for HeadlessSession {
    fn is_interactive(&self) -> bool {
        false
    }

    fn edit(&mut self, _path: &Path) -> std::io::Result<()> {
        Ok(())
    }

    fn confirm_cancel(&mut self, _detail: &str) -> std::io::Result<bool> {
        Ok(true)
    }
}

/// Get the default database path (~/.local/share/fabula/fabula.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    let fabula_dir = data_dir.join("fabula");
    std::fs::create_dir_all(&fabula_dir).ok();
    fabula_dir.join("fabula.db")
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, String> {
    match path {
        Some(p) => PipelineConfig::load(p).map_err(|e| format!("Failed to load config: {}", e)),
        None => Ok(PipelineConfig::default()),
    }
}

fn load_chapter(path: &Path) -> Result<ParsedChapter, String> {
    let body =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read chapter: {}", e))?;
    if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&body).map_err(|e| format!("Failed to parse chapter JSON: {}", e))
    } else {
        let chapter_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "chapter".to_string());
        Ok(ParsedChapter::from_markdown(chapter_id, &body))
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_ingest(
    chapter_path: &Path,
    db: Option<PathBuf>,
    run_dir: Option<PathBuf>,
    run_id: &str,
    config_path: Option<PathBuf>,
    decision_override: DecisionOverride,
    non_interactive: bool,
) -> i32 {
    let config = match load_config(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let chapter = match load_chapter(chapter_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let db_path = db.unwrap_or_else(default_db_path);
    let store = match SqliteStore::open(&db_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: failed to open database: {}", e);
            return 1;
        }
    };

    let run_dir = run_dir.unwrap_or_else(|| PathBuf::from("runs").join(&chapter.chapter_id));
    let run_dir = match RunDir::create(run_dir) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: failed to create run directory: {}", e);
            return 1;
        }
    };

    let client = match SubprocessClient::from_command_line(&config.extractor_command) {
        Some(c) => Arc::new(c),
        None => {
            eprintln!("Error: extractor_command must not be empty");
            return 1;
        }
    };

    let mut editor_session;
    let mut headless_session;
    let session: &mut dyn ReviewSession = if non_interactive {
        headless_session = HeadlessSession;
        &mut headless_session
    } else {
        editor_session = EditorSession::new(config.editor.clone());
        &mut editor_session
    };

    let pipeline = Pipeline::new(config);
    match pipeline
        .run(
            run_id,
            &chapter,
            client,
            &store,
            session,
            &run_dir,
            decision_override,
        )
        .await
    {
        Ok(commit) => {
            println!(
                "Committed chapter '{}' to graph '{}'",
                chapter.chapter_id, commit.run_id
            );
            for (key, value) in &commit.metrics {
                println!("  {}: {}", key, value);
            }
            println!("Artifacts in {}", run_dir.root().display());
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_ontology_list(store: &SqliteStore, run_id: &str) -> i32 {
    let ontology = match store.load_ontology(run_id) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if ontology.entities.is_empty() {
        println!("No entities in graph '{}'", run_id);
        return 0;
    }
    for entity in &ontology.entities {
        let aliases = if entity.aliases.is_empty() {
            String::new()
        } else {
            format!(" (aka {})", entity.aliases.join(", "))
        };
        println!(
            "{}  {} [{}]{}",
            entity.uuid, entity.name, entity.entity_type, aliases
        );
    }
    0
}

fn cmd_ontology_show(store: &SqliteStore, run_id: &str, name: &str) -> i32 {
    let ontology = match store.load_ontology(run_id) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let Some(entity) = ontology.entities.iter().find(|e| e.matches_name(name)) else {
        eprintln!("Error: no entity named '{}' in graph '{}'", name, run_id);
        return 1;
    };

    println!("{} [{}]", entity.name, entity.entity_type);
    println!("  uuid: {}", entity.uuid);
    if !entity.aliases.is_empty() {
        println!("  aliases: {}", entity.aliases.join(", "));
    }
    if let Some(baseline) = &entity.baseline_state {
        println!("  baseline: {}", baseline);
    }

    let states: Vec<_> = ontology
        .states
        .iter()
        .filter(|s| s.entity_uuid == entity.uuid)
        .collect();
    if !states.is_empty() {
        println!("  states:");
        for state in states {
            match &state.valid_from_event {
                Some(event) => {
                    println!("    {} = {} (since {})", state.attribute, state.value, event)
                }
                None => println!("    {} = {}", state.attribute, state.value),
            }
        }
    }

    let relationships: Vec<_> = ontology
        .relationships
        .iter()
        .filter(|r| r.source_uuid == entity.uuid || r.target_uuid == entity.uuid)
        .collect();
    if !relationships.is_empty() {
        println!("  relationships:");
        for rel in relationships {
            let other = if rel.source_uuid == entity.uuid {
                rel.target_uuid
            } else {
                rel.source_uuid
            };
            let other_name = ontology
                .get(&other)
                .map(|e| e.name.clone())
                .unwrap_or_else(|| other.to_string());
            println!("    {} {} (weight {:.1})", rel.nature, other_name, rel.weight);
        }
    }
    0
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ingest {
            chapter,
            db,
            run_dir,
            run_id,
            config,
            accept,
            reject,
            non_interactive,
        } => {
            let decision_override = if accept {
                DecisionOverride::Accept
            } else if reject {
                DecisionOverride::Reject
            } else {
                DecisionOverride::None
            };
            let code = cmd_ingest(
                &chapter,
                db,
                run_dir,
                &run_id,
                config,
                decision_override,
                non_interactive,
            )
            .await;
            std::process::exit(code);
        }
        Commands::Ontology { action, db, run_id } => {
            let db_path = db.unwrap_or_else(default_db_path);
            let store = match SqliteStore::open(&db_path) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error: failed to open database: {}", e);
                    std::process::exit(1);
                }
            };
            let code = match action {
                OntologyAction::List => cmd_ontology_list(&store, &run_id),
                OntologyAction::Show { name } => cmd_ontology_show(&store, &run_id, &name),
            };
            std::process::exit(code);
        }
    }
}
