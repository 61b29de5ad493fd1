//! Atlas CLI — topic-aware idea graph engine over a local database.
//!
//! Usage:
//!   atlas ingest "Remote work increases productivity" [--stance-hint pro]
//!   atlas supportive <idea-uuid> [--top-k 10]
//!   atlas recluster

use atlas::{AtlasEngine, Config, Database, IdeaId, OpenAiOracle};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "atlas", version, about = "Topic-aware idea graph engine")]
struct Cli {
    /// Path to the SQLite database file (default: DATABASE_PATH, else the
    /// platform data directory)
    #[arg(long)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one idea and print the submission payload
    Ingest {
        text: String,
        /// Cold-start stance hint (pro / neutral / con)
        #[arg(long)]
        stance_hint: Option<String>,
    },
    /// List all topics with counts and stance buckets
    Topics,
    /// Print the compact topic/idea map
    Map {
        #[arg(long, default_value_t = 2500)]
        max_idea_edges: usize,
    },
    /// Supportive neighbors for an idea
    Supportive {
        id: String,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
    /// Opposing neighbors for an idea
    Opposing {
        id: String,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
        /// Rerank weight on seed-similarity (0..1)
        #[arg(long)]
        alpha: Option<f32>,
    },
    /// Nearby neighbors for an idea
    Nearby {
        id: String,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
    /// Supportive / opposing / neutral relation buckets for an idea
    Relations {
        id: String,
        #[arg(long, default_value_t = 2)]
        top_k: usize,
        #[arg(long, default_value_t = 24)]
        candidate_pool: usize,
    },
    /// Run the rebalance job over all level-1 topics
    Recluster,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("atlas")
        .join("atlas.db")
}

fn parse_idea_id(raw: &str) -> Result<IdeaId, String> {
    raw.parse().map_err(|_| format!("invalid idea UUID: {raw}"))
}

fn print_payload<T: Serialize>(payload: &T) {
    match serde_json::to_string_pretty(payload) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("error: failed to serialize payload: {e}"),
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let cfg = Config::from_env();
    let db_path = cli
        .db
        .or_else(|| cfg.database_path.clone())
        .unwrap_or_else(default_db_path);
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| format!("cannot create {}: {e}", dir.display()))?;
    }
    let db = Database::open(&db_path).map_err(|e| e.to_string())?;
    let oracle = OpenAiOracle::from_config(&cfg);
    let engine = AtlasEngine::new(Arc::new(db), Arc::new(oracle), cfg);

    match cli.command {
        Commands::Ingest { text, stance_hint } => {
            let metadata = stance_hint.map(|hint| {
                let mut m = serde_json::Map::new();
                m.insert("stance_hint".to_string(), json!(hint));
                m
            });
            let submission = engine
                .ingest_idea(&text, None, metadata)
                .await
                .map_err(|e| e.to_string())?;
            print_payload(&submission);
        }
        Commands::Topics => {
            let topics = engine.list_topics().map_err(|e| e.to_string())?;
            print_payload(&topics);
        }
        Commands::Map { max_idea_edges } => {
            let map = engine.build_map(max_idea_edges).map_err(|e| e.to_string())?;
            print_payload(&map);
        }
        Commands::Supportive { id, top_k } => {
            let id = parse_idea_id(&id)?;
            let rows = engine
                .retrieve_supportive(&id, top_k)
                .map_err(|e| e.to_string())?;
            print_payload(&rows);
        }
        Commands::Opposing { id, top_k, alpha } => {
            let id = parse_idea_id(&id)?;
            let rows = engine
                .retrieve_opposing(&id, top_k, alpha)
                .map_err(|e| e.to_string())?;
            print_payload(&rows);
        }
        Commands::Nearby { id, top_k } => {
            let id = parse_idea_id(&id)?;
            let rows = engine
                .retrieve_nearby(&id, top_k)
                .map_err(|e| e.to_string())?;
            print_payload(&rows);
        }
        Commands::Relations {
            id,
            top_k,
            candidate_pool,
        } => {
            let id = parse_idea_id(&id)?;
            let buckets = engine
                .retrieve_relations(&id, top_k, candidate_pool)
                .await
                .map_err(|e| e.to_string())?;
            print_payload(&buckets);
        }
        Commands::Recluster => {
            let report = engine.run_recluster().map_err(|e| e.to_string())?;
            print_payload(&report);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("atlas=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
