//! Atlas: Topic-Aware Idea Graph Engine
//!
//! An online ingestion and retrieval engine for short textual "ideas"
//! (≤320 chars). Each idea is placed into a three-level topic hierarchy,
//! assigned a stance (pro / neutral / con) relative to the topic it joins,
//! and linked to neighbor ideas by typed graph edges.
//!
//! # Core Concepts
//!
//! - **Ideas**: short user-submitted sentences, the unit of retrieval
//! - **Topics**: a 3-level tree with incrementally maintained centroids and
//!   per-stance centroid buckets
//! - **Edges**: mirrored idea-to-idea links (similarity, support, oppose)
//!   plus derived parent→child hierarchy links
//!
//! # Example
//!
//! ```no_run
//! use atlas::{AtlasEngine, Config, Database, MockOracle};
//! use std::sync::Arc;
//!
//! let db = Database::open_in_memory().unwrap();
//! let engine = AtlasEngine::new(Arc::new(db), Arc::new(MockOracle::new()), Config::default());
//! // Engine is ready for use
//! ```

pub mod api;
pub mod config;
mod engine;
mod error;
pub mod model;
pub mod oracle;
mod rebalance;
mod retrieval;
pub mod storage;
mod text;
pub mod vecmath;

pub use api::{
    IdeaNode, IdeaSubmission, MapEdge, MapPayload, Neighbor, Neighbors, ReclusterReport,
    RelationBuckets, TopicSummary,
};
pub use config::Config;
pub use engine::AtlasEngine;
pub use error::{AtlasError, AtlasResult};
pub use model::{
    Edge, EdgeType, Idea, IdeaId, IdeaRelation, RelationLabel, Stance, StanceBucket, Topic,
    TopicId,
};
pub use oracle::{MockOracle, OpenAiOracle, Oracle, OracleError};
pub use storage::{Database, StorageError, StorageResult};
pub use text::{idea_text_key, normalize_idea_text};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
