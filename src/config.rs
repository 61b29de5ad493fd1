//! Runtime configuration, sourced from environment variables.
//!
//! Every knob has a default; a malformed value logs a warning and falls
//! back to the default rather than failing startup.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Vector width of idea and centroid embeddings (`EMBEDDING_DIM`).
    pub embedding_dim: usize,
    /// Level-1 topic merge threshold (`TOPIC_SIMILARITY_THRESHOLD`).
    pub topic_similarity_threshold: f32,
    /// Level-2/level-3 merge threshold (`SUBTOPIC_SIMILARITY_THRESHOLD`).
    pub subtopic_similarity_threshold: f32,
    /// Similarity edges written per ingested idea (`TOPIC_NEIGHBOR_TOP_K`).
    pub topic_neighbor_top_k: usize,
    /// Pro/con score band that maps to neutral (`STANCE_CONFIDENCE_MARGIN`).
    pub stance_confidence_margin: f32,
    /// Opposing rerank weight on seed-similarity (`OPPOSING_ALPHA`).
    pub opposing_alpha: f32,
    /// Centroid similarity floor for related level-1 topics
    /// (`FALLBACK_SIMILARITY_FLOOR`).
    pub fallback_similarity_floor: f32,
    /// Minimum member count before a level-1 topic is considered for
    /// reclustering (`RECLUSTER_MIN_POINTS`).
    pub recluster_min_points: usize,
    /// Subtopic assignment entropy that triggers reclustering
    /// (`RECLUSTER_ENTROPY_THRESHOLD`).
    pub recluster_entropy_threshold: f64,
    /// Upper bound on similarity-edge fan-out per node (`MAX_EDGES_PER_NODE`).
    pub max_edges_per_node: usize,
    /// Candidate pool for nearby retrieval (`RETRIEVAL_CANDIDATE_POOL`).
    pub retrieval_candidate_pool: usize,

    /// Oracle wiring (`OPENAI_API_KEY`, `OPENAI_BASE_URL`,
    /// `OPENAI_LLM_MODEL`, `OPENAI_EMBED_MODEL`).
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_llm_model: String,
    pub openai_embed_model: String,

    /// Database file (`DATABASE_PATH`); `None` means the consumer decides
    /// (the CLI falls back to the platform data directory).
    pub database_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding_dim: 1536,
            topic_similarity_threshold: 0.62,
            subtopic_similarity_threshold: 0.70,
            topic_neighbor_top_k: 8,
            stance_confidence_margin: 0.04,
            opposing_alpha: 0.65,
            fallback_similarity_floor: 0.33,
            recluster_min_points: 24,
            recluster_entropy_threshold: 1.05,
            max_edges_per_node: 12,
            retrieval_candidate_pool: 24,
            openai_api_key: String::new(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_llm_model: "gpt-4o-mini".to_string(),
            openai_embed_model: "text-embedding-3-small".to_string(),
            database_path: None,
        }
    }
}

impl Config {
    /// Build a configuration from the process environment, starting from
    /// the defaults above.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.embedding_dim = env_parse("EMBEDDING_DIM", cfg.embedding_dim);
        cfg.topic_similarity_threshold =
            env_parse("TOPIC_SIMILARITY_THRESHOLD", cfg.topic_similarity_threshold);
        cfg.subtopic_similarity_threshold = env_parse(
            "SUBTOPIC_SIMILARITY_THRESHOLD",
            cfg.subtopic_similarity_threshold,
        );
        cfg.topic_neighbor_top_k = env_parse("TOPIC_NEIGHBOR_TOP_K", cfg.topic_neighbor_top_k);
        cfg.stance_confidence_margin =
            env_parse("STANCE_CONFIDENCE_MARGIN", cfg.stance_confidence_margin);
        cfg.opposing_alpha = env_parse("OPPOSING_ALPHA", cfg.opposing_alpha);
        cfg.fallback_similarity_floor =
            env_parse("FALLBACK_SIMILARITY_FLOOR", cfg.fallback_similarity_floor);
        cfg.recluster_min_points = env_parse("RECLUSTER_MIN_POINTS", cfg.recluster_min_points);
        cfg.recluster_entropy_threshold = env_parse(
            "RECLUSTER_ENTROPY_THRESHOLD",
            cfg.recluster_entropy_threshold,
        );
        cfg.max_edges_per_node = env_parse("MAX_EDGES_PER_NODE", cfg.max_edges_per_node);
        cfg.retrieval_candidate_pool =
            env_parse("RETRIEVAL_CANDIDATE_POOL", cfg.retrieval_candidate_pool);
        cfg.openai_api_key = env_string("OPENAI_API_KEY", cfg.openai_api_key);
        cfg.openai_base_url = env_string("OPENAI_BASE_URL", cfg.openai_base_url);
        cfg.openai_llm_model = env_string("OPENAI_LLM_MODEL", cfg.openai_llm_model);
        cfg.openai_embed_model = env_string("OPENAI_EMBED_MODEL", cfg.openai_embed_model);
        cfg.database_path = env::var("DATABASE_PATH").ok().map(PathBuf::from);
        cfg
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Display + Copy,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparseable config value, using default {default}");
            default
        }),
        Err(_) => default,
    }
}

fn env_string(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.embedding_dim, 1536);
        assert_eq!(cfg.topic_similarity_threshold, 0.62);
        assert_eq!(cfg.subtopic_similarity_threshold, 0.70);
        assert_eq!(cfg.topic_neighbor_top_k, 8);
        assert_eq!(cfg.stance_confidence_margin, 0.04);
        assert_eq!(cfg.opposing_alpha, 0.65);
        assert_eq!(cfg.fallback_similarity_floor, 0.33);
        assert_eq!(cfg.recluster_min_points, 24);
        assert_eq!(cfg.recluster_entropy_threshold, 1.05);
        assert_eq!(cfg.max_edges_per_node, 12);
        assert_eq!(cfg.retrieval_candidate_pool, 24);
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("ATLAS_TEST_BAD_FLOAT", "not-a-number");
        let v: f32 = env_parse("ATLAS_TEST_BAD_FLOAT", 0.5);
        assert_eq!(v, 0.5);
        std::env::remove_var("ATLAS_TEST_BAD_FLOAT");
    }
}
