//! Embedding & LLM oracle client.
//!
//! Defines the capability boundary the engine depends on and the typed
//! classifier wrappers built on top of it. Two implementations:
//! - `OpenAiOracle`: OpenAI-compatible HTTP endpoints (production)
//! - `MockOracle`: preconfigured deterministic responses (testing)
//!
//! The engine calls the oracle for:
//! - text embeddings (raw normalized text, unprefixed)
//! - topic hierarchy classification at ingest
//! - pairwise relation classification for relation-bucket retrieval

mod mock;
mod openai;

pub use mock::MockOracle;
pub use openai::OpenAiOracle;

use crate::model::RelationLabel;
use crate::text::truncate_chars;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Router acceptance floor: below this confidence the parent-topic router
/// always answers NEW.
const ROUTER_MIN_CONFIDENCE: f64 = 0.45;

/// Errors from oracle operations.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle not configured: {0}")]
    NotConfigured(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Capability boundary for embedding and JSON-shaped classification.
///
/// Abstracts over transport so the engine doesn't depend on how the
/// oracle is reached; an in-process fake satisfies it for tests.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Produce a fixed-dimension dense vector for the given text. The
    /// caller passes normalized text only, unprefixed; the engine treats
    /// the vector as opaque.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError>;

    /// Answer a JSON-shaped classifier prompt. Implementations must return
    /// a JSON object.
    async fn classify_json(&self, system: &str, user: &str) -> Result<Value, OracleError>;
}

/// Three-level topic assignment from the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicHierarchy {
    pub level1: String,
    pub level2: String,
    pub level3: String,
}

/// A candidate existing topic offered to the parent router.
#[derive(Debug, Clone)]
pub struct TopicCandidate {
    pub name: String,
    pub similarity: f32,
}

/// Outcome of the parent-topic router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentChoice {
    /// Reuse the named existing topic.
    Existing(String),
    /// No candidate is clearly the same underlying issue.
    New,
}

const TOPIC_HIERARCHY_SYSTEM: &str = "You are a topic taxonomist for short ideas. \
Assign a three-level topic hierarchy: level1 is the broadest domain, level2 a \
subdomain, level3 a specific issue cluster. Topic names must be stance-free: \
an idea supporting an issue and an idea opposing it get the same topic names. \
Output JSON only with keys: level1, level2, level3.";

const PAIR_RELATION_SYSTEM: &str = "You classify relation between two short ideas. \
Return JSON only with keys relation_label and confidence. \
relation_label must be one of: support, oppose, neutral.";

const PARENT_ROUTER_SYSTEM: &str = "You are a strict topic router. Choose one \
existing topic name if it is clearly the same underlying issue. Otherwise \
return NEW. Output JSON only with keys: selected_topic_name, confidence.";

/// Classify an idea into three topic-hierarchy names.
///
/// Empty fields fall back to the prior level's name ("general" at level 1);
/// names are trimmed and capped at 80/80/120 chars.
pub async fn classify_topic_hierarchy(
    oracle: &dyn Oracle,
    text: &str,
) -> Result<TopicHierarchy, OracleError> {
    let user = format!(
        "Idea: {text}\n\n\
         Instructions:\n\
         - Reuse stable level2/level3 names.\n\
         - Do NOT include sentiment in topic names.\n\
         - Same topic even if stance differs.\n\n\
         Return JSON only."
    );
    let result = oracle.classify_json(TOPIC_HIERARCHY_SYSTEM, &user).await?;

    let field = |key: &str| -> String {
        result
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string()
    };
    let mut level1 = field("level1");
    if level1.is_empty() {
        level1 = "general".to_string();
    }
    let mut level2 = field("level2");
    if level2.is_empty() {
        level2 = level1.clone();
    }
    let mut level3 = field("level3");
    if level3.is_empty() {
        level3 = level2.clone();
    }
    Ok(TopicHierarchy {
        level1: truncate_chars(&level1, 80),
        level2: truncate_chars(&level2, 80),
        level3: truncate_chars(&level3, 120),
    })
}

/// Classify whether `candidate` supports, opposes, or is neutral to `seed`.
///
/// The label is clamped to the allowed set and confidence to [0, 1].
pub async fn classify_pair_relation(
    oracle: &dyn Oracle,
    seed_text: &str,
    candidate_text: &str,
    topic_path: &[String],
) -> Result<(RelationLabel, f64), OracleError> {
    let mut user = format!("Seed idea:\n{seed_text}\n\nCandidate idea:\n{candidate_text}\n\n");
    if !topic_path.is_empty() {
        user.push_str(&format!("Topic context: {}\n\n", topic_path.join(" / ")));
    }
    user.push_str("Classify whether candidate supports, opposes, or is neutral to the seed idea.");

    let result = oracle.classify_json(PAIR_RELATION_SYSTEM, &user).await?;
    let label = RelationLabel::normalize(
        result
            .get("relation_label")
            .and_then(Value::as_str)
            .unwrap_or("neutral"),
    );
    let confidence = result
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    Ok((label, confidence))
}

/// Ask the router whether any existing candidate topic is the same
/// underlying issue as the idea. Answers `New` without an oracle call when
/// there are no candidates, and on low confidence or an out-of-set name.
pub async fn select_parent_topic(
    oracle: &dyn Oracle,
    text: &str,
    topic_label: &str,
    candidates: &[TopicCandidate],
) -> Result<ParentChoice, OracleError> {
    if candidates.is_empty() {
        return Ok(ParentChoice::New);
    }
    let lines: Vec<String> = candidates
        .iter()
        .map(|c| format!("- {} (sim={:.3})", c.name, c.similarity))
        .collect();
    let user = format!(
        "Idea: {text}\n\
         Suggested topic_label: {topic_label}\n\
         Candidate existing topics:\n{}\n\n\
         Return selected_topic_name as exact candidate name or NEW.",
        lines.join("\n")
    );
    let result = oracle.classify_json(PARENT_ROUTER_SYSTEM, &user).await?;
    let selected = result
        .get("selected_topic_name")
        .and_then(Value::as_str)
        .unwrap_or("NEW")
        .trim()
        .to_string();
    let confidence = result
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    if confidence < ROUTER_MIN_CONFIDENCE {
        return Ok(ParentChoice::New);
    }
    if candidates.iter().any(|c| c.name == selected) {
        Ok(ParentChoice::Existing(selected))
    } else {
        Ok(ParentChoice::New)
    }
}

/// Parse an LLM response as a JSON object, tolerating prose around the
/// first `{...}` blob.
pub fn parse_json_object(raw: &str) -> Result<Value, OracleError> {
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(raw) {
        return Ok(v);
    }
    let start = raw
        .find('{')
        .ok_or_else(|| OracleError::InvalidPayload("model did not return JSON".to_string()))?;
    let end = raw
        .rfind('}')
        .filter(|e| *e > start)
        .ok_or_else(|| OracleError::InvalidPayload("model did not return JSON".to_string()))?;
    serde_json::from_str(&raw[start..=end])
        .map_err(|e| OracleError::InvalidPayload(format!("malformed JSON object: {e}")))
}
