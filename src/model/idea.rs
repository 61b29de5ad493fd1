//! Idea rows and stance labels.

use super::topic::TopicId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an idea. Serializes as a plain UUID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdeaId(Uuid);

impl IdeaId {
    /// Create a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for IdeaId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IdeaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for IdeaId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for IdeaId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Ternary stance an idea takes against the topic it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Pro,
    Neutral,
    Con,
}

impl Stance {
    /// Lenient parse used for stance hints and legacy rows. Anything
    /// unrecognized is neutral.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.unwrap_or("").trim().to_lowercase().as_str() {
            "con" | "contra" | "against" | "opposed" => Stance::Con,
            "pro" | "support" | "supportive" | "in favor" => Stance::Pro,
            _ => Stance::Neutral,
        }
    }

    /// The opposing stance; neutral has none.
    pub fn opposite(self) -> Option<Stance> {
        match self {
            Stance::Pro => Some(Stance::Con),
            Stance::Con => Some(Stance::Pro),
            Stance::Neutral => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stance::Pro => "pro",
            Stance::Neutral => "neutral",
            Stance::Con => "con",
        }
    }
}

impl std::fmt::Display for Stance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A short user-submitted sentence, the unit of retrieval.
///
/// Created once at ingestion. Only `metadata` (merging) and, during
/// rebalance, `subtopic_id`/`cluster_id` are mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Idea {
    pub id: IdeaId,
    pub user_id: Option<Uuid>,
    /// Normalized display text (whitespace collapsed, terminal punctuation).
    pub text: String,
    /// Persisted duplicate key; protected by a unique index.
    pub text_key: String,
    pub embedding: Vec<f32>,
    /// Stringified leaf topic id; rewritten by the rebalance job.
    pub cluster_id: String,
    /// Level-1 anchor.
    pub topic_id: Option<TopicId>,
    /// Level-3 anchor.
    pub subtopic_id: Option<TopicId>,
    pub stance_label: Stance,
    pub stance_confidence: Option<f64>,
    /// Carries `stance_score`, `mid_topic_id`, `topic_path` and any
    /// caller-provided keys (caller keys overwrite on merge).
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Idea {
    /// Level-2 anchor, stored in metadata as a stringified topic id.
    pub fn mid_topic_id(&self) -> Option<TopicId> {
        self.metadata
            .get("mid_topic_id")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    /// The three topic names recorded at ingest, when present.
    pub fn topic_path(&self) -> Option<Vec<String>> {
        let path = self.metadata.get("topic_path")?.as_array()?;
        Some(
            path.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        )
    }
}
