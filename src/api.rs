//! Transport-independent response payloads.
//!
//! Transports (HTTP routers, CLIs, direct embedding) consume these shapes
//! from [`crate::AtlasEngine`] methods — they never reach into the store
//! or the oracle directly. Raw embeddings are stripped from everything a
//! client sees except the map's topic centroids, which renderers need for
//! layout.

use crate::model::{Idea, IdeaId, RelationLabel, Stance, StanceBucket, Topic, TopicId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Client-facing view of one idea (no embedding).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaNode {
    pub id: IdeaId,
    pub text: String,
    pub topic_id: Option<TopicId>,
    pub subtopic_id: Option<TopicId>,
    pub stance_label: Stance,
    pub stance_confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub metadata_json: Map<String, Value>,
}

impl From<Idea> for IdeaNode {
    fn from(idea: Idea) -> Self {
        Self {
            id: idea.id,
            text: idea.text,
            topic_id: idea.topic_id,
            subtopic_id: idea.subtopic_id,
            stance_label: idea.stance_label,
            stance_confidence: idea.stance_confidence,
            created_at: idea.created_at,
            metadata_json: idea.metadata,
        }
    }
}

/// Client-facing view of one topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSummary {
    pub id: TopicId,
    pub level: i64,
    pub name: String,
    pub n_points: i64,
    pub parent_topic_id: Option<TopicId>,
    pub stance_centroids_json: BTreeMap<String, StanceBucket>,
}

impl From<Topic> for TopicSummary {
    fn from(topic: Topic) -> Self {
        Self {
            id: topic.id,
            level: topic.level,
            name: topic.name,
            n_points: topic.n_points,
            parent_topic_id: topic.parent_topic_id,
            stance_centroids_json: topic.stance_centroids,
        }
    }
}

/// Result of one ingest: the idea plus its level-1 and level-3 anchors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaSubmission {
    pub node: IdeaNode,
    pub topic: TopicSummary,
    pub subtopic: TopicSummary,
}

impl IdeaSubmission {
    pub(crate) fn from_parts(idea: Idea, topic: Topic, subtopic: Topic) -> Self {
        Self {
            node: idea.into(),
            topic: topic.into(),
            subtopic: subtopic.into(),
        }
    }
}

/// One retrieved neighbor. Relation fields are set only by the
/// relation-bucket path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: IdeaId,
    pub text: String,
    pub topic_id: Option<TopicId>,
    pub subtopic_id: Option<TopicId>,
    pub stance_label: Stance,
    pub similarity: f32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation_label: Option<RelationLabel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation_confidence: Option<f64>,
}

/// Neighbor list for one seed idea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighbors {
    pub id: IdeaId,
    pub neighbors: Vec<Neighbor>,
}

/// Relation-bucket retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationBuckets {
    pub id: IdeaId,
    pub supportive: Vec<Neighbor>,
    pub opposing: Vec<Neighbor>,
    pub neutral: Vec<Neighbor>,
}

/// Topic node in the map payload; carries the centroid for layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapTopic {
    pub id: TopicId,
    pub level: i64,
    pub name: String,
    pub n_points: i64,
    pub parent_topic_id: Option<TopicId>,
    pub centroid_embedding: Vec<f32>,
    pub stance_centroids_json: BTreeMap<String, StanceBucket>,
}

/// Idea node in the map payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapIdea {
    pub id: IdeaId,
    pub text: String,
    pub topic_id: Option<TopicId>,
    pub subtopic_id: Option<TopicId>,
    pub stance_label: Stance,
}

/// Edge in the map payload. Topic-hierarchy edges connect topic ids;
/// idea edges connect idea ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapEdge {
    pub src_id: String,
    pub dst_id: String,
    pub weight: f64,
    pub edge_type: String,
}

/// Compact map of topics and ideas for rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapPayload {
    pub topics: Vec<MapTopic>,
    pub topic_edges: Vec<MapEdge>,
    pub ideas: Vec<MapIdea>,
    pub edges: Vec<MapEdge>,
}

/// Rebalance job report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReclusterReport {
    pub topics_refreshed: usize,
}
