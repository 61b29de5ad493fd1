//! Typed idea-to-idea edges and the cached LLM relation judgments they
//! are derived from.

use super::idea::IdeaId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Edge type. Similarity and relation edges are mirrored (both directions
/// present); hierarchy edges are derived from the topic tree and never
/// stored in the edges table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    IdeaSimilarity,
    Support,
    Oppose,
    TopicHierarchy,
}

impl EdgeType {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeType::IdeaSimilarity => "idea_similarity",
            EdgeType::Support => "support",
            EdgeType::Oppose => "oppose",
            EdgeType::TopicHierarchy => "topic_hierarchy",
        }
    }
}

impl FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idea_similarity" => Ok(EdgeType::IdeaSimilarity),
            "support" => Ok(EdgeType::Support),
            "oppose" => Ok(EdgeType::Oppose),
            "topic_hierarchy" => Ok(EdgeType::TopicHierarchy),
            _ => Err(format!("unknown edge type: {s}")),
        }
    }
}

/// A directed, weighted edge between two ideas. Primary key is (src, dst);
/// writes are upserts with last-writer-wins weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub src: IdeaId,
    pub dst: IdeaId,
    /// In [0, 1].
    pub weight: f64,
    pub edge_type: EdgeType,
    pub created_at: DateTime<Utc>,
}

/// Pairwise relation label from the LLM oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationLabel {
    Support,
    Oppose,
    Neutral,
}

impl RelationLabel {
    /// Clamp an oracle-provided label to the allowed set; anything
    /// unrecognized is neutral.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "support" => RelationLabel::Support,
            "oppose" => RelationLabel::Oppose,
            _ => RelationLabel::Neutral,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelationLabel::Support => "support",
            RelationLabel::Oppose => "oppose",
            RelationLabel::Neutral => "neutral",
        }
    }

    /// The edge type a relation materializes as; neutral produces no edge.
    pub fn edge_type(self) -> Option<EdgeType> {
        match self {
            RelationLabel::Support => Some(EdgeType::Support),
            RelationLabel::Oppose => Some(EdgeType::Oppose),
            RelationLabel::Neutral => None,
        }
    }
}

/// Directed cache of one LLM pair judgment. Symmetric semantics are not
/// assumed; each direction may be computed independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaRelation {
    pub src_id: IdeaId,
    pub dst_id: IdeaId,
    pub relation_label: RelationLabel,
    /// In [0, 1].
    pub confidence: f64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_type_round_trips() {
        for et in [
            EdgeType::IdeaSimilarity,
            EdgeType::Support,
            EdgeType::Oppose,
            EdgeType::TopicHierarchy,
        ] {
            assert_eq!(et.as_str().parse::<EdgeType>().unwrap(), et);
        }
        assert!("friendship".parse::<EdgeType>().is_err());
    }

    #[test]
    fn relation_label_clamps_to_allowed_set() {
        assert_eq!(RelationLabel::normalize("Support"), RelationLabel::Support);
        assert_eq!(RelationLabel::normalize(" OPPOSE "), RelationLabel::Oppose);
        assert_eq!(RelationLabel::normalize("maybe"), RelationLabel::Neutral);
        assert_eq!(RelationLabel::normalize(""), RelationLabel::Neutral);
    }

    #[test]
    fn neutral_relation_has_no_edge_type() {
        assert_eq!(RelationLabel::Neutral.edge_type(), None);
        assert_eq!(
            RelationLabel::Support.edge_type(),
            Some(EdgeType::Support)
        );
    }
}
