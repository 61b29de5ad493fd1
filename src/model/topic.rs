//! Topic tree nodes with incrementally maintained centroids.
//!
//! The tree is modeled node-with-parent-id: no child pointers, walk up by
//! id through the store. A topic's centroid is the running mean of every
//! member idea embedding as of the last write; stance buckets are running
//! means restricted to one stance label.

use super::idea::Stance;
use crate::text::truncate_chars;
use crate::vecmath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

/// Legacy stance-bucket key still present in old rows; read as "con" and
/// rewritten on the next stance update.
const LEGACY_CON_KEY: &str = "contra";

/// Unique identifier for a topic. Serializes as a plain UUID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicId(Uuid);

impl TopicId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TopicId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TopicId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TopicId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for TopicId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Running mean over the members of one stance bucket.
///
/// Fields default so partially-written legacy buckets deserialize instead
/// of poisoning the whole topic row; an empty bucket is re-initialized on
/// the next update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StanceBucket {
    #[serde(default)]
    pub n_points: i64,
    #[serde(default)]
    pub centroid: Vec<f32>,
}

/// A node in the 3-level topic tree. Level 1 is broadest; level 3 is a
/// leaf cluster. Level-1 topics have no parent; level k > 1 parents at
/// level k-1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub level: i64,
    pub name: String,
    pub centroid: Vec<f32>,
    /// Sample count the centroid was averaged over.
    pub n_points: i64,
    pub parent_topic_id: Option<TopicId>,
    /// Keyed by stance label; may still hold the legacy "contra" key.
    pub stance_centroids: BTreeMap<String, StanceBucket>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Topic {
    /// Create a fresh topic seeded with a single member embedding.
    pub fn new(
        level: i64,
        name: &str,
        embedding: Vec<f32>,
        parent_topic_id: Option<TopicId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TopicId::new(),
            level,
            name: truncate_chars(name, 200),
            centroid: embedding,
            n_points: 1,
            parent_topic_id,
            stance_centroids: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn stance_bucket(&self, stance: Stance) -> Option<&StanceBucket> {
        self.stance_centroids.get(stance.as_str()).or_else(|| {
            if stance == Stance::Con {
                self.stance_centroids.get(LEGACY_CON_KEY)
            } else {
                None
            }
        })
    }

    /// The stance-restricted centroid, when a non-empty bucket exists.
    pub fn stance_centroid(&self, stance: Stance) -> Option<&[f32]> {
        self.stance_bucket(stance)
            .filter(|b| !b.centroid.is_empty())
            .map(|b| b.centroid.as_slice())
    }

    /// Fold one member embedding into the topic centroid.
    pub fn update_centroid(&mut self, embedding: &[f32]) {
        self.centroid = vecmath::running_mean(&self.centroid, self.n_points, embedding);
        self.n_points += 1;
        self.updated_at = Utc::now();
    }

    /// Fold one member embedding into the bucket for `stance`, creating the
    /// bucket when absent. Rewrites the legacy "contra" key to "con".
    pub fn update_stance_centroid(&mut self, embedding: &[f32], stance: Stance) {
        let bucket = match self.stance_bucket(stance) {
            Some(b) if b.n_points > 0 && !b.centroid.is_empty() => StanceBucket {
                n_points: b.n_points + 1,
                centroid: vecmath::running_mean(&b.centroid, b.n_points, embedding),
            },
            _ => StanceBucket {
                n_points: 1,
                centroid: embedding.to_vec(),
            },
        };
        self.stance_centroids
            .insert(stance.as_str().to_string(), bucket);
        if stance == Stance::Con {
            self.stance_centroids.remove(LEGACY_CON_KEY);
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic_with(embedding: Vec<f32>) -> Topic {
        Topic::new(1, "climate policy", embedding, None)
    }

    #[test]
    fn new_topic_starts_at_one_point() {
        let t = topic_with(vec![1.0, 0.0]);
        assert_eq!(t.n_points, 1);
        assert!(t.stance_centroids.is_empty());
        assert!(t.parent_topic_id.is_none());
    }

    #[test]
    fn name_is_capped_at_200_chars() {
        let long = "x".repeat(400);
        let t = Topic::new(1, &long, vec![0.0], None);
        assert_eq!(t.name.chars().count(), 200);
    }

    #[test]
    fn centroid_tracks_member_mean() {
        let mut t = topic_with(vec![1.0, 0.0]);
        t.update_centroid(&[0.0, 1.0]);
        assert_eq!(t.n_points, 2);
        assert!((t.centroid[0] - 0.5).abs() < 1e-6);
        assert!((t.centroid[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn stance_bucket_initializes_then_averages() {
        let mut t = topic_with(vec![1.0, 0.0]);
        t.update_stance_centroid(&[1.0, 0.0], Stance::Pro);
        t.update_stance_centroid(&[0.0, 1.0], Stance::Pro);
        let bucket = &t.stance_centroids["pro"];
        assert_eq!(bucket.n_points, 2);
        assert!((bucket.centroid[0] - 0.5).abs() < 1e-6);
        assert!(t.stance_centroid(Stance::Con).is_none());
    }

    #[test]
    fn legacy_contra_key_reads_as_con_and_is_rewritten() {
        let mut t = topic_with(vec![1.0, 0.0]);
        t.stance_centroids.insert(
            "contra".to_string(),
            StanceBucket {
                n_points: 2,
                centroid: vec![0.0, 1.0],
            },
        );
        assert_eq!(t.stance_centroid(Stance::Con).unwrap(), &[0.0, 1.0][..]);

        t.update_stance_centroid(&[0.0, 1.0], Stance::Con);
        assert!(!t.stance_centroids.contains_key("contra"));
        let bucket = &t.stance_centroids["con"];
        assert_eq!(bucket.n_points, 3);
    }

    #[test]
    fn empty_bucket_centroid_is_not_exposed() {
        let mut t = topic_with(vec![1.0, 0.0]);
        t.stance_centroids.insert(
            "pro".to_string(),
            StanceBucket {
                n_points: 0,
                centroid: vec![],
            },
        );
        assert!(t.stance_centroid(Stance::Pro).is_none());
        // An empty bucket is re-initialized, not averaged.
        t.update_stance_centroid(&[0.5, 0.5], Stance::Pro);
        assert_eq!(t.stance_centroids["pro"].n_points, 1);
    }
}
