//! Rebalance job: re-partition degenerate level-1 subtrees via k-means.
//!
//! A level-1 topic qualifies when it has enough members and their
//! assignment across subtopics is high-entropy (the children no longer
//! differentiate). Old level-2 children are zeroed but never deleted —
//! ideas may still reference them until reassignment lands in the same
//! transaction.

use crate::api::ReclusterReport;
use crate::engine::AtlasEngine;
use crate::error::AtlasResult;
use crate::model::{Stance, Topic};
use crate::storage::{idea_store, topic_store, StorageError};
use crate::vecmath;
use chrono::Utc;
use tracing::{debug, info};

/// Bounds on the number of clusters per re-partitioned topic.
const MIN_CLUSTERS: usize = 2;
const MAX_CLUSTERS: usize = 8;

/// Target mean cluster size when choosing k (`k ≈ √(n / 6)`).
const POINTS_PER_CLUSTER: f64 = 6.0;

impl AtlasEngine {
    /// Walk every level-1 topic and re-partition those whose subtopic
    /// assignment entropy exceeds the configured threshold. The whole job
    /// runs in one transaction; partial failure rolls everything back.
    pub fn run_recluster(&self) -> AtlasResult<ReclusterReport> {
        let cfg = self.config().clone();
        let mut conn = self.db().lock();
        let tx = conn.transaction().map_err(StorageError::from)?;

        let parents = topic_store::topics_at_level(&tx, 1)?;
        let mut refreshed = 0;
        for parent in parents {
            let ideas = idea_store::ideas_in_topic(&tx, &parent.id)?;
            if ideas.len() < cfg.recluster_min_points {
                continue;
            }
            let entropy = vecmath::assignment_entropy(ideas.iter().map(|i| i.subtopic_id));
            if entropy < cfg.recluster_entropy_threshold {
                debug!(topic = %parent.name, entropy, "assignment entropy below threshold, skipping");
                continue;
            }

            let vectors: Vec<Vec<f32>> = ideas.iter().map(|i| i.embedding.clone()).collect();
            let k = ((ideas.len() as f64 / POINTS_PER_CLUSTER).sqrt().round() as usize)
                .clamp(MIN_CLUSTERS, MAX_CLUSTERS);
            let labels = vecmath::kmeans(&vectors, k);

            // Zero the old children but keep the rows; ideas reference
            // them until reassignment below.
            for mut child in topic_store::topics_in_scope(&tx, 2, Some(&parent.id))? {
                child.n_points = 0;
                child.updated_at = Utc::now();
                topic_store::save_topic(&tx, &child)?;
            }

            let mut children: Vec<Topic> = Vec::with_capacity(k);
            for idx in 0..k {
                let members: Vec<&[f32]> = vectors
                    .iter()
                    .zip(labels.iter())
                    .filter(|(_, l)| **l == idx)
                    .map(|(v, _)| v.as_slice())
                    .collect();
                let centroid = vecmath::mean(&members).unwrap_or_else(|| vectors[0].clone());
                let mut child = Topic::new(
                    2,
                    &format!("{} / cluster {}", parent.name, idx + 1),
                    centroid,
                    Some(parent.id),
                );
                child.n_points = members.len() as i64;
                topic_store::insert_topic(&tx, &child)?;
                children.push(child);
            }

            for (idea, label) in ideas.iter().zip(labels.iter()) {
                let child = &mut children[*label];
                idea_store::update_assignment(&tx, &idea.id, &child.id, &child.id.to_string())?;
                child.update_centroid(&idea.embedding);
                if matches!(idea.stance_label, Stance::Pro | Stance::Con) {
                    child.update_stance_centroid(&idea.embedding, idea.stance_label);
                }
            }
            for child in &children {
                topic_store::save_topic(&tx, child)?;
            }

            refreshed += 1;
            info!(topic = %parent.name, members = ideas.len(), k, entropy, "re-partitioned level-1 topic");
        }

        tx.commit().map_err(StorageError::from)?;
        Ok(ReclusterReport {
            topics_refreshed: refreshed,
        })
    }
}
