//! AtlasEngine — the consumer-facing facade and the ingest orchestrator.
//!
//! One ingest request is a single synchronous sequence: normalize →
//! duplicate check → embed → hierarchy classify → assign → persist. All
//! persistent mutation happens inside one transaction; the connection lock
//! is never held across an oracle call. Concurrency is across requests,
//! never within one.

use crate::api::{IdeaSubmission, MapEdge, MapIdea, MapPayload, MapTopic, TopicSummary};
use crate::config::Config;
use crate::error::{AtlasError, AtlasResult};
use crate::model::{Idea, IdeaId, Stance, Topic};
use crate::oracle::{self, Oracle, TopicHierarchy};
use crate::storage::{idea_store, relation_store, topic_store, Database, IdeaScope, StorageError};
use crate::text::{idea_text_key, normalize_idea_text};
use crate::vecmath;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const MIN_IDEA_CHARS: usize = 5;
const MAX_IDEA_CHARS: usize = 320;

/// Recent-idea window in the map payload.
const MAP_RECENT_IDEAS: usize = 1000;

/// The main engine: topic assignment, stance classification, retrieval,
/// and the rebalance job, over a shared store and oracle.
pub struct AtlasEngine {
    db: Arc<Database>,
    oracle: Arc<dyn Oracle>,
    cfg: Config,
}

impl AtlasEngine {
    pub fn new(db: Arc<Database>, oracle: Arc<dyn Oracle>, cfg: Config) -> Self {
        Self { db, oracle, cfg }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    pub(crate) fn oracle(&self) -> &dyn Oracle {
        self.oracle.as_ref()
    }

    // ── Ingest ──────────────────────────────────────────────────────────

    /// Ingest one idea: place it in the topic hierarchy, assign a stance,
    /// persist it, and link it to its nearest same-topic neighbors.
    ///
    /// Re-submitting the same (normalized) text is idempotent: the
    /// existing idea is returned, incoming metadata keys are merged over
    /// the stored ones, and no oracle call is made.
    pub async fn ingest_idea(
        &self,
        text: &str,
        user_id: Option<Uuid>,
        metadata: Option<Map<String, Value>>,
    ) -> AtlasResult<IdeaSubmission> {
        let text_value = normalize_idea_text(text);
        let char_count = text_value.chars().count();
        if !(MIN_IDEA_CHARS..=MAX_IDEA_CHARS).contains(&char_count) {
            return Err(AtlasError::InvalidLength(char_count));
        }
        let key = idea_text_key(&text_value);

        // Duplicate fast path: no embedding, no oracle.
        if let Some(existing) = self.resolve_duplicate(&key, metadata.as_ref())? {
            debug!(%key, "duplicate idea, returning existing row");
            return Ok(existing);
        }

        // Suspension points. Raw normalized text only, unprefixed; a
        // failure here is fatal to the request (no partial state exists).
        let embedding = self.oracle.embed(&text_value).await?;
        let hierarchy = oracle::classify_topic_hierarchy(self.oracle.as_ref(), &text_value).await?;

        match self.persist_idea(&text_value, &key, user_id, &metadata, &embedding, &hierarchy) {
            Ok(submission) => Ok(submission),
            Err(AtlasError::Storage(StorageError::DuplicateKey(_))) => {
                // A concurrent ingest of the same text won the race. Our
                // transaction rolled back; answer with the surviving row.
                debug!(%key, "lost duplicate race, re-reading survivor");
                self.resolve_duplicate(&key, metadata.as_ref())?.ok_or_else(|| {
                    AtlasError::Conflict(format!("surviving row for key '{key}' has no hierarchy"))
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Look up an idea by the normalized key; on a hit, merge metadata and
    /// return it with its anchors. Returns `None` when no row exists or
    /// the row predates hierarchy assignment (that row is routed anew).
    fn resolve_duplicate(
        &self,
        key: &str,
        metadata: Option<&Map<String, Value>>,
    ) -> AtlasResult<Option<IdeaSubmission>> {
        let mut conn = self.db.lock();
        let tx = conn.transaction().map_err(StorageError::from)?;

        let Some(mut existing) = idea_store::idea_by_text_key(&tx, key)? else {
            return Ok(None);
        };
        if let Some(incoming) = metadata {
            if !incoming.is_empty() {
                for (k, v) in incoming {
                    existing.metadata.insert(k.clone(), v.clone());
                }
                idea_store::set_metadata(&tx, &existing.id, &existing.metadata)?;
            }
        }

        let mut parent = match existing.topic_id {
            Some(tid) => topic_store::topic_by_id(&tx, &tid)?,
            None => None,
        };
        let subtopic = match existing.subtopic_id {
            Some(tid) => topic_store::topic_by_id(&tx, &tid)?,
            None => None,
        };
        if parent.is_none() {
            if let Some(pid) = subtopic.as_ref().and_then(|s| s.parent_topic_id) {
                parent = topic_store::topic_by_id(&tx, &pid)?;
            }
        }

        match (parent, subtopic) {
            (Some(p), Some(s)) => {
                tx.commit().map_err(StorageError::from)?;
                Ok(Some(IdeaSubmission::from_parts(existing, p, s)))
            }
            _ => {
                // Legacy row without hierarchy; keep the metadata merge
                // and let the caller route it through the full pipeline.
                tx.commit().map_err(StorageError::from)?;
                Ok(None)
            }
        }
    }

    /// One transaction: three-level topic upsert, stance assignment,
    /// insert, neighbor similarity edges. Returns `DuplicateKey` (after
    /// rollback) when a concurrent ingest inserted the same key first.
    fn persist_idea(
        &self,
        text_value: &str,
        key: &str,
        user_id: Option<Uuid>,
        metadata: &Option<Map<String, Value>>,
        embedding: &[f32],
        hierarchy: &TopicHierarchy,
    ) -> AtlasResult<IdeaSubmission> {
        let mut conn = self.db.lock();
        let tx = conn.transaction().map_err(StorageError::from)?;

        let level1 = topic_store::upsert_topic_level(
            &tx,
            embedding,
            1,
            &hierarchy.level1,
            None,
            self.cfg.topic_similarity_threshold,
        )?;
        let level2 = topic_store::upsert_topic_level(
            &tx,
            embedding,
            2,
            &hierarchy.level2,
            Some(&level1.id),
            self.cfg.subtopic_similarity_threshold,
        )?;
        let mut level3 = topic_store::upsert_topic_level(
            &tx,
            embedding,
            3,
            &hierarchy.level3,
            Some(&level2.id),
            self.cfg.subtopic_similarity_threshold,
        )?;

        let hint = metadata
            .as_ref()
            .and_then(|m| m.get("stance_hint"))
            .and_then(Value::as_str);
        let (stance, stance_score) = assign_stance(
            embedding,
            &level3,
            Some(&level2),
            hint,
            self.cfg.stance_confidence_margin,
        );
        level3.update_stance_centroid(embedding, stance);
        topic_store::save_topic(&tx, &level3)?;

        let mut meta = Map::new();
        meta.insert("stance_score".to_string(), json!(stance_score));
        meta.insert("mid_topic_id".to_string(), json!(level2.id.to_string()));
        meta.insert(
            "topic_path".to_string(),
            json!([&level1.name, &level2.name, &level3.name]),
        );
        meta.insert("level1".to_string(), json!(hierarchy.level1));
        meta.insert("level2".to_string(), json!(hierarchy.level2));
        meta.insert("level3".to_string(), json!(hierarchy.level3));
        if let Some(incoming) = metadata {
            for (k, v) in incoming {
                meta.insert(k.clone(), v.clone());
            }
        }

        let idea = Idea {
            id: IdeaId::new(),
            user_id,
            text: text_value.to_string(),
            text_key: key.to_string(),
            embedding: embedding.to_vec(),
            cluster_id: level3.id.to_string(),
            topic_id: Some(level1.id),
            subtopic_id: Some(level3.id),
            stance_label: stance,
            stance_confidence: Some(stance_score.abs() as f64),
            metadata: meta,
            created_at: Utc::now(),
        };
        idea_store::insert_idea(&tx, &idea)?;

        // Neighbor edges, leaves-first: L3 subtree, then L1 + mid, then L1.
        let needed = std::cmp::max(6, self.cfg.topic_neighbor_top_k);
        let l1_ids = [level1.id];
        let scopes = [
            IdeaScope::Filters {
                topic_ids: None,
                mid_topic_id: None,
                subtopic_id: Some(&level3.id),
            },
            IdeaScope::Filters {
                topic_ids: Some(&l1_ids),
                mid_topic_id: Some(&level2.id),
                subtopic_id: None,
            },
            IdeaScope::level1(&l1_ids),
        ];
        let mut merged = Vec::new();
        let mut seen: HashSet<IdeaId> = HashSet::new();
        for scope in &scopes {
            let rows = idea_store::nearest_ideas(&tx, embedding, scope, &idea.id, None, needed)?;
            for row in rows {
                if seen.insert(row.idea.id) {
                    merged.push(row);
                }
            }
            if merged.len() >= needed {
                break;
            }
        }
        merged.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.idea.id.to_string().cmp(&b.idea.id.to_string()))
        });
        merged.truncate(
            self.cfg
                .topic_neighbor_top_k
                .min(self.cfg.max_edges_per_node),
        );
        let neighbors: Vec<(IdeaId, f32)> =
            merged.iter().map(|s| (s.idea.id, s.similarity)).collect();
        relation_store::link_similarity(&tx, &idea.id, &neighbors)?;

        tx.commit().map_err(StorageError::from)?;
        info!(
            idea = %idea.id,
            topic = %level1.name,
            subtopic = %level3.name,
            stance = %stance,
            neighbors = neighbors.len(),
            "idea ingested"
        );
        Ok(IdeaSubmission::from_parts(idea, level1, level3))
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Load one idea or fail with `NotFound`.
    pub fn get_idea(&self, id: &IdeaId) -> AtlasResult<Idea> {
        let conn = self.db.lock();
        idea_store::idea_by_id(&conn, id)?
            .ok_or_else(|| AtlasError::NotFound(format!("idea {id}")))
    }

    /// All topics with counts, parents, and stance buckets.
    pub fn list_topics(&self) -> AtlasResult<Vec<TopicSummary>> {
        let conn = self.db.lock();
        Ok(topic_store::list_topics(&conn)?
            .into_iter()
            .map(TopicSummary::from)
            .collect())
    }

    /// Compact map: all topics, parent→child hierarchy edges, the most
    /// recent 1,000 anchored ideas, and the top-weighted idea edges.
    pub fn build_map(&self, max_idea_edges: usize) -> AtlasResult<MapPayload> {
        let max_idea_edges = max_idea_edges.clamp(100, 10_000);
        let conn = self.db.lock();

        let topics = topic_store::list_topics(&conn)?;
        let topic_edges = topics
            .iter()
            .filter_map(|t| {
                t.parent_topic_id.map(|p| MapEdge {
                    src_id: p.to_string(),
                    dst_id: t.id.to_string(),
                    weight: 1.0,
                    edge_type: "topic_hierarchy".to_string(),
                })
            })
            .collect();
        let ideas = idea_store::recent_anchored_ideas(&conn, MAP_RECENT_IDEAS)?
            .into_iter()
            .map(|i| MapIdea {
                id: i.id,
                text: i.text,
                topic_id: i.topic_id,
                subtopic_id: i.subtopic_id,
                stance_label: i.stance_label,
            })
            .collect();
        let edges = relation_store::top_edges(&conn, max_idea_edges)?
            .into_iter()
            .map(|e| MapEdge {
                src_id: e.src.to_string(),
                dst_id: e.dst.to_string(),
                weight: e.weight,
                edge_type: e.edge_type.as_str().to_string(),
            })
            .collect();

        Ok(MapPayload {
            topics: topics
                .into_iter()
                .map(|t| MapTopic {
                    id: t.id,
                    level: t.level,
                    name: t.name,
                    n_points: t.n_points,
                    parent_topic_id: t.parent_topic_id,
                    centroid_embedding: t.centroid,
                    stance_centroids_json: t.stance_centroids,
                })
                .collect(),
            topic_edges,
            ideas,
            edges,
        })
    }
}

/// Centroid-based stance assignment with cold-start fallback.
///
/// Pro/con centroids come from the leaf topic, falling back per-centroid to
/// its level-2 parent. With both present the score is `cos(x, pro) −
/// cos(x, con)`, mapped to neutral inside the margin band. With either
/// missing, the LLM-provided hint decides and the score is 0.
fn assign_stance(
    embedding: &[f32],
    topic: &Topic,
    parent: Option<&Topic>,
    hint: Option<&str>,
    margin: f32,
) -> (Stance, f32) {
    let pro = topic
        .stance_centroid(Stance::Pro)
        .or_else(|| parent.and_then(|p| p.stance_centroid(Stance::Pro)));
    let con = topic
        .stance_centroid(Stance::Con)
        .or_else(|| parent.and_then(|p| p.stance_centroid(Stance::Con)));

    if let (Some(pro), Some(con)) = (pro, con) {
        let score = vecmath::cosine(embedding, pro) - vecmath::cosine(embedding, con);
        if score.abs() < margin {
            return (Stance::Neutral, score);
        }
        return if score > 0.0 {
            (Stance::Pro, score)
        } else {
            (Stance::Con, score)
        };
    }
    (Stance::normalize(hint), 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(x: f32, y: f32) -> Vec<f32> {
        let n = (x * x + y * y).sqrt();
        vec![x / n, y / n]
    }

    fn topic_with_buckets(pro: Option<Vec<f32>>, con: Option<Vec<f32>>) -> Topic {
        let mut t = Topic::new(3, "leaf", unit(1.0, 1.0), None);
        if let Some(p) = pro {
            t.update_stance_centroid(&p, Stance::Pro);
        }
        if let Some(c) = con {
            t.update_stance_centroid(&c, Stance::Con);
        }
        t
    }

    #[test]
    fn stance_from_centroids_picks_the_closer_side() {
        let t = topic_with_buckets(Some(unit(1.0, 0.0)), Some(unit(0.0, 1.0)));
        let (stance, score) = assign_stance(&unit(0.95, 0.05), &t, None, None, 0.04);
        assert_eq!(stance, Stance::Pro);
        assert!(score > 0.0);

        let (stance, score) = assign_stance(&unit(0.05, 0.95), &t, None, None, 0.04);
        assert_eq!(stance, Stance::Con);
        assert!(score < 0.0);
    }

    #[test]
    fn stance_is_neutral_inside_the_margin_band() {
        // Symmetric buckets: an equidistant embedding scores |p − c| = 0.
        let t = topic_with_buckets(Some(unit(1.0, 0.0)), Some(unit(0.0, 1.0)));
        let (stance, score) = assign_stance(&unit(1.0, 1.0), &t, None, None, 0.04);
        assert_eq!(stance, Stance::Neutral);
        assert!(score.abs() < 0.04);
    }

    #[test]
    fn stance_falls_back_to_hint_when_a_centroid_is_missing() {
        let t = topic_with_buckets(Some(unit(1.0, 0.0)), None);
        let (stance, score) = assign_stance(&unit(1.0, 0.0), &t, None, Some("con"), 0.04);
        assert_eq!(stance, Stance::Con);
        assert_eq!(score, 0.0);

        let (stance, _) = assign_stance(&unit(1.0, 0.0), &t, None, None, 0.04);
        assert_eq!(stance, Stance::Neutral);
    }

    #[test]
    fn stance_centroids_fall_back_to_parent_per_side() {
        // Leaf has only pro; parent supplies con.
        let leaf = topic_with_buckets(Some(unit(1.0, 0.0)), None);
        let parent = topic_with_buckets(None, Some(unit(0.0, 1.0)));
        let (stance, _) = assign_stance(&unit(0.05, 0.95), &leaf, Some(&parent), None, 0.04);
        assert_eq!(stance, Stance::Con);
    }
}
