//! Retrieval engine: supportive / opposing / nearby neighbors and
//! LLM-verified relation buckets.
//!
//! Supportive and opposing retrieval fuse three hierarchy scopes
//! leaves-first: the level-3 subtree, then siblings under the same
//! level-2, then the whole level-1 topic. Scope evaluation order is part
//! of the contract — the merge stops widening as soon as the accumulated
//! set can fill `top_k`, which biases results toward the tightest scope
//! unless that scope is thin.

use crate::api::{Neighbor, Neighbors, RelationBuckets};
use crate::engine::AtlasEngine;
use crate::error::{AtlasError, AtlasResult};
use crate::model::{Idea, IdeaId, IdeaRelation, RelationLabel, Stance, TopicId};
use crate::oracle;
use crate::storage::{idea_store, relation_store, topic_store, IdeaScope, ScoredIdea, StorageError};
use crate::text::idea_text_key;
use crate::vecmath;
use chrono::Utc;
use rusqlite::Connection;
use std::collections::HashSet;
use tracing::{debug, warn};

/// How many level-1 topics the nearby path considers related.
const RELATED_TOPIC_LIMIT: usize = 8;

/// A scored candidate on its way to the client, optionally annotated with
/// a relation judgment.
struct Ranked {
    row: ScoredIdea,
    relation: Option<(RelationLabel, f64)>,
}

impl Ranked {
    fn plain(row: ScoredIdea) -> Self {
        Self { row, relation: None }
    }
}

impl AtlasEngine {
    // ── Supportive / opposing ───────────────────────────────────────────

    /// Neighbors that share the seed's stance, fused leaves-first across
    /// the seed's hierarchy scopes.
    pub fn retrieve_supportive(&self, id: &IdeaId, top_k: usize) -> AtlasResult<Neighbors> {
        let top_k = clamp_top_k(top_k);
        let conn = self.db().lock();
        let seed = require_idea(&conn, id)?;
        let Some(seed_topic) = seed.topic_id else {
            return Ok(Neighbors {
                id: *id,
                neighbors: Vec::new(),
            });
        };

        let rows = stance_scoped_merge(&conn, &seed, seed_topic, Some(seed.stance_label), top_k)?;
        Ok(Neighbors {
            id: *id,
            neighbors: dedupe_and_trim(rows.into_iter().map(Ranked::plain), top_k),
        })
    }

    /// Neighbors of the opposite stance, re-scored toward the opposite
    /// stance centroid when one exists. A neutral seed has no opposite
    /// and yields an empty result.
    pub fn retrieve_opposing(
        &self,
        id: &IdeaId,
        top_k: usize,
        alpha: Option<f32>,
    ) -> AtlasResult<Neighbors> {
        let top_k = clamp_top_k(top_k);
        let alpha = alpha
            .unwrap_or(self.config().opposing_alpha)
            .clamp(0.0, 1.0);
        let conn = self.db().lock();
        let seed = require_idea(&conn, id)?;
        let empty = Neighbors {
            id: *id,
            neighbors: Vec::new(),
        };
        let Some(seed_topic) = seed.topic_id else {
            return Ok(empty);
        };
        let Some(opposite) = seed.stance_label.opposite() else {
            return Ok(empty);
        };

        let mut rows = stance_scoped_merge(&conn, &seed, seed_topic, Some(opposite), top_k)?;

        // Rerank toward the opposite stance centroid (leaf, else its
        // level-2 parent). Without a centroid, most-distant-first.
        let subtopic = match seed.subtopic_id {
            Some(sid) => topic_store::topic_by_id(&conn, &sid)?,
            None => None,
        };
        let parent = match subtopic.as_ref().and_then(|s| s.parent_topic_id) {
            Some(pid) => topic_store::topic_by_id(&conn, &pid)?,
            None => None,
        };
        let opposite_centroid: Option<Vec<f32>> = subtopic.as_ref().and_then(|s| {
            s.stance_centroid(opposite)
                .or_else(|| parent.as_ref().and_then(|p| p.stance_centroid(opposite)))
                .map(<[f32]>::to_vec)
        });

        match opposite_centroid {
            Some(centroid) => {
                for r in rows.iter_mut() {
                    let toward_opposite = vecmath::cosine(&r.idea.embedding, &centroid);
                    r.similarity = alpha * r.similarity + (1.0 - alpha) * toward_opposite;
                }
                rows.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
            }
            None => rows.sort_by(|a, b| a.similarity.total_cmp(&b.similarity)),
        }

        Ok(Neighbors {
            id: *id,
            neighbors: dedupe_and_trim(rows.into_iter().map(Ranked::plain), top_k),
        })
    }

    // ── Nearby ──────────────────────────────────────────────────────────

    /// Topic-agnostic neighbors within the seed's level-1 neighborhood:
    /// the seed's own topic plus nearby level-1 topics above the
    /// similarity floor.
    pub fn retrieve_nearby(&self, id: &IdeaId, top_k: usize) -> AtlasResult<Neighbors> {
        let top_k = clamp_top_k(top_k);
        let conn = self.db().lock();
        let seed = require_idea(&conn, id)?;
        let Some(seed_topic) = seed.topic_id else {
            return Ok(Neighbors {
                id: *id,
                neighbors: Vec::new(),
            });
        };

        let related = self.related_topic_ids(&conn, seed_topic, &seed.embedding)?;
        let rows = idea_store::nearest_ideas(
            &conn,
            &seed.embedding,
            &IdeaScope::level1(&related),
            &seed.id,
            None,
            std::cmp::max(top_k, self.config().retrieval_candidate_pool),
        )?;
        Ok(Neighbors {
            id: *id,
            neighbors: dedupe_and_trim(rows.into_iter().map(Ranked::plain), top_k),
        })
    }

    /// Backward-compatible alias for [`Self::retrieve_nearby`].
    pub fn get_neighbors(&self, id: &IdeaId, top_k: usize) -> AtlasResult<Neighbors> {
        self.retrieve_nearby(id, top_k)
    }

    /// The level-1 topics nearest the seed embedding whose centroid clears
    /// the similarity floor, always including the seed's own topic.
    fn related_topic_ids(
        &self,
        conn: &Connection,
        seed_topic: TopicId,
        embedding: &[f32],
    ) -> AtlasResult<Vec<TopicId>> {
        let scored = topic_store::nearest_level1_topics(conn, embedding, RELATED_TOPIC_LIMIT)?;
        let floor = self.config().fallback_similarity_floor;
        let mut out: Vec<TopicId> = scored
            .into_iter()
            .filter(|(t, sim)| t.id == seed_topic || *sim >= floor)
            .map(|(t, _)| t.id)
            .collect();
        if !out.contains(&seed_topic) {
            out.insert(0, seed_topic);
        }
        Ok(out)
    }

    // ── Relation buckets ────────────────────────────────────────────────

    /// Partition the seed's nearest same-topic candidates into supportive,
    /// opposing, and neutral buckets using cached LLM pair judgments,
    /// invoking the oracle only for uncached pairs. Support/oppose results
    /// also materialize as mirrored edges.
    pub async fn retrieve_relations(
        &self,
        id: &IdeaId,
        top_k: usize,
        candidate_pool: usize,
    ) -> AtlasResult<RelationBuckets> {
        let top_k = top_k.clamp(1, 10);
        let candidate_pool = candidate_pool.clamp(4, 120);

        // Phase 1 (locked): seed, candidate pool, cache reads.
        let (seed, candidates, cached): (Idea, Vec<ScoredIdea>, Vec<Option<IdeaRelation>>) = {
            let conn = self.db().lock();
            let seed = require_idea(&conn, id)?;
            let Some(seed_topic) = seed.topic_id else {
                return Ok(RelationBuckets {
                    id: *id,
                    supportive: Vec::new(),
                    opposing: Vec::new(),
                    neutral: Vec::new(),
                });
            };
            let l1_ids = [seed_topic];
            let candidates = idea_store::nearest_ideas(
                &conn,
                &seed.embedding,
                &IdeaScope::level1(&l1_ids),
                &seed.id,
                None,
                std::cmp::max(top_k * 6, candidate_pool),
            )?;
            let cached = candidates
                .iter()
                .map(|c| relation_store::cached_relation(&conn, &seed.id, &c.idea.id))
                .collect::<Result<_, _>>()?;
            (seed, candidates, cached)
        };

        // Phase 2 (unlocked): oracle calls for uncached pairs. A failure
        // degrades that pair to neutral/0 and is not cached.
        let topic_path = seed.topic_path().unwrap_or_default();
        let mut labeled: Vec<(ScoredIdea, RelationLabel, f64, bool)> =
            Vec::with_capacity(candidates.len());
        for (candidate, cache_hit) in candidates.into_iter().zip(cached) {
            let (label, confidence, fresh) = match cache_hit {
                Some(rel) => (rel.relation_label, rel.confidence, false),
                None => match oracle::classify_pair_relation(
                    self.oracle(),
                    &seed.text,
                    &candidate.idea.text,
                    &topic_path,
                )
                .await
                {
                    Ok((label, confidence)) => (label, confidence, true),
                    Err(e) => {
                        warn!(
                            seed = %seed.id,
                            candidate = %candidate.idea.id,
                            error = %e,
                            "relation classification failed, defaulting to neutral"
                        );
                        (RelationLabel::Neutral, 0.0, false)
                    }
                },
            };
            labeled.push((candidate, label, confidence, fresh));
        }

        // Phase 3 (locked, one transaction): cache writes + mirrored
        // edges. Edges are written only for candidates anchored at the
        // seed's level-1 topic; the cache row is written regardless.
        {
            let mut conn = self.db().lock();
            let tx = conn.transaction().map_err(StorageError::from)?;
            for (candidate, label, confidence, fresh) in &labeled {
                if *fresh {
                    relation_store::upsert_relation(
                        &tx,
                        &IdeaRelation {
                            src_id: seed.id,
                            dst_id: candidate.idea.id,
                            relation_label: *label,
                            confidence: *confidence,
                            updated_at: Utc::now(),
                        },
                    )?;
                }
                if candidate.idea.topic_id == seed.topic_id {
                    relation_store::link_relation(
                        &tx,
                        &seed.id,
                        &candidate.idea.id,
                        *label,
                        *confidence,
                        candidate.similarity as f64,
                    )?;
                }
            }
            tx.commit().map_err(StorageError::from)?;
        }

        // Phase 4: bucket, sort, dedupe, trim.
        let mut supportive = Vec::new();
        let mut opposing = Vec::new();
        let mut neutral = Vec::new();
        for (row, label, confidence, _) in labeled {
            let ranked = Ranked {
                row,
                relation: Some((label, confidence)),
            };
            match label {
                RelationLabel::Support => supportive.push(ranked),
                RelationLabel::Oppose => opposing.push(ranked),
                RelationLabel::Neutral => neutral.push(ranked),
            }
        }
        let by_confidence = |a: &Ranked, b: &Ranked| {
            let (_, ca) = a.relation.unwrap_or((RelationLabel::Neutral, 0.0));
            let (_, cb) = b.relation.unwrap_or((RelationLabel::Neutral, 0.0));
            cb.total_cmp(&ca)
                .then_with(|| b.row.similarity.total_cmp(&a.row.similarity))
        };
        supportive.sort_by(by_confidence);
        opposing.sort_by(by_confidence);
        neutral.sort_by(|a, b| b.row.similarity.total_cmp(&a.row.similarity));

        debug!(seed = %seed.id, "relation buckets assembled");
        Ok(RelationBuckets {
            id: *id,
            supportive: dedupe_and_trim(supportive, top_k),
            opposing: dedupe_and_trim(opposing, top_k),
            neutral: dedupe_and_trim(neutral, top_k),
        })
    }
}

fn clamp_top_k(top_k: usize) -> usize {
    top_k.clamp(1, 100)
}

fn require_idea(conn: &Connection, id: &IdeaId) -> AtlasResult<Idea> {
    idea_store::idea_by_id(conn, id)?.ok_or_else(|| AtlasError::NotFound(format!("idea {id}")))
}

/// Collect the seed's hierarchy scopes in leaves-first order and merge.
fn stance_scoped_merge(
    conn: &Connection,
    seed: &Idea,
    seed_topic: TopicId,
    stance: Option<Stance>,
    top_k: usize,
) -> AtlasResult<Vec<ScoredIdea>> {
    // Bounded per-scope pool: try leaves with a small pool, widen only as
    // needed.
    let per_scope = std::cmp::max(top_k * 4, 24);

    let mut scopes: Vec<Vec<ScoredIdea>> = Vec::with_capacity(3);
    if let Some(subtopic_id) = seed.subtopic_id {
        scopes.push(idea_store::nearest_ideas(
            conn,
            &seed.embedding,
            &IdeaScope::Subtree(&subtopic_id),
            &seed.id,
            stance,
            per_scope,
        )?);
    }
    let subtopic = match seed.subtopic_id {
        Some(sid) => topic_store::topic_by_id(conn, &sid)?,
        None => None,
    };
    if let Some(level2_id) = subtopic.and_then(|s| s.parent_topic_id) {
        scopes.push(idea_store::nearest_ideas(
            conn,
            &seed.embedding,
            &IdeaScope::SameLevel2(&level2_id),
            &seed.id,
            stance,
            per_scope,
        )?);
    }
    let l1_ids = [seed_topic];
    scopes.push(idea_store::nearest_ideas(
        conn,
        &seed.embedding,
        &IdeaScope::level1(&l1_ids),
        &seed.id,
        stance,
        per_scope,
    )?);

    Ok(merge_hierarchical(scopes, top_k))
}

/// Leaves-first fusion: take scopes in order, dedupe by id, sort the
/// accumulated set by similarity, and stop widening once `top_k` is
/// reachable from the scopes consumed so far.
fn merge_hierarchical(scopes: Vec<Vec<ScoredIdea>>, top_k: usize) -> Vec<ScoredIdea> {
    let mut merged: Vec<ScoredIdea> = Vec::new();
    let mut seen: HashSet<IdeaId> = HashSet::new();
    for scope in scopes {
        for row in scope {
            if seen.insert(row.idea.id) {
                merged.push(row);
            }
        }
        merged.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.idea.id.to_string().cmp(&b.idea.id.to_string()))
        });
        if merged.len() >= top_k {
            merged.truncate(top_k);
            return merged;
        }
    }
    merged.truncate(top_k);
    merged
}

/// Deduplicate by normalized text key preserving order, strip embeddings,
/// and trim to `top_k`.
fn dedupe_and_trim(rows: impl IntoIterator<Item = Ranked>, top_k: usize) -> Vec<Neighbor> {
    let mut out = Vec::with_capacity(top_k);
    let mut seen: HashSet<String> = HashSet::new();
    for ranked in rows {
        let key = idea_text_key(&ranked.row.idea.text);
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        let idea = ranked.row.idea;
        out.push(Neighbor {
            id: idea.id,
            text: idea.text,
            topic_id: idea.topic_id,
            subtopic_id: idea.subtopic_id,
            stance_label: idea.stance_label,
            similarity: ranked.row.similarity,
            created_at: idea.created_at,
            relation_label: ranked.relation.map(|(l, _)| l),
            relation_confidence: ranked.relation.map(|(_, c)| c),
        });
        if out.len() >= top_k {
            break;
        }
    }
    out
}
