//! Idea persistence and vector-indexed nearest-neighbor queries.
//!
//! Candidate pools are scope-filtered in SQL (anchor columns plus a
//! `json_extract` on the level-2 anchor), then ranked by cosine similarity
//! in-process. Ordering is similarity descending with id-ascending
//! tiebreak so results are deterministic.

use super::{
    blob_to_vec, is_constraint_violation, text_to_ts, ts_to_text, vec_to_blob, StorageError,
    StorageResult,
};
use crate::model::{Idea, IdeaId, Stance, TopicId};
use crate::vecmath;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use uuid::Uuid;

const IDEA_COLUMNS: &str = "id, user_id, text, text_key, embedding, cluster_id, topic_id, \
                            subtopic_id, stance_label, stance_confidence, metadata_json, \
                            created_at";

/// An idea with its similarity to a query embedding.
#[derive(Debug, Clone)]
pub struct ScoredIdea {
    pub idea: Idea,
    pub similarity: f32,
}

/// Scope for nearest-neighbor idea queries.
#[derive(Debug, Clone)]
pub enum IdeaScope<'a> {
    /// Ideas whose level-3 anchor equals the given leaf.
    Subtree(&'a TopicId),
    /// Ideas whose level-3 anchor parents at the given level-2 topic.
    SameLevel2(&'a TopicId),
    /// Generic scoped search; all filters are conjunctive.
    Filters {
        topic_ids: Option<&'a [TopicId]>,
        mid_topic_id: Option<&'a TopicId>,
        subtopic_id: Option<&'a TopicId>,
    },
}

impl<'a> IdeaScope<'a> {
    /// Ideas anchored at any of the given level-1 topics.
    pub fn level1(topic_ids: &'a [TopicId]) -> Self {
        IdeaScope::Filters {
            topic_ids: Some(topic_ids),
            mid_topic_id: None,
            subtopic_id: None,
        }
    }
}

struct IdeaRowRaw {
    id: String,
    user_id: Option<String>,
    text: String,
    text_key: String,
    embedding: Vec<u8>,
    cluster_id: String,
    topic_id: Option<String>,
    subtopic_id: Option<String>,
    stance_label: String,
    stance_confidence: Option<f64>,
    metadata_json: String,
    created_at: String,
}

fn idea_from_row(row: &Row<'_>) -> rusqlite::Result<IdeaRowRaw> {
    Ok(IdeaRowRaw {
        id: row.get(0)?,
        user_id: row.get(1)?,
        text: row.get(2)?,
        text_key: row.get(3)?,
        embedding: row.get(4)?,
        cluster_id: row.get(5)?,
        topic_id: row.get(6)?,
        subtopic_id: row.get(7)?,
        stance_label: row.get(8)?,
        stance_confidence: row.get(9)?,
        metadata_json: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn decode_idea(raw: IdeaRowRaw) -> StorageResult<Idea> {
    let id: IdeaId = raw
        .id
        .parse()
        .map_err(|e| StorageError::Decode(format!("idea id {}: {e}", raw.id)))?;
    let user_id = match raw.user_id {
        Some(u) => Some(
            Uuid::parse_str(&u).map_err(|e| StorageError::Decode(format!("user id {u}: {e}")))?,
        ),
        None => None,
    };
    let metadata = match serde_json::from_str::<Value>(&raw.metadata_json) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    Ok(Idea {
        id,
        user_id,
        text: raw.text,
        text_key: raw.text_key,
        embedding: blob_to_vec(&raw.embedding),
        cluster_id: raw.cluster_id,
        topic_id: raw.topic_id.and_then(|t| t.parse().ok()),
        subtopic_id: raw.subtopic_id.and_then(|t| t.parse().ok()),
        stance_label: Stance::normalize(Some(raw.stance_label.as_str())),
        stance_confidence: raw.stance_confidence,
        metadata,
        created_at: text_to_ts(&raw.created_at)?,
    })
}

/// Insert a new idea. A unique-index hit on the text key surfaces as
/// `StorageError::DuplicateKey` for the caller to resolve.
pub(crate) fn insert_idea(conn: &Connection, idea: &Idea) -> StorageResult<()> {
    let result = conn.execute(
        "INSERT INTO insights (id, user_id, text, text_key, embedding, cluster_id, topic_id, \
         subtopic_id, stance_label, stance_confidence, metadata_json, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            idea.id.to_string(),
            idea.user_id.map(|u| u.to_string()),
            idea.text,
            idea.text_key,
            vec_to_blob(&idea.embedding),
            idea.cluster_id,
            idea.topic_id.map(|t| t.to_string()),
            idea.subtopic_id.map(|t| t.to_string()),
            idea.stance_label.as_str(),
            idea.stance_confidence,
            serde_json::to_string(&idea.metadata)?,
            ts_to_text(&idea.created_at),
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_constraint_violation(&e) => {
            Err(StorageError::DuplicateKey(idea.text_key.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn idea_by_id(conn: &Connection, id: &IdeaId) -> StorageResult<Option<Idea>> {
    let raw = conn
        .query_row(
            &format!("SELECT {IDEA_COLUMNS} FROM insights WHERE id = ?1"),
            params![id.to_string()],
            idea_from_row,
        )
        .optional()?;
    raw.map(decode_idea).transpose()
}

/// Oldest idea matching the normalized duplicate key.
pub(crate) fn idea_by_text_key(conn: &Connection, key: &str) -> StorageResult<Option<Idea>> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT {IDEA_COLUMNS} FROM insights WHERE text_key = ?1 \
                 ORDER BY created_at ASC LIMIT 1"
            ),
            params![key],
            idea_from_row,
        )
        .optional()?;
    raw.map(decode_idea).transpose()
}

/// Replace an idea's metadata document.
pub(crate) fn set_metadata(
    conn: &Connection,
    id: &IdeaId,
    metadata: &Map<String, Value>,
) -> StorageResult<()> {
    conn.execute(
        "UPDATE insights SET metadata_json = ?2 WHERE id = ?1",
        params![id.to_string(), serde_json::to_string(metadata)?],
    )?;
    Ok(())
}

/// Move an idea to a new leaf (rebalance reassignment).
pub(crate) fn update_assignment(
    conn: &Connection,
    id: &IdeaId,
    subtopic_id: &TopicId,
    cluster_id: &str,
) -> StorageResult<()> {
    conn.execute(
        "UPDATE insights SET subtopic_id = ?2, cluster_id = ?3 WHERE id = ?1",
        params![id.to_string(), subtopic_id.to_string(), cluster_id],
    )?;
    Ok(())
}

/// Nearest ideas within a scope, optionally stance-filtered, excluding one
/// id, ranked by cosine similarity descending (id-ascending tiebreak) and
/// truncated to `limit`.
pub(crate) fn nearest_ideas(
    conn: &Connection,
    embedding: &[f32],
    scope: &IdeaScope<'_>,
    exclude_id: &IdeaId,
    stance: Option<Stance>,
    limit: usize,
) -> StorageResult<Vec<ScoredIdea>> {
    let mut sql = format!(
        "SELECT {} FROM insights i WHERE i.id != ?1",
        IDEA_COLUMNS
            .split(", ")
            .map(|c| format!("i.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    // Every bound value is a string (ids, stance labels), so the
    // dynamically built statement binds a plain Vec<String>.
    let mut args: Vec<String> = vec![exclude_id.to_string()];

    match scope {
        IdeaScope::Subtree(subtopic_id) => {
            args.push(subtopic_id.to_string());
            sql.push_str(&format!(" AND i.subtopic_id = ?{}", args.len()));
        }
        IdeaScope::SameLevel2(level2_id) => {
            args.push(level2_id.to_string());
            sql = sql.replace(
                "FROM insights i WHERE",
                &format!(
                    "FROM insights i JOIN topics t \
                     ON t.id = i.subtopic_id AND t.parent_topic_id = ?{} WHERE",
                    args.len()
                ),
            );
        }
        IdeaScope::Filters {
            topic_ids,
            mid_topic_id,
            subtopic_id,
        } => {
            if let Some(ids) = topic_ids {
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let placeholders: Vec<String> = ids
                    .iter()
                    .map(|t| {
                        args.push(t.to_string());
                        format!("?{}", args.len())
                    })
                    .collect();
                sql.push_str(&format!(
                    " AND i.topic_id IN ({})",
                    placeholders.join(", ")
                ));
            }
            if let Some(mid) = mid_topic_id {
                args.push(mid.to_string());
                sql.push_str(&format!(
                    " AND json_extract(i.metadata_json, '$.mid_topic_id') = ?{}",
                    args.len()
                ));
            }
            if let Some(sub) = subtopic_id {
                args.push(sub.to_string());
                sql.push_str(&format!(" AND i.subtopic_id = ?{}", args.len()));
            }
        }
    }

    if let Some(s) = stance {
        args.push(s.as_str().to_string());
        sql.push_str(&format!(" AND i.stance_label = ?{}", args.len()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let raws: Vec<IdeaRowRaw> = stmt
        .query_map(params_from_iter(args.iter()), idea_from_row)?
        .collect::<rusqlite::Result<_>>()?;

    let mut scored: Vec<ScoredIdea> = raws
        .into_iter()
        .map(decode_idea)
        .map(|r| {
            r.map(|idea| {
                let similarity = vecmath::cosine(embedding, &idea.embedding);
                ScoredIdea { idea, similarity }
            })
        })
        .collect::<StorageResult<_>>()?;
    scored.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.idea.id.to_string().cmp(&b.idea.id.to_string()))
    });
    scored.truncate(limit);
    Ok(scored)
}

/// Every idea anchored at a level-1 topic, oldest first.
pub(crate) fn ideas_in_topic(conn: &Connection, topic_id: &TopicId) -> StorageResult<Vec<Idea>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {IDEA_COLUMNS} FROM insights WHERE topic_id = ?1 ORDER BY created_at ASC, id ASC"
    ))?;
    let raws: Vec<IdeaRowRaw> = stmt
        .query_map(params![topic_id.to_string()], idea_from_row)?
        .collect::<rusqlite::Result<_>>()?;
    raws.into_iter().map(decode_idea).collect()
}

/// Most recent ideas that have both hierarchy anchors (map payload).
pub(crate) fn recent_anchored_ideas(conn: &Connection, limit: usize) -> StorageResult<Vec<Idea>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {IDEA_COLUMNS} FROM insights \
         WHERE topic_id IS NOT NULL AND subtopic_id IS NOT NULL \
         ORDER BY created_at DESC LIMIT ?1"
    ))?;
    let raws: Vec<IdeaRowRaw> = stmt
        .query_map(params![limit as i64], idea_from_row)?
        .collect::<rusqlite::Result<_>>()?;
    raws.into_iter().map(decode_idea).collect()
}
