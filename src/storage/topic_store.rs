//! Topic tree persistence: CRUD, scoped nearest-topic search, and the
//! three-way upsert used at ingest.
//!
//! Nearest-topic ranking loads the (small) scope population and scores
//! cosine in-process; topic counts are bounded by the tree, not the corpus.

use super::{blob_to_vec, text_to_ts, ts_to_text, vec_to_blob, StorageError, StorageResult};
use crate::model::{StanceBucket, Topic, TopicId};
use crate::vecmath;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

const TOPIC_COLUMNS: &str = "id, level, name, centroid_embedding, n_points, parent_topic_id, \
                             stance_centroids_json, created_at, updated_at";

/// Raw column values; id/json/timestamp decoding happens in `decode_topic`
/// so failures surface as `StorageError`, not mid-query panics.
struct TopicRowRaw {
    id: String,
    level: i64,
    name: String,
    centroid: Vec<u8>,
    n_points: i64,
    parent: Option<String>,
    stance_json: String,
    created_at: String,
    updated_at: String,
}

fn topic_from_row(row: &Row<'_>) -> rusqlite::Result<TopicRowRaw> {
    Ok(TopicRowRaw {
        id: row.get(0)?,
        level: row.get(1)?,
        name: row.get(2)?,
        centroid: row.get(3)?,
        n_points: row.get(4)?,
        parent: row.get(5)?,
        stance_json: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn decode_topic(raw: TopicRowRaw) -> StorageResult<Topic> {
    let id: TopicId = raw
        .id
        .parse()
        .map_err(|e| StorageError::Decode(format!("topic id {}: {e}", raw.id)))?;
    let parent_topic_id = match raw.parent {
        Some(p) => Some(
            p.parse()
                .map_err(|e| StorageError::Decode(format!("parent id {p}: {e}")))?,
        ),
        None => None,
    };
    let stance_centroids: BTreeMap<String, StanceBucket> =
        serde_json::from_str(&raw.stance_json).unwrap_or_default();
    Ok(Topic {
        id,
        level: raw.level,
        name: raw.name,
        centroid: blob_to_vec(&raw.centroid),
        n_points: raw.n_points,
        parent_topic_id,
        stance_centroids,
        created_at: text_to_ts(&raw.created_at)?,
        updated_at: text_to_ts(&raw.updated_at)?,
    })
}

/// Insert a freshly created topic.
pub(crate) fn insert_topic(conn: &Connection, topic: &Topic) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO topics (id, level, name, centroid_embedding, n_points, parent_topic_id, \
         stance_centroids_json, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            topic.id.to_string(),
            topic.level,
            topic.name,
            vec_to_blob(&topic.centroid),
            topic.n_points,
            topic.parent_topic_id.map(|p| p.to_string()),
            serde_json::to_string(&topic.stance_centroids)?,
            ts_to_text(&topic.created_at),
            ts_to_text(&topic.updated_at),
        ],
    )?;
    Ok(())
}

/// Persist centroid / stance-bucket / count changes for an existing topic.
pub(crate) fn save_topic(conn: &Connection, topic: &Topic) -> StorageResult<()> {
    conn.execute(
        "UPDATE topics SET centroid_embedding = ?2, n_points = ?3, \
         stance_centroids_json = ?4, updated_at = ?5 WHERE id = ?1",
        params![
            topic.id.to_string(),
            vec_to_blob(&topic.centroid),
            topic.n_points,
            serde_json::to_string(&topic.stance_centroids)?,
            ts_to_text(&topic.updated_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn topic_by_id(conn: &Connection, id: &TopicId) -> StorageResult<Option<Topic>> {
    let raw = conn
        .query_row(
            &format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE id = ?1"),
            params![id.to_string()],
            topic_from_row,
        )
        .optional()?;
    raw.map(decode_topic).transpose()
}

/// Case-insensitive exact-name match within (level, parent) scope.
pub(crate) fn topic_by_name(
    conn: &Connection,
    level: i64,
    name: &str,
    parent: Option<&TopicId>,
) -> StorageResult<Option<Topic>> {
    let raw = match parent {
        Some(p) => conn
            .query_row(
                &format!(
                    "SELECT {TOPIC_COLUMNS} FROM topics \
                     WHERE level = ?1 AND lower(name) = lower(?2) AND parent_topic_id = ?3 \
                     LIMIT 1"
                ),
                params![level, name, p.to_string()],
                topic_from_row,
            )
            .optional()?,
        None => conn
            .query_row(
                &format!(
                    "SELECT {TOPIC_COLUMNS} FROM topics \
                     WHERE level = ?1 AND lower(name) = lower(?2) AND parent_topic_id IS NULL \
                     LIMIT 1"
                ),
                params![level, name],
                topic_from_row,
            )
            .optional()?,
    };
    raw.map(decode_topic).transpose()
}

/// Every topic at (level, parent) scope; parent `None` means level-1 roots.
pub(crate) fn topics_in_scope(
    conn: &Connection,
    level: i64,
    parent: Option<&TopicId>,
) -> StorageResult<Vec<Topic>> {
    let sql = match parent {
        Some(_) => format!(
            "SELECT {TOPIC_COLUMNS} FROM topics WHERE level = ?1 AND parent_topic_id = ?2"
        ),
        None => format!(
            "SELECT {TOPIC_COLUMNS} FROM topics WHERE level = ?1 AND parent_topic_id IS NULL"
        ),
    };
    let mut stmt = conn.prepare(&sql)?;
    let raws: Vec<TopicRowRaw> = match parent {
        Some(p) => stmt
            .query_map(params![level, p.to_string()], topic_from_row)?
            .collect::<rusqlite::Result<_>>()?,
        None => stmt
            .query_map(params![level], topic_from_row)?
            .collect::<rusqlite::Result<_>>()?,
    };
    raws.into_iter().map(decode_topic).collect()
}

/// Nearest topic by centroid cosine within (level, parent) scope.
pub(crate) fn nearest_topic(
    conn: &Connection,
    embedding: &[f32],
    level: i64,
    parent: Option<&TopicId>,
) -> StorageResult<Option<(Topic, f32)>> {
    let scored = rank_by_centroid(topics_in_scope(conn, level, parent)?, embedding);
    Ok(scored.into_iter().next())
}

/// The `limit` level-1 topics nearest the embedding, similarity descending.
pub(crate) fn nearest_level1_topics(
    conn: &Connection,
    embedding: &[f32],
    limit: usize,
) -> StorageResult<Vec<(Topic, f32)>> {
    let mut scored = rank_by_centroid(topics_in_scope(conn, 1, None)?, embedding);
    scored.truncate(limit);
    Ok(scored)
}

fn rank_by_centroid(topics: Vec<Topic>, embedding: &[f32]) -> Vec<(Topic, f32)> {
    let mut scored: Vec<(Topic, f32)> = topics
        .into_iter()
        .map(|t| {
            let sim = vecmath::cosine(embedding, &t.centroid);
            (t, sim)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
    scored
}

/// All topics at a level (rebalance walks level 1).
pub(crate) fn topics_at_level(conn: &Connection, level: i64) -> StorageResult<Vec<Topic>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE level = ?1"))?;
    let raws: Vec<TopicRowRaw> = stmt
        .query_map(params![level], topic_from_row)?
        .collect::<rusqlite::Result<_>>()?;
    raws.into_iter().map(decode_topic).collect()
}

/// All topics, level ascending then member count descending.
pub(crate) fn list_topics(conn: &Connection) -> StorageResult<Vec<Topic>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TOPIC_COLUMNS} FROM topics ORDER BY level ASC, n_points DESC"
    ))?;
    let raws: Vec<TopicRowRaw> = stmt
        .query_map([], topic_from_row)?
        .collect::<rusqlite::Result<_>>()?;
    raws.into_iter().map(decode_topic).collect()
}

/// Three-way upsert for one hierarchy level:
/// 1. case-insensitive name match in scope,
/// 2. else nearest topic in scope at or above `threshold`,
/// 3. else create with centroid = embedding, n_points = 1.
///
/// Matches absorb the embedding into the centroid (running mean); the
/// update applies on every call, including repeat name matches.
pub(crate) fn upsert_topic_level(
    conn: &Connection,
    embedding: &[f32],
    level: i64,
    name: &str,
    parent: Option<&TopicId>,
    threshold: f32,
) -> StorageResult<Topic> {
    if let Some(mut by_name) = topic_by_name(conn, level, name, parent)? {
        by_name.update_centroid(embedding);
        save_topic(conn, &by_name)?;
        return Ok(by_name);
    }

    if let Some((mut nearest, similarity)) = nearest_topic(conn, embedding, level, parent)? {
        if similarity >= threshold {
            nearest.update_centroid(embedding);
            save_topic(conn, &nearest)?;
            return Ok(nearest);
        }
    }

    let topic = Topic::new(level, name, embedding.to_vec(), parent.copied());
    insert_topic(conn, &topic)?;
    Ok(topic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stance;
    use crate::storage::Database;

    fn unit(x: f32, y: f32) -> Vec<f32> {
        let n = (x * x + y * y).sqrt();
        vec![x / n, y / n]
    }

    #[test]
    fn insert_and_load_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock();
        let mut topic = Topic::new(1, "energy", unit(1.0, 0.0), None);
        topic.update_stance_centroid(&unit(1.0, 0.1), Stance::Pro);
        insert_topic(&conn, &topic).unwrap();

        let loaded = topic_by_id(&conn, &topic.id).unwrap().unwrap();
        assert_eq!(loaded.name, "energy");
        assert_eq!(loaded.level, 1);
        assert_eq!(loaded.n_points, 1);
        assert!(loaded.stance_centroid(Stance::Pro).is_some());
        assert_eq!(loaded.centroid, topic.centroid);
    }

    #[test]
    fn name_match_is_case_insensitive_and_scoped() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock();
        let root = Topic::new(1, "Energy", unit(1.0, 0.0), None);
        insert_topic(&conn, &root).unwrap();
        let child = Topic::new(2, "Energy", unit(1.0, 0.0), Some(root.id));
        insert_topic(&conn, &child).unwrap();

        let found = topic_by_name(&conn, 1, "eNeRgY", None).unwrap().unwrap();
        assert_eq!(found.id, root.id);
        let found = topic_by_name(&conn, 2, "energy", Some(&root.id))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, child.id);
        assert!(topic_by_name(&conn, 2, "energy", None).unwrap().is_none());
    }

    #[test]
    fn nearest_topic_filters_by_scope() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock();
        let a = Topic::new(1, "a", unit(1.0, 0.0), None);
        let b = Topic::new(1, "b", unit(0.0, 1.0), None);
        insert_topic(&conn, &a).unwrap();
        insert_topic(&conn, &b).unwrap();

        let (hit, sim) = nearest_topic(&conn, &unit(0.9, 0.1), 1, None)
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, a.id);
        assert!(sim > 0.9);
        assert!(nearest_topic(&conn, &unit(1.0, 0.0), 2, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn upsert_prefers_name_match_then_similarity_then_creates() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock();

        // nothing in scope → create
        let created =
            upsert_topic_level(&conn, &unit(1.0, 0.0), 1, "transport", None, 0.62).unwrap();
        assert_eq!(created.n_points, 1);

        // same name (different case) → reuse + centroid update
        let by_name =
            upsert_topic_level(&conn, &unit(0.9, 0.2), 1, "Transport", None, 0.62).unwrap();
        assert_eq!(by_name.id, created.id);
        assert_eq!(by_name.n_points, 2);

        // new name but similar centroid → merged into the same topic
        let by_sim =
            upsert_topic_level(&conn, &unit(0.95, 0.1), 1, "mobility", None, 0.62).unwrap();
        assert_eq!(by_sim.id, created.id);
        assert_eq!(by_sim.n_points, 3);

        // dissimilar → fresh topic
        let fresh = upsert_topic_level(&conn, &unit(-1.0, 0.0), 1, "cuisine", None, 0.62).unwrap();
        assert_ne!(fresh.id, created.id);
        assert_eq!(fresh.n_points, 1);
    }

    #[test]
    fn list_topics_orders_by_level_then_count() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock();
        let mut big = Topic::new(1, "big", unit(1.0, 0.0), None);
        big.n_points = 10;
        let small = Topic::new(1, "small", unit(0.0, 1.0), None);
        let leaf = Topic::new(3, "leaf", unit(1.0, 1.0), None);
        insert_topic(&conn, &small).unwrap();
        insert_topic(&conn, &leaf).unwrap();
        insert_topic(&conn, &big).unwrap();

        let all = list_topics(&conn).unwrap();
        let names: Vec<&str> = all.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["big", "small", "leaf"]);
    }
}
