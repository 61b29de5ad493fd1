//! Relation cache and typed edge writes.
//!
//! Edges are a denormalized view of cached LLM judgments joined with
//! cosine similarity. All writes are upserts on (src, dst) with
//! last-writer-wins weight; mirrored pairs are written back-to-back inside
//! the caller's transaction so the mirror is atomic from its perspective.

use super::{text_to_ts, ts_to_text, StorageResult};
use crate::model::{Edge, EdgeType, IdeaId, IdeaRelation, RelationLabel};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Similarity edges never drop to zero weight; a floor keeps renderers
/// from culling them.
const MIN_SIMILARITY_WEIGHT: f64 = 0.01;

/// Blend of oracle confidence and cosine similarity for relation edges.
const RELATION_CONFIDENCE_WEIGHT: f64 = 0.55;

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, f64, String, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn decode_edge(raw: (String, String, f64, String, String)) -> StorageResult<Edge> {
    let (src, dst, weight, edge_type, created_at) = raw;
    Ok(Edge {
        src: src
            .parse()
            .map_err(|e| super::StorageError::Decode(format!("edge src {src}: {e}")))?,
        dst: dst
            .parse()
            .map_err(|e| super::StorageError::Decode(format!("edge dst {dst}: {e}")))?,
        weight,
        edge_type: edge_type
            .parse()
            .map_err(super::StorageError::Decode)?,
        created_at: text_to_ts(&created_at)?,
    })
}

/// Upsert one directed edge; weight and type are last-writer-wins.
pub(crate) fn upsert_edge(
    conn: &Connection,
    src: &IdeaId,
    dst: &IdeaId,
    weight: f64,
    edge_type: EdgeType,
) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO edges (src, dst, weight, edge_type, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT (src, dst) DO UPDATE SET weight = excluded.weight, \
         edge_type = excluded.edge_type",
        params![
            src.to_string(),
            dst.to_string(),
            weight,
            edge_type.as_str(),
            ts_to_text(&Utc::now()),
        ],
    )?;
    Ok(())
}

/// Write mirrored similarity edges to each neighbor with
/// `weight = max(similarity, 0.01)`. No similarity threshold applies —
/// hierarchy scoping already filtered the candidates.
pub(crate) fn link_similarity(
    conn: &Connection,
    src: &IdeaId,
    neighbors: &[(IdeaId, f32)],
) -> StorageResult<()> {
    for (dst, similarity) in neighbors {
        let weight = (*similarity as f64).max(MIN_SIMILARITY_WEIGHT);
        upsert_edge(conn, src, dst, weight, EdgeType::IdeaSimilarity)?;
        upsert_edge(conn, dst, src, weight, EdgeType::IdeaSimilarity)?;
    }
    Ok(())
}

/// Write mirrored support/oppose edges for a classified pair. Neutral
/// writes nothing. Weight blends confidence with cosine so edge thickness
/// still reflects semantic closeness.
pub(crate) fn link_relation(
    conn: &Connection,
    src: &IdeaId,
    dst: &IdeaId,
    label: RelationLabel,
    confidence: f64,
    similarity: f64,
) -> StorageResult<()> {
    let Some(edge_type) = label.edge_type() else {
        return Ok(());
    };
    let weight = (RELATION_CONFIDENCE_WEIGHT * confidence
        + (1.0 - RELATION_CONFIDENCE_WEIGHT) * similarity)
        .clamp(0.0, 1.0);
    upsert_edge(conn, src, dst, weight, edge_type)?;
    upsert_edge(conn, dst, src, weight, edge_type)?;
    Ok(())
}

/// Top-weighted edges for the map payload.
pub(crate) fn top_edges(conn: &Connection, limit: usize) -> StorageResult<Vec<Edge>> {
    let mut stmt = conn.prepare(
        "SELECT src, dst, weight, edge_type, created_at FROM edges \
         ORDER BY weight DESC LIMIT ?1",
    )?;
    let raws: Vec<_> = stmt
        .query_map(params![limit as i64], edge_from_row)?
        .collect::<rusqlite::Result<_>>()?;
    raws.into_iter().map(decode_edge).collect()
}

/// Outgoing edges for one idea, heaviest first.
pub fn edges_from(conn: &Connection, src: &IdeaId) -> StorageResult<Vec<Edge>> {
    let mut stmt = conn.prepare(
        "SELECT src, dst, weight, edge_type, created_at FROM edges \
         WHERE src = ?1 ORDER BY weight DESC",
    )?;
    let raws: Vec<_> = stmt
        .query_map(params![src.to_string()], edge_from_row)?
        .collect::<rusqlite::Result<_>>()?;
    raws.into_iter().map(decode_edge).collect()
}

/// Read one direction of the relation cache.
pub(crate) fn cached_relation(
    conn: &Connection,
    src: &IdeaId,
    dst: &IdeaId,
) -> StorageResult<Option<IdeaRelation>> {
    let raw = conn
        .query_row(
            "SELECT relation_label, confidence, updated_at FROM idea_relations \
             WHERE src_id = ?1 AND dst_id = ?2",
            params![src.to_string(), dst.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;
    let Some((label, confidence, updated_at)) = raw else {
        return Ok(None);
    };
    Ok(Some(IdeaRelation {
        src_id: *src,
        dst_id: *dst,
        relation_label: RelationLabel::normalize(&label),
        confidence,
        updated_at: text_to_ts(&updated_at)?,
    }))
}

/// Upsert one direction of the relation cache (last writer wins).
pub(crate) fn upsert_relation(conn: &Connection, relation: &IdeaRelation) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO idea_relations (src_id, dst_id, relation_label, confidence, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT (src_id, dst_id) DO UPDATE SET \
         relation_label = excluded.relation_label, \
         confidence = excluded.confidence, \
         updated_at = excluded.updated_at",
        params![
            relation.src_id.to_string(),
            relation.dst_id.to_string(),
            relation.relation_label.as_str(),
            relation.confidence,
            ts_to_text(&relation.updated_at),
        ],
    )?;
    Ok(())
}
