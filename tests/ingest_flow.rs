//! Ingestion pipeline scenarios: normalization bounds, duplicate
//! idempotence, cold-start stance, and metadata merging.

mod common;

use atlas::{AtlasError, MockOracle, Stance};
use common::{engine_with, stance_hint, unit};
use serde_json::json;

fn basic_oracle() -> MockOracle {
    MockOracle::new()
        .with_hierarchy_response(json!({
            "level1": "work culture",
            "level2": "remote work",
            "level3": "remote work productivity"
        }))
        .with_embedding(
            "Remote work increases productivity.",
            unit(&[(0, 0.9), (1, 0.4)]),
        )
}

#[tokio::test]
async fn rejects_too_short_and_too_long_text() {
    let (engine, oracle) = engine_with(basic_oracle());

    let err = engine.ingest_idea("hi", None, None).await.unwrap_err();
    assert!(matches!(err, AtlasError::InvalidLength(_)));
    assert!(err.to_string().starts_with("INVALID_LENGTH"));

    let long = "word ".repeat(100);
    let err = engine.ingest_idea(&long, None, None).await.unwrap_err();
    assert!(matches!(err, AtlasError::InvalidLength(_)));

    // Validation happens before any oracle call.
    assert_eq!(oracle.embed_calls(), 0);
    assert_eq!(oracle.chat_calls(), 0);
}

#[tokio::test]
async fn ingest_assigns_hierarchy_anchors_and_normalizes_text() {
    let (engine, _) = engine_with(basic_oracle());
    let submission = engine
        .ingest_idea("Remote   work increases\tproductivity", None, None)
        .await
        .unwrap();

    assert_eq!(submission.node.text, "Remote work increases productivity.");
    assert_eq!(submission.topic.level, 1);
    assert_eq!(submission.topic.name, "work culture");
    assert_eq!(submission.subtopic.level, 3);
    assert_eq!(submission.subtopic.name, "remote work productivity");
    assert_eq!(submission.node.topic_id, Some(submission.topic.id));
    assert_eq!(submission.node.subtopic_id, Some(submission.subtopic.id));
    assert_eq!(
        submission.node.metadata_json["topic_path"],
        json!(["work culture", "remote work", "remote work productivity"])
    );

    // All three levels exist and the tree is parented 1 → 2 → 3.
    let topics = engine.list_topics().unwrap();
    assert_eq!(topics.len(), 3);
    let l2 = topics.iter().find(|t| t.level == 2).unwrap();
    assert_eq!(l2.parent_topic_id, Some(submission.topic.id));
    let l3 = topics.iter().find(|t| t.level == 3).unwrap();
    assert_eq!(l3.parent_topic_id, Some(l2.id));
}

#[tokio::test]
async fn duplicate_ingest_is_idempotent() {
    let (engine, oracle) = engine_with(basic_oracle());

    let first = engine
        .ingest_idea("Remote work increases productivity", None, None)
        .await
        .unwrap();
    let embeds_after_first = oracle.embed_calls();
    let chats_after_first = oracle.chat_calls();
    let n_points_after_first = first.topic.n_points;

    // Different whitespace, case, and terminator — same duplicate key.
    let second = engine
        .ingest_idea("  remote WORK increases   productivity!! ", None, None)
        .await
        .unwrap();

    assert_eq!(second.node.id, first.node.id);
    assert_eq!(second.node.created_at, first.node.created_at);
    assert_eq!(second.topic.id, first.topic.id);
    assert_eq!(second.subtopic.id, first.subtopic.id);

    // The duplicate path makes no oracle calls.
    assert_eq!(oracle.embed_calls(), embeds_after_first);
    assert_eq!(oracle.chat_calls(), chats_after_first);

    // Topic counts moved by exactly one embedding's worth in total.
    let topics = engine.list_topics().unwrap();
    let l1 = topics.iter().find(|t| t.level == 1).unwrap();
    assert_eq!(l1.n_points, n_points_after_first);
    assert_eq!(l1.n_points, 1);
}

#[tokio::test]
async fn duplicate_ingest_merges_incoming_metadata() {
    let (engine, _) = engine_with(basic_oracle());

    let mut meta = serde_json::Map::new();
    meta.insert("source".to_string(), json!("survey"));
    meta.insert("round".to_string(), json!(1));
    engine
        .ingest_idea("Remote work increases productivity", None, Some(meta))
        .await
        .unwrap();

    let mut meta = serde_json::Map::new();
    meta.insert("round".to_string(), json!(2));
    let second = engine
        .ingest_idea("Remote work increases productivity", None, Some(meta))
        .await
        .unwrap();

    // Incoming keys overwrite, untouched keys survive.
    assert_eq!(second.node.metadata_json["round"], 2);
    assert_eq!(second.node.metadata_json["source"], "survey");
    // Pipeline-written keys are still present.
    assert!(second.node.metadata_json.contains_key("mid_topic_id"));
}

#[tokio::test]
async fn cold_start_stance_comes_from_the_hint() {
    let (engine, _) = engine_with(basic_oracle());
    let submission = engine
        .ingest_idea(
            "Remote work increases productivity",
            None,
            Some(stance_hint("con")),
        )
        .await
        .unwrap();

    assert_eq!(submission.node.stance_label, Stance::Con);
    assert_eq!(submission.node.stance_confidence, Some(0.0));
    assert_eq!(submission.node.metadata_json["stance_score"], 0.0);

    // The hint seeded the leaf's con bucket.
    let buckets = &submission.subtopic.stance_centroids_json;
    assert!(buckets.contains_key("con"));
    assert!(!buckets.contains_key("pro"));
}

#[tokio::test]
async fn cold_start_without_hint_is_neutral() {
    let (engine, _) = engine_with(basic_oracle());
    let submission = engine
        .ingest_idea("Remote work increases productivity", None, None)
        .await
        .unwrap();
    assert_eq!(submission.node.stance_label, Stance::Neutral);
    assert_eq!(submission.node.stance_confidence, Some(0.0));
}

#[tokio::test]
async fn oracle_embed_failure_is_fatal_and_leaves_no_state() {
    let (engine, _) = engine_with(basic_oracle().with_embed_failure());
    let err = engine
        .ingest_idea("Remote work increases productivity", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AtlasError::Oracle(_)));

    // Nothing was persisted.
    assert!(engine.list_topics().unwrap().is_empty());
    let map = engine.build_map(100).unwrap();
    assert!(map.ideas.is_empty());
}

#[tokio::test]
async fn ingest_writes_mirrored_similarity_edges() {
    let oracle = MockOracle::new()
        .with_hierarchy_response(json!({
            "level1": "beverages", "level2": "tea", "level3": "tea preference"
        }))
        .with_embedding("I drink tea every morning.", unit(&[(0, 1.0)]))
        .with_embedding("Loose leaf tea tastes better.", unit(&[(0, 0.9), (1, 0.44)]));
    let (engine, _) = engine_with(oracle);

    let first = engine
        .ingest_idea("I drink tea every morning", None, None)
        .await
        .unwrap();
    let second = engine
        .ingest_idea("Loose leaf tea tastes better", None, None)
        .await
        .unwrap();

    let map = engine.build_map(100).unwrap();
    let sim_edges: Vec<_> = map
        .edges
        .iter()
        .filter(|e| e.edge_type == "idea_similarity")
        .collect();
    // One neighbor, mirrored.
    assert_eq!(sim_edges.len(), 2);
    let forward = sim_edges
        .iter()
        .find(|e| e.src_id == second.node.id.to_string())
        .unwrap();
    assert_eq!(forward.dst_id, first.node.id.to_string());
    assert!(forward.weight > 0.8 && forward.weight <= 1.0);
}
