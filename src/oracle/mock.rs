//! Mock oracle for testing — returns preconfigured responses.
//!
//! Embeddings come from an exact-text registry with a deterministic
//! hash-derived fallback, so tests can pin the geometry that matters and
//! ignore the rest. Chat responses are routed by classifier kind and
//! matched by substring rules. Atomic call counters let tests assert cache
//! behavior (e.g. the relation cache suppressing repeat oracle calls).

use super::{Oracle, OracleError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Deterministic mock oracle.
pub struct MockOracle {
    embeddings: HashMap<String, Vec<f32>>,
    fallback_dim: usize,
    fail_embeds: bool,
    fail_relations: bool,
    /// (user-prompt substring, response) rules, first match wins.
    hierarchy_rules: Vec<(String, Value)>,
    hierarchy_default: Option<Value>,
    relation_rules: Vec<(String, String, Value)>,
    relation_default: Option<Value>,
    router_default: Option<Value>,
    embed_count: AtomicUsize,
    chat_count: AtomicUsize,
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOracle {
    pub fn new() -> Self {
        Self {
            embeddings: HashMap::new(),
            fallback_dim: 8,
            fail_embeds: false,
            fail_relations: false,
            hierarchy_rules: Vec::new(),
            hierarchy_default: None,
            relation_rules: Vec::new(),
            relation_default: None,
            router_default: None,
            embed_count: AtomicUsize::new(0),
            chat_count: AtomicUsize::new(0),
        }
    }

    /// Register an exact-text embedding.
    pub fn with_embedding(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.embeddings.insert(text.into(), vector);
        self
    }

    /// Dimension of hash-derived fallback embeddings (default 8).
    pub fn with_fallback_dim(mut self, dim: usize) -> Self {
        self.fallback_dim = dim;
        self
    }

    /// Make every embed call fail.
    pub fn with_embed_failure(mut self) -> Self {
        self.fail_embeds = true;
        self
    }

    /// Make every pair-relation classification fail.
    pub fn with_relation_failure(mut self) -> Self {
        self.fail_relations = true;
        self
    }

    /// Route hierarchy classifications whose user prompt contains
    /// `needle` to the given three names.
    pub fn with_hierarchy(
        mut self,
        needle: impl Into<String>,
        levels: [&str; 3],
    ) -> Self {
        self.hierarchy_rules.push((
            needle.into(),
            json!({"level1": levels[0], "level2": levels[1], "level3": levels[2]}),
        ));
        self
    }

    /// Default response for hierarchy classifications (raw JSON).
    pub fn with_hierarchy_response(mut self, response: Value) -> Self {
        self.hierarchy_default = Some(response);
        self
    }

    /// Route pair-relation classifications matching both substrings
    /// (seed, candidate) to the given label/confidence.
    pub fn with_relation(
        mut self,
        seed_needle: impl Into<String>,
        candidate_needle: impl Into<String>,
        label: &str,
        confidence: f64,
    ) -> Self {
        self.relation_rules.push((
            seed_needle.into(),
            candidate_needle.into(),
            json!({"relation_label": label, "confidence": confidence}),
        ));
        self
    }

    /// Default response for pair-relation classifications (raw JSON).
    pub fn with_relation_response(mut self, response: Value) -> Self {
        self.relation_default = Some(response);
        self
    }

    /// Default response for parent-router classifications (raw JSON).
    pub fn with_router_response(mut self, response: Value) -> Self {
        self.router_default = Some(response);
        self
    }

    /// Number of embed calls made so far.
    pub fn embed_calls(&self) -> usize {
        self.embed_count.load(Ordering::SeqCst)
    }

    /// Number of chat (classification) calls made so far.
    pub fn chat_calls(&self) -> usize {
        self.chat_count.load(Ordering::SeqCst)
    }

    /// Hash-derived unit vector, stable per text.
    fn fallback_embedding(&self, text: &str) -> Vec<f32> {
        let mut v = Vec::with_capacity(self.fallback_dim);
        for i in 0..self.fallback_dim {
            let mut hasher = DefaultHasher::new();
            (text, i as u64).hash(&mut hasher);
            // Spread hash bits into [-1, 1).
            let raw = (hasher.finish() % 2000) as f32 / 1000.0 - 1.0;
            v.push(raw);
        }
        let norm = crate::vecmath::l2_norm(&v);
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError> {
        self.embed_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_embeds {
            return Err(OracleError::Request("mock embed failure".to_string()));
        }
        Ok(self
            .embeddings
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.fallback_embedding(text)))
    }

    async fn classify_json(&self, system: &str, user: &str) -> Result<Value, OracleError> {
        self.chat_count.fetch_add(1, Ordering::SeqCst);

        if system.contains("topic taxonomist") {
            for (needle, response) in &self.hierarchy_rules {
                if user.contains(needle.as_str()) {
                    return Ok(response.clone());
                }
            }
            return Ok(self
                .hierarchy_default
                .clone()
                .unwrap_or_else(|| json!({"level1": "general"})));
        }

        if system.contains("relation_label") {
            if self.fail_relations {
                return Err(OracleError::Request("mock relation failure".to_string()));
            }
            for (seed, cand, response) in &self.relation_rules {
                if user.contains(seed.as_str()) && user.contains(cand.as_str()) {
                    return Ok(response.clone());
                }
            }
            return Ok(self
                .relation_default
                .clone()
                .unwrap_or_else(|| json!({"relation_label": "neutral", "confidence": 0.0})));
        }

        if system.contains("topic router") {
            return Ok(self
                .router_default
                .clone()
                .unwrap_or_else(|| json!({"selected_topic_name": "NEW", "confidence": 0.0})));
        }

        Err(OracleError::InvalidPayload(format!(
            "mock oracle has no route for system prompt: {system}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_embedding_wins_over_fallback() {
        let oracle = MockOracle::new().with_embedding("hello.", vec![1.0, 0.0]);
        assert_eq!(oracle.embed("hello.").await.unwrap(), vec![1.0, 0.0]);
        assert_eq!(oracle.embed_calls(), 1);
    }

    #[tokio::test]
    async fn fallback_embedding_is_stable_and_unit_length() {
        let oracle = MockOracle::new();
        let a = oracle.embed("some text").await.unwrap();
        let b = oracle.embed("some text").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!((crate::vecmath::l2_norm(&a) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn relation_rules_match_on_both_sides() {
        let oracle = MockOracle::new().with_relation("cats", "dogs", "oppose", 0.9);
        let v = oracle
            .classify_json(
                "relation_label must be one of: support, oppose, neutral.",
                "Seed idea:\ncats rule\n\nCandidate idea:\ndogs rule",
            )
            .await
            .unwrap();
        assert_eq!(v["relation_label"], "oppose");
        // One side only: falls through to the neutral default.
        let v = oracle
            .classify_json(
                "relation_label must be one of: support, oppose, neutral.",
                "Seed idea:\ncats rule\n\nCandidate idea:\nbirds sing",
            )
            .await
            .unwrap();
        assert_eq!(v["relation_label"], "neutral");
    }
}
