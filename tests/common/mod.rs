//! Shared fixtures for integration tests.
//!
//! Engines run against an in-memory database and a `MockOracle` with
//! pinned embeddings, so every scenario is deterministic and no network
//! is touched.

#![allow(dead_code)]

use atlas::{AtlasEngine, Config, Database, MockOracle};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Embedding dimension used by test fixtures.
pub const DIM: usize = 12;

/// Build an engine over an in-memory database and the given oracle.
/// Returns the oracle handle too so tests can assert call counts.
pub fn engine_with(oracle: MockOracle) -> (AtlasEngine, Arc<MockOracle>) {
    engine_with_cfg(oracle, test_config())
}

pub fn engine_with_cfg(oracle: MockOracle, cfg: Config) -> (AtlasEngine, Arc<MockOracle>) {
    let oracle = Arc::new(oracle);
    let db = Database::open_in_memory().expect("in-memory database");
    let engine = AtlasEngine::new(Arc::new(db), oracle.clone(), cfg);
    (engine, oracle)
}

/// Default config with the fixture embedding dimension.
pub fn test_config() -> Config {
    Config {
        embedding_dim: DIM,
        ..Config::default()
    }
}

/// Sparse unit-vector constructor: `unit(&[(0, 0.9), (2, 0.3)])` sets the
/// named components and L2-normalizes.
pub fn unit(components: &[(usize, f32)]) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for (idx, value) in components {
        v[*idx] = *value;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

/// Metadata map carrying a cold-start stance hint.
pub fn stance_hint(hint: &str) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("stance_hint".to_string(), json!(hint));
    m
}
