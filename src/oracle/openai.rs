//! Production oracle — OpenAI-compatible chat + embeddings endpoints.
//!
//! One `reqwest::Client` with per-request timeouts: embeddings 60s, chat
//! 90s. A failed or timed-out call surfaces as `OracleError`; the caller
//! decides whether that is fatal (ingest) or degradable (relations).

use super::{parse_json_object, Oracle, OracleError};
use crate::config::Config;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

const EMBED_TIMEOUT: Duration = Duration::from_secs(60);
const CHAT_TIMEOUT: Duration = Duration::from_secs(90);

/// Oracle backed by OpenAI-compatible HTTP endpoints.
pub struct OpenAiOracle {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    llm_model: String,
    embed_model: String,
    embedding_dim: usize,
}

impl OpenAiOracle {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        llm_model: impl Into<String>,
        embed_model: impl Into<String>,
        embedding_dim: usize,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            llm_model: llm_model.into(),
            embed_model: embed_model.into(),
            embedding_dim,
        }
    }

    /// Wire an oracle from the standard configuration surface.
    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.openai_base_url.clone(),
            cfg.openai_api_key.clone(),
            cfg.openai_llm_model.clone(),
            cfg.openai_embed_model.clone(),
            cfg.embedding_dim,
        )
    }

    fn require_key(&self) -> Result<&str, OracleError> {
        if self.api_key.is_empty() {
            return Err(OracleError::NotConfigured(
                "OPENAI_API_KEY is not set".to_string(),
            ));
        }
        Ok(&self.api_key)
    }

    async fn post_json(
        &self,
        path: &str,
        body: Value,
        timeout: Duration,
    ) -> Result<Value, OracleError> {
        let key = self.require_key()?;
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(OracleError::Request(format!(
                "{path} returned {status}: {detail}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| OracleError::InvalidPayload(e.to_string()))
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError> {
        let body = json!({
            "model": self.embed_model,
            "input": text,
            "dimensions": self.embedding_dim,
        });
        let data = self.post_json("/embeddings", body, EMBED_TIMEOUT).await?;
        let embedding = data
            .pointer("/data/0/embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                OracleError::InvalidPayload("embedding endpoint returned invalid payload".to_string())
            })?;
        embedding
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    OracleError::InvalidPayload("non-numeric embedding component".to_string())
                })
            })
            .collect()
    }

    async fn classify_json(&self, system: &str, user: &str) -> Result<Value, OracleError> {
        let body = json!({
            "model": self.llm_model,
            "response_format": {"type": "json_object"},
            "temperature": 0.2,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        let data = self
            .post_json("/chat/completions", body, CHAT_TIMEOUT)
            .await?;
        let content = data
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or("{}");
        parse_json_object(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_api_key_is_a_configuration_error() {
        let oracle = OpenAiOracle::new("http://localhost:1", "", "m", "e", 8);
        let err = oracle.embed("x").await.unwrap_err();
        assert!(matches!(err, OracleError::NotConfigured(_)));
        let err = oracle.classify_json("s", "u").await.unwrap_err();
        assert!(matches!(err, OracleError::NotConfigured(_)));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let oracle = OpenAiOracle::new("http://localhost:9/v1/", "k", "m", "e", 8);
        assert_eq!(oracle.base_url, "http://localhost:9/v1");
    }
}
