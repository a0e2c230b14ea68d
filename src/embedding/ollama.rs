//! Ollama 로컬 임베딩
//!
//! `POST {base_url}/api/embeddings` 로 청크를 하나씩 벡터화합니다.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};

use super::{check_dimension, is_transient_status, EmbeddingProvider};

/// 기본 Ollama 주소
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// 기본 임베딩 모델
pub const OLLAMA_EMBED_MODEL: &str = "nomic-embed-text";

/// 요청 한 건의 최대 바이트 수
const MAX_PROMPT_BYTES: usize = 12_000;

/// Ollama 임베딩 구현체
#[derive(Debug, Clone)]
pub struct OllamaEmbedding {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedding {
    pub fn new(base_url: &str, model: &str, dimension: usize, timeout: Duration) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::Config("Embedding dimension must be > 0".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::embedding(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension,
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(
            config.base_url.as_deref().unwrap_or(OLLAMA_BASE_URL),
            config.model.as_deref().unwrap_or(OLLAMA_EMBED_MODEL),
            config.dimension,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embeddings", self.base_url)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let prompt = truncate_bytes(text, MAX_PROMPT_BYTES);
        let request = EmbeddingsRequest {
            model: &self.model,
            prompt,
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                RagError::embedding_transient(format!("Failed to call embeddings endpoint: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Ollama embeddings request failed ({}): {}", status, body);
            return Err(if is_transient_status(status) {
                RagError::embedding_transient(message)
            } else {
                RagError::embedding(message)
            });
        }

        let parsed: EmbeddingsResponse = response.json().await.map_err(|e| {
            RagError::embedding(format!("Failed to decode embeddings response: {}", e))
        })?;

        if parsed.embedding.is_empty() {
            return Err(RagError::embedding("Embeddings response was empty"));
        }
        check_dimension(parsed.embedding, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// UTF-8 경계를 지키며 최대 바이트 수로 자르기
fn truncate_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
