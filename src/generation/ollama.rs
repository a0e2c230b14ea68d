//! Ollama 로컬 생성
//!
//! `POST {base_url}/api/generate` (stream: false)

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::embedding::is_transient_status;
use crate::embedding::ollama::OLLAMA_BASE_URL;
use crate::error::{RagError, Result};

use super::{GenerationParams, GenerationProvider};

/// 기본 생성 모델
pub const OLLAMA_GENERATE_MODEL: &str = "llama3.1";

#[derive(Debug, Clone)]
pub struct OllamaGeneration {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: Options,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    repeat_penalty: f32,
    num_predict: u32,
}

impl From<&GenerationParams> for Options {
    fn from(params: &GenerationParams) -> Self {
        Self {
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            repeat_penalty: params.repeat_penalty,
            num_predict: params.max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaGeneration {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::generation(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        Self::new(
            config.base_url.as_deref().unwrap_or(OLLAMA_BASE_URL),
            config.model.as_deref().unwrap_or(OLLAMA_GENERATE_MODEL),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

#[async_trait]
impl GenerationProvider for OllamaGeneration {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: params.into(),
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                RagError::generation_transient(format!("Failed to call generate endpoint: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Ollama generate request failed ({}): {}", status, body);
            return Err(if is_transient_status(status) {
                RagError::generation_transient(message)
            } else {
                RagError::generation(message)
            });
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            RagError::generation(format!("Failed to decode generate response: {}", e))
        })?;

        if parsed.response.trim().is_empty() {
            return Err(RagError::generation("Generate response was empty"));
        }
        Ok(parsed.response)
    }

    fn name(&self) -> &str {
        &self.model
    }
}
