//! 생성 모듈 - 프롬프트로 답변 텍스트 생성
//!
//! - Gemini API (`generateContent`)
//! - Ollama 로컬 서버 (`/api/generate`)

pub mod ollama;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{GenerationConfig, ProviderKind};
use crate::embedding::{get_api_key, is_transient_status, GeminiError, GEMINI_BASE_URL};
use crate::error::{RagError, Result};

pub use ollama::OllamaGeneration;

/// 기본 Gemini 생성 모델
pub const GEMINI_GENERATE_MODEL: &str = "gemini-2.0-flash";

// ============================================================================
// GenerationParams
// ============================================================================

/// 샘플링 파라미터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    /// Ollama 전용 (Gemini는 무시)
    pub repeat_penalty: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
            max_tokens: 1024,
        }
    }
}

// ============================================================================
// GenerationProvider Trait
// ============================================================================

/// 텍스트 생성 프로바이더
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;

    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini
// ============================================================================

/// Gemini generateContent 구현체
#[derive(Debug, Clone)]
pub struct GeminiGeneration {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl GeminiGeneration {
    pub fn new(api_key: String, base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::generation(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        Self::new(
            get_api_key()?,
            config.base_url.as_deref().unwrap_or(GEMINI_BASE_URL),
            config.model.as_deref().unwrap_or(GEMINI_GENERATE_MODEL),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl GenerationProvider for GeminiGeneration {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let request = GenerateRequest::new(prompt, params);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                RagError::generation_transient(format!("Failed to send generation request: {}", e))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            RagError::generation_transient(format!("Failed to read response body: {}", e))
        })?;

        if !status.is_success() {
            let message = match serde_json::from_str::<GeminiError>(&body) {
                Ok(error) => format!(
                    "Gemini API error ({}): {}",
                    error.error.status, error.error.message
                ),
                Err(_) => format!("Gemini API error ({}): {}", status, body),
            };
            return Err(if is_transient_status(status) {
                RagError::generation_transient(message)
            } else {
                RagError::generation(message)
            });
        }

        let parsed: GenerateResponse = serde_json::from_str(&body).map_err(|e| {
            RagError::generation(format!("Failed to parse generation response: {}", e))
        })?;

        let text = parsed.text();
        if text.trim().is_empty() {
            return Err(RagError::generation("Generation response was empty"));
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: SamplingConfig,
}

impl GenerateRequest {
    fn new(prompt: &str, params: &GenerationParams) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: SamplingConfig {
                temperature: params.temperature,
                top_p: params.top_p,
                top_k: params.top_k,
                max_output_tokens: params.max_tokens,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct SamplingConfig {
    temperature: f32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    /// 첫 후보의 텍스트 파트를 이어 붙임
    fn text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 생성 프로바이더 생성
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn GenerationProvider>> {
    let generator: Arc<dyn GenerationProvider> = match config.provider {
        ProviderKind::Gemini => Arc::new(GeminiGeneration::from_config(config)?),
        ProviderKind::Ollama => Arc::new(OllamaGeneration::from_config(config)?),
    };

    tracing::info!("Using {} for generation", generator.name());
    Ok(generator)
}

// ============================================================================
// Tests
// ============================================================================
