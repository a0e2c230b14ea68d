//! 설정 로더
//!
//! Figment로 다음 순서로 병합합니다 (뒤가 우선):
//! 1. 내장 기본값
//! 2. `<data_dir>/palank-docqa.toml`
//! 3. `./palank-docqa.toml`
//! 4. `DOCQA_` 환경변수 (섹션 구분자 `__`, 예: `DOCQA_RETRIEVAL__TOP_K=8`)

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::generation::GenerationParams;
use crate::knowledge::{ChunkConfig, ContextConfig, RerankConfig, DEFAULT_TOP_K, DEFAULT_TOP_N};

/// 설정 파일 이름
pub const CONFIG_FILE: &str = "palank-docqa.toml";

/// 환경변수 접두사
pub const ENV_PREFIX: &str = "DOCQA_";

// ============================================================================
// Data Directory
// ============================================================================

/// 기본 데이터 디렉토리 (~/.palank-docqa/)
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".palank-docqa")
}

// ============================================================================
// Sections
// ============================================================================

/// 외부 모델 백엔드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Ollama,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// LanceDB 경로
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("index.lance")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 1차 검색 후보 수
    pub top_n: usize,
    /// 리랭킹 후 유지할 수
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            top_k: DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    /// None이면 프로바이더 기본 모델
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub dimension: usize,
    /// 동시 임베딩 요청 수
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            model: None,
            base_url: None,
            dimension: crate::embedding::DEFAULT_DIMENSION,
            concurrency: 4,
            timeout_secs: 30,
            max_attempts: 2,
            backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: ProviderKind,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub params: GenerationParams,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            model: None,
            base_url: None,
            timeout_secs: 60,
            max_attempts: 2,
            backoff_ms: 1000,
            params: GenerationParams::default(),
        }
    }
}

// ============================================================================
// AppConfig
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub chunking: ChunkConfig,
    pub retrieval: RetrievalConfig,
    pub rerank: RerankConfig,
    pub context: ContextConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
}

impl AppConfig {
    /// 기본 위치의 설정 파일과 환경변수에서 로드
    pub fn load() -> Result<Self> {
        let files = [
            default_data_dir().join(CONFIG_FILE),
            PathBuf::from(CONFIG_FILE),
        ];
        Self::load_from(&files)
    }

    /// 지정한 파일들(뒤가 우선)과 환경변수에서 로드
    ///
    /// 없는 파일은 건너뜁니다.
    pub fn load_from<P: AsRef<Path>>(files: &[P]) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        for file in files {
            figment = figment.merge(Toml::file(file.as_ref()));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: AppConfig = figment
            .extract()
            .map_err(|e| RagError::Config(format!("Failed to load configuration: {}", e)))?;
        config.validate()?;

        tracing::debug!("Configuration loaded (data_dir={:?})", config.storage.data_dir);
        Ok(config)
    }

    /// 값 범위 확인
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if chunking.chunk_size == 0 {
            return Err(RagError::Config("chunking.chunk_size must be > 0".into()));
        }
        if chunking.overlap >= chunking.chunk_size {
            return Err(RagError::Config(format!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                chunking.overlap, chunking.chunk_size
            )));
        }

        let retrieval = &self.retrieval;
        if retrieval.top_n == 0 || retrieval.top_k == 0 {
            return Err(RagError::Config(
                "retrieval.top_n and retrieval.top_k must be > 0".into(),
            ));
        }
        if retrieval.top_k > retrieval.top_n {
            return Err(RagError::Config(format!(
                "retrieval.top_k ({}) must not exceed retrieval.top_n ({})",
                retrieval.top_k, retrieval.top_n
            )));
        }

        if self.context.max_context_chars == 0 {
            return Err(RagError::Config("context.max_context_chars must be > 0".into()));
        }

        let embedding = &self.embedding;
        if embedding.dimension == 0 {
            return Err(RagError::Config("embedding.dimension must be > 0".into()));
        }
        if embedding.concurrency == 0 {
            return Err(RagError::Config("embedding.concurrency must be > 0".into()));
        }
        if embedding.max_attempts == 0 || self.generation.max_attempts == 0 {
            return Err(RagError::Config("max_attempts must be >= 1".into()));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
