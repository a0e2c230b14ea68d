//! 에러 타입
//!
//! 파이프라인 전체에서 사용하는 에러 분류입니다.
//! 외부 계층(CLI 등)은 `ErrorKind`로 종류를 구분하고,
//! 임베딩/생성 실패는 `is_retryable()`로 재시도 여부를 판단합니다.

use serde::Serialize;
use thiserror::Error;

/// 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 잘못된 입력 (빈 질문, 빈 파일명, 지원하지 않는 형식 등)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 존재하지 않는 세션
    #[error("Not found: {0}")]
    NotFound(String),

    /// 임베딩 프로바이더 실패
    #[error("Embedding unavailable: {message}")]
    EmbeddingUnavailable { message: String, retryable: bool },

    /// 텍스트 생성 프로바이더 실패
    #[error("Generation unavailable: {message}")]
    GenerationUnavailable { message: String, retryable: bool },

    /// 벡터 인덱스 접근 실패
    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// 같은 세션의 청크들이 서로 다른 파일명을 가짐
    #[error("Data integrity violation: {0}")]
    DataIntegrityViolation(String),

    /// 설정 오류
    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RagError>;

/// 에러 종류 (외부 계층 보고용)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    EmbeddingUnavailable,
    GenerationUnavailable,
    IndexUnavailable,
    DataIntegrityViolation,
    Config,
}

impl ErrorKind {
    /// 안정적인 에러 코드
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::EmbeddingUnavailable => "EMBEDDING_UNAVAILABLE",
            ErrorKind::GenerationUnavailable => "GENERATION_UNAVAILABLE",
            ErrorKind::IndexUnavailable => "INDEX_UNAVAILABLE",
            ErrorKind::DataIntegrityViolation => "DATA_INTEGRITY_VIOLATION",
            ErrorKind::Config => "CONFIG",
        }
    }
}

impl RagError {
    pub fn embedding(message: impl Into<String>) -> Self {
        RagError::EmbeddingUnavailable {
            message: message.into(),
            retryable: false,
        }
    }

    /// 일시적인 임베딩 실패 (전송 오류, 타임아웃, 429)
    pub fn embedding_transient(message: impl Into<String>) -> Self {
        RagError::EmbeddingUnavailable {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        RagError::GenerationUnavailable {
            message: message.into(),
            retryable: false,
        }
    }

    /// 일시적인 생성 실패 (전송 오류, 타임아웃, 429)
    pub fn generation_transient(message: impl Into<String>) -> Self {
        RagError::GenerationUnavailable {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn index(message: impl Into<String>) -> Self {
        RagError::IndexUnavailable(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::InvalidInput(_) => ErrorKind::InvalidInput,
            RagError::NotFound(_) => ErrorKind::NotFound,
            RagError::EmbeddingUnavailable { .. } => ErrorKind::EmbeddingUnavailable,
            RagError::GenerationUnavailable { .. } => ErrorKind::GenerationUnavailable,
            RagError::IndexUnavailable(_) => ErrorKind::IndexUnavailable,
            RagError::DataIntegrityViolation(_) => ErrorKind::DataIntegrityViolation,
            RagError::Config(_) => ErrorKind::Config,
        }
    }

    /// 재시도 가능한 일시적 실패인지 여부
    pub fn is_retryable(&self) -> bool {
        match self {
            RagError::EmbeddingUnavailable { retryable, .. }
            | RagError::GenerationUnavailable { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

impl From<lancedb::Error> for RagError {
    fn from(e: lancedb::Error) -> Self {
        RagError::IndexUnavailable(e.to_string())
    }
}

impl From<arrow_schema::ArrowError> for RagError {
    fn from(e: arrow_schema::ArrowError) -> Self {
        RagError::IndexUnavailable(format!("Arrow error: {}", e))
    }
}

// ============================================================================
// Tests
// ============================================================================
