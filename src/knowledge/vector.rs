//! Vector Index - 벡터 인덱스 트레이트 및 레코드 타입
//!
//! 파이프라인은 이 트레이트를 통해서만 저장소에 접근합니다.
//! 구현체: `LanceVectorIndex` (디스크), `InMemoryVectorIndex` (메모리)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 기본 임베딩 차원 (Gemini gemini-embedding-001, nomic-embed-text)
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;

// ============================================================================
// Types
// ============================================================================

/// 청크 메타데이터 (인덱스에 함께 저장)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// 업로드 세션 ID (문서 단위)
    pub session_id: String,
    /// 원본 파일명
    pub filename: String,
    /// 문서 내 청크 순서 (0-based)
    pub position: usize,
    /// 청크 문자 수
    pub length: usize,
    pub sentence_count: usize,
    pub word_count: usize,
    /// 업로드 시각
    pub uploaded_at: DateTime<Utc>,
}

/// 인덱스 저장용 청크
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    /// 고유 ID
    pub id: String,
    /// 청크 텍스트
    pub text: String,
    pub metadata: ChunkMetadata,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

/// `get` 결과 (벡터 제외)
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// 최근접 검색 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedCandidate {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// 코사인 거리 (0.0 ~ 2.0, 작을수록 유사)
    pub distance: f32,
}

/// 메타데이터 정확 일치 필터
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    pub session_id: Option<String>,
}

impl MetadataFilter {
    /// 필터 없음 (전체)
    pub fn all() -> Self {
        Self::default()
    }

    /// 세션 필터
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.session_id.is_none()
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        match &self.session_id {
            Some(id) => metadata.session_id == *id,
            None => true,
        }
    }

    /// SQL WHERE 절로 변환 (작은따옴표 이스케이프)
    pub fn to_sql(&self) -> Option<String> {
        self.session_id
            .as_ref()
            .map(|id| format!("session_id = '{}'", id.replace('\'', "''")))
    }
}

// ============================================================================
// VectorIndex Trait
// ============================================================================

/// VectorIndex 트레이트 (async)
///
/// 청크 벡터와 메타데이터의 공통 저장소 인터페이스입니다.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 청크 일괄 추가 (한 번의 호출은 하나의 논리 단위)
    async fn add(&self, chunks: &[IndexedChunk]) -> Result<usize>;

    /// 최근접 검색 (코사인 거리 오름차순)
    async fn query(
        &self,
        vector: &[f32],
        top_n: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievedCandidate>>;

    /// 필터에 맞는 레코드 조회
    async fn get(&self, filter: &MetadataFilter) -> Result<Vec<IndexRecord>>;

    /// ID로 삭제, 삭제된 개수 반환
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    /// 필터에 맞는 레코드 개수
    async fn count(&self, filter: &MetadataFilter) -> Result<usize>;

    /// 인덱스 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 코사인 거리 (1 - 유사도, 0.0 ~ 2.0)
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - cosine_similarity(a, b)).clamp(0.0, 2.0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(session_id: &str) -> ChunkMetadata {
        ChunkMetadata {
            session_id: session_id.to_string(),
            filename: "A.pdf".to_string(),
            position: 0,
            length: 10,
            sentence_count: 1,
            word_count: 2,
            uploaded_at: Utc::now(),
        }
    }

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.0001);
        assert!(cosine_distance(&a, &a).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.0001);
        assert!((cosine_distance(&a, &c) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.0001);
        assert!((cosine_distance(&a, &d) - 2.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_empty() {
        let a: Vec<f32> = vec![];
        assert_eq!(cosine_similarity(&a, &a), 0.0);
    }

    #[test]
    fn test_filter_matches() {
        let filter = MetadataFilter::session("s1");
        assert!(filter.matches(&metadata("s1")));
        assert!(!filter.matches(&metadata("s2")));
        assert!(MetadataFilter::all().matches(&metadata("s2")));
    }

    #[test]
    fn test_filter_sql_escapes_quotes() {
        assert_eq!(MetadataFilter::all().to_sql(), None);
        assert_eq!(
            MetadataFilter::session("it's").to_sql().as_deref(),
            Some("session_id = 'it''s'")
        );
    }
}
