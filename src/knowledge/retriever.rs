//! Retriever - 넓은 1차 최근접 검색
//!
//! 리랭킹 전에 후보를 넉넉히(top_n) 가져옵니다.

use std::sync::Arc;

use crate::error::Result;

use super::vector::{MetadataFilter, RetrievedCandidate, VectorIndex};

/// 기본 1차 검색 개수
pub const DEFAULT_TOP_N: usize = 20;

/// 벡터 인덱스 기반 검색기
#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self { index }
    }

    /// 최근접 후보 검색
    ///
    /// # Arguments
    /// * `query_vector` - 질문 임베딩
    /// * `scope_session_id` - 지정하면 해당 세션 청크만 검색
    /// * `top_n` - 최대 후보 수
    ///
    /// # Returns
    /// 코사인 거리 오름차순 후보 (인덱스가 비어 있으면 빈 목록)
    pub async fn retrieve(
        &self,
        query_vector: &[f32],
        scope_session_id: Option<&str>,
        top_n: usize,
    ) -> Result<Vec<RetrievedCandidate>> {
        let filter = match scope_session_id {
            Some(id) => MetadataFilter::session(id),
            None => MetadataFilter::all(),
        };

        let mut candidates = self.index.query(query_vector, top_n, &filter).await?;

        // 인덱스 필터 결과를 한 번 더 확인 (세션 격리)
        let before = candidates.len();
        candidates.retain(|c| filter.matches(&c.metadata));
        if candidates.len() != before {
            tracing::warn!(
                "Dropped {} candidates outside session scope {:?}",
                before - candidates.len(),
                scope_session_id
            );
        }

        tracing::debug!(
            "Retrieved {} candidates from {} (scope={:?}, top_n={})",
            candidates.len(),
            self.index.name(),
            scope_session_id,
            top_n
        );

        Ok(candidates)
    }
}

// ============================================================================
// Tests
// ============================================================================
