//! In-Memory Vector Index
//!
//! 전수 코사인 검색을 하는 메모리 인덱스입니다.
//! 테스트와 일회성(--ephemeral) 실행에 사용합니다.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{RagError, Result};

use super::vector::{
    cosine_distance, IndexRecord, IndexedChunk, MetadataFilter, RetrievedCandidate, VectorIndex,
};

/// 메모리 벡터 인덱스
#[derive(Default)]
pub struct InMemoryVectorIndex {
    chunks: RwLock<Vec<IndexedChunk>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn add(&self, chunks: &[IndexedChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        // 한 번의 쓰기 잠금 안에서 검증 후 전부 추가
        let mut stored = self.chunks.write().await;
        let expected = stored
            .first()
            .or_else(|| chunks.first())
            .map(|c| c.embedding.len())
            .unwrap_or(0);
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != expected) {
            return Err(RagError::InvalidInput(format!(
                "Embedding dimension mismatch for chunk {}: expected {}, got {}",
                bad.id,
                expected,
                bad.embedding.len()
            )));
        }

        stored.extend_from_slice(chunks);
        Ok(chunks.len())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_n: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievedCandidate>> {
        let stored = self.chunks.read().await;

        let mut candidates: Vec<RetrievedCandidate> = stored
            .iter()
            .filter(|c| filter.matches(&c.metadata))
            .map(|c| RetrievedCandidate {
                id: c.id.clone(),
                text: c.text.clone(),
                metadata: c.metadata.clone(),
                distance: cosine_distance(vector, &c.embedding),
            })
            .collect();

        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        candidates.truncate(top_n);
        Ok(candidates)
    }

    async fn get(&self, filter: &MetadataFilter) -> Result<Vec<IndexRecord>> {
        let stored = self.chunks.read().await;
        Ok(stored
            .iter()
            .filter(|c| filter.matches(&c.metadata))
            .map(|c| IndexRecord {
                id: c.id.clone(),
                text: c.text.clone(),
                metadata: c.metadata.clone(),
            })
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut stored = self.chunks.write().await;
        let before = stored.len();
        stored.retain(|c| !ids.contains(&c.id));
        Ok(before - stored.len())
    }

    async fn count(&self, filter: &MetadataFilter) -> Result<usize> {
        let stored = self.chunks.read().await;
        Ok(stored.iter().filter(|c| filter.matches(&c.metadata)).count())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// Tests
// ============================================================================
