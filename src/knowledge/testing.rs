//! 테스트용 가짜 프로바이더/인덱스
//!
//! 네트워크 없이 결정적으로 동작합니다.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::{GenerationParams, GenerationProvider};

use super::memory::InMemoryVectorIndex;
use super::vector::{IndexRecord, IndexedChunk, MetadataFilter, RetrievedCandidate, VectorIndex};

pub const FAKE_DIMENSION: usize = 32;

// ============================================================================
// FakeEmbedder
// ============================================================================

/// 단어 해시 기반 bag-of-words 임베딩
///
/// 같은 단어를 공유하는 텍스트일수록 코사인 거리가 가깝습니다.
#[derive(Default)]
pub struct FakeEmbedder {
    calls: AtomicUsize,
    /// 남은 일시적 실패 횟수
    transient_failures: AtomicUsize,
    /// 이 문자열을 포함하면 영구 실패
    poison: Option<String>,
    /// 호출마다 지연 (동시성 순서 확인용)
    delay_by_len: bool,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_transiently(times: usize) -> Self {
        Self {
            transient_failures: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    pub fn poisoned(marker: &str) -> Self {
        Self {
            poison: Some(marker.to_string()),
            ..Self::default()
        }
    }

    /// 짧은 텍스트일수록 오래 걸리게 해서 완료 순서를 뒤섞음
    pub fn with_inverse_delay() -> Self {
        Self {
            delay_by_len: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; FAKE_DIMENSION];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = word
                .bytes()
                .fold(0xcbf29ce484222325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100000001b3));
            v[(hash % FAKE_DIMENSION as u64) as usize] += 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.delay_by_len {
            let millis = 30u64.saturating_sub(text.len() as u64 / 100);
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RagError::embedding_transient("connection reset"));
        }

        if let Some(marker) = &self.poison {
            if text.contains(marker.as_str()) {
                return Err(RagError::embedding("rejected input"));
            }
        }

        Ok(Self::vector(text))
    }

    fn dimension(&self) -> usize {
        FAKE_DIMENSION
    }

    fn name(&self) -> &str {
        "fake-embedder"
    }
}

// ============================================================================
// FakeGenerator
// ============================================================================

/// 받은 프롬프트를 기록하고 고정 답변을 돌려줌
#[derive(Default)]
pub struct FakeGenerator {
    prompts: Mutex<Vec<String>>,
    fail: bool,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl GenerationProvider for FakeGenerator {
    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if self.fail {
            return Err(RagError::generation("model rejected request"));
        }
        Ok(format!("generated answer ({} prompt chars)", prompt.chars().count()))
    }

    fn name(&self) -> &str {
        "fake-generator"
    }
}

// ============================================================================
// BrokenAddIndex
// ============================================================================

/// 레코드를 쓴 뒤 add 실패를 보고하는 인덱스 (롤백 확인용)
#[derive(Default)]
pub struct BrokenAddIndex {
    pub inner: Arc<InMemoryVectorIndex>,
}

#[async_trait]
impl VectorIndex for BrokenAddIndex {
    async fn add(&self, chunks: &[IndexedChunk]) -> Result<usize> {
        self.inner.add(chunks).await?;
        Err(RagError::index("commit failed"))
    }

    async fn query(
        &self,
        vector: &[f32],
        top_n: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievedCandidate>> {
        self.inner.query(vector, top_n, filter).await
    }

    async fn get(&self, filter: &MetadataFilter) -> Result<Vec<IndexRecord>> {
        self.inner.get(filter).await
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        self.inner.delete(ids).await
    }

    async fn count(&self, filter: &MetadataFilter) -> Result<usize> {
        self.inner.count(filter).await
    }

    fn name(&self) -> &'static str {
        "broken-add"
    }
}
