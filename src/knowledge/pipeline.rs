//! DocumentQa - 업로드/질의 파이프라인
//!
//! 쓰기: 문서 → 청킹 → 임베딩 → 벡터 인덱스
//! 읽기: 질문 → 임베딩 → 1차 검색 → 리랭킹 → 컨텍스트 → 생성
//!
//! 인덱스는 트레이트 객체로 주입되며 세션 정보는 인덱스 메타데이터에서만 나옵니다.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::generation::{create_generator, GenerationParams, GenerationProvider};

use super::answer::{
    Analysis, Answer, AnswerStatus, DeleteReceipt, IndexStats, RetrievalInfo, UploadReceipt,
};
use super::chunker::{recursive_chunker, Chunker};
use super::context::{build_analysis_prompt, build_answer_prompt, ContextAssembler, NO_ANSWER};
use super::lance::LanceVectorIndex;
use super::memory::InMemoryVectorIndex;
use super::reranker::Reranker;
use super::retriever::Retriever;
use super::retry::RetryPolicy;
use super::session::{Session, SessionRegistry};
use super::vector::{ChunkMetadata, IndexedChunk, MetadataFilter, VectorIndex};

// ============================================================================
// Settings
// ============================================================================

/// 파이프라인 실행 설정
#[derive(Debug, Clone)]
pub struct QaSettings {
    pub top_n: usize,
    pub top_k: usize,
    pub embed_concurrency: usize,
    pub embed_retry: RetryPolicy,
    pub generate_retry: RetryPolicy,
    pub params: GenerationParams,
}

impl QaSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let embedding = &config.embedding;
        let generation = &config.generation;
        Self {
            top_n: config.retrieval.top_n,
            top_k: config.retrieval.top_k,
            embed_concurrency: embedding.concurrency.max(1),
            embed_retry: RetryPolicy::new(
                Duration::from_secs(embedding.timeout_secs),
                embedding.max_attempts,
                Duration::from_millis(embedding.backoff_ms),
            ),
            generate_retry: RetryPolicy::new(
                Duration::from_secs(generation.timeout_secs),
                generation.max_attempts,
                Duration::from_millis(generation.backoff_ms),
            ),
            params: generation.params.clone(),
        }
    }
}

// ============================================================================
// DocumentQa
// ============================================================================

/// 문서 질의응답 파이프라인
pub struct DocumentQa {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    chunker: Box<dyn Chunker>,
    retriever: Retriever,
    reranker: Reranker,
    assembler: ContextAssembler,
    sessions: SessionRegistry,
    settings: QaSettings,
}

impl DocumentQa {
    /// 주입된 인덱스/프로바이더로 생성
    pub fn new(
        config: &AppConfig,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            retriever: Retriever::new(index.clone()),
            sessions: SessionRegistry::new(index.clone()),
            chunker: recursive_chunker(config.chunking.clone()),
            reranker: Reranker::new(config.rerank.clone()),
            assembler: ContextAssembler::new(config.context.clone()),
            settings: QaSettings::from_config(config),
            index,
            embedder,
            generator,
        })
    }

    /// 설정에서 인덱스와 프로바이더까지 모두 생성
    ///
    /// `ephemeral`이면 디스크 대신 메모리 인덱스를 씁니다.
    pub async fn from_config(config: &AppConfig, ephemeral: bool) -> Result<Self> {
        config.validate()?;

        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        let index = open_index(config, ephemeral).await?;

        Self::new(config, index, embedder, generator)
    }

    pub fn settings(&self) -> &QaSettings {
        &self.settings
    }

    // ------------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------------

    /// 문서를 청킹, 임베딩 후 새 세션으로 인덱싱
    pub async fn process_upload(&self, text: &str, filename: &str) -> Result<UploadReceipt> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(RagError::InvalidInput("filename must not be empty".into()));
        }

        let session_id = Uuid::new_v4().to_string();
        let chunks = self.chunker.chunk(text);

        if chunks.is_empty() {
            tracing::warn!("No content to index in {}", filename);
            return Ok(UploadReceipt {
                session_id,
                filename: filename.to_string(),
                chunk_count: 0,
            });
        }

        tracing::debug!(
            "Chunked {} into {} chunks ({})",
            filename,
            chunks.len(),
            self.chunker.name()
        );

        // 동시 실행하되 결과는 청크 순서대로
        let embeddings: Vec<Vec<f32>> = stream::iter(chunks.iter())
            .map(|chunk| self.embed_document(&chunk.text))
            .buffered(self.settings.embed_concurrency)
            .try_collect()
            .await?;

        let uploaded_at = Utc::now();
        let records: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexedChunk {
                id: format!("{}_{}", session_id, chunk.position),
                metadata: ChunkMetadata {
                    session_id: session_id.clone(),
                    filename: filename.to_string(),
                    position: chunk.position,
                    length: chunk.length,
                    sentence_count: chunk.sentence_count,
                    word_count: chunk.word_count,
                    uploaded_at,
                },
                text: chunk.text,
                embedding,
            })
            .collect();

        let chunk_count = match self.index.add(&records).await {
            Ok(count) => count,
            Err(e) => {
                self.rollback(&session_id).await;
                return Err(e);
            }
        };

        tracing::info!(
            "Indexed {} ({} chunks, session {})",
            filename,
            chunk_count,
            session_id
        );

        Ok(UploadReceipt {
            session_id,
            filename: filename.to_string(),
            chunk_count,
        })
    }

    /// 실패한 업로드의 부분 기록 제거
    async fn rollback(&self, session_id: &str) {
        let written = match self.index.get(&MetadataFilter::session(session_id)).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Rollback lookup failed for session {}: {}", session_id, e);
                return;
            }
        };
        if written.is_empty() {
            return;
        }

        let ids: Vec<String> = written.into_iter().map(|r| r.id).collect();
        match self.index.delete(&ids).await {
            Ok(n) => tracing::warn!("Rolled back {} chunks of session {}", n, session_id),
            Err(e) => tracing::warn!("Rollback failed for session {}: {}", session_id, e),
        }
    }

    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.settings
            .embed_retry
            .run("embedding", RagError::embedding_transient, || {
                self.embedder.embed(text)
            })
            .await
    }

    async fn embed_question(&self, text: &str) -> Result<Vec<f32>> {
        self.settings
            .embed_retry
            .run("query embedding", RagError::embedding_transient, || {
                self.embedder.embed_query(text)
            })
            .await
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let params = &self.settings.params;
        self.settings
            .generate_retry
            .run("generation", RagError::generation_transient, || {
                self.generator.generate(prompt, params)
            })
            .await
    }

    // ------------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------------

    /// 질문에 답변
    ///
    /// # Arguments
    /// * `question` - 비어 있으면 `InvalidInput`
    /// * `session_id` - 지정하면 해당 문서만 검색, 없는 세션이면 `NotFound`
    pub async fn answer_question(&self, question: &str, session_id: Option<&str>) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidInput("question must not be empty".into()));
        }

        if let Some(id) = session_id {
            if !self.sessions.exists(id).await? {
                return Err(RagError::NotFound(format!("session '{}'", id)));
            }
        }

        let query_vector = self.embed_question(question).await?;
        let candidates = self
            .retriever
            .retrieve(&query_vector, session_id, self.settings.top_n)
            .await?;

        if candidates.is_empty() {
            tracing::debug!("No candidates for question, returning fixed answer");
            return Ok(insufficient_context(RetrievalInfo::default()));
        }

        let initial_retrieved = candidates.len();
        let mut scored = self
            .reranker
            .rerank(question, candidates, self.settings.top_k);
        let after_reranking = scored.len();

        let context = self.assembler.assemble(&scored);
        scored.truncate(context.included_chunks);

        let retrieval_info = RetrievalInfo {
            initial_retrieved,
            after_reranking,
            documents_searched: context.document_count(),
        };

        tracing::debug!(
            "Retrieved {} -> reranked {} -> context {} chunks from {} documents",
            initial_retrieved,
            after_reranking,
            context.included_chunks,
            context.document_count()
        );

        let prompt = build_answer_prompt(&context, question);
        let answer = self.generate(&prompt).await?;

        if answer.trim() == NO_ANSWER {
            return Ok(insufficient_context(retrieval_info));
        }

        Ok(Answer {
            answer,
            status: AnswerStatus::Answered,
            sources: scored,
            retrieval_info,
        })
    }

    /// 문서 개요 분석 (앞쪽 청크부터 컨텍스트 예산만큼)
    pub async fn analyze_document(&self, session_id: &str) -> Result<Analysis> {
        let session = self.sessions.get_session(session_id).await?;
        let records = self.sessions.session_records(session_id).await?;

        let context = self.assembler.assemble_parts(
            records
                .iter()
                .map(|r| (r.metadata.filename.as_str(), r.text.as_str())),
        );

        let prompt = build_analysis_prompt(&session.filename, &context);
        let analysis = self.generate(&prompt).await?;

        tracing::info!(
            "Analyzed {} ({} of {} chunks)",
            session.filename,
            context.included_chunks,
            records.len()
        );

        Ok(Analysis {
            session_id: session.session_id,
            filename: session.filename,
            analysis,
            chunks_analyzed: context.included_chunks,
        })
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.sessions.list_sessions().await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<DeleteReceipt> {
        let deleted_count = self.sessions.delete_session(session_id).await?;
        Ok(DeleteReceipt {
            session_id: session_id.to_string(),
            deleted_count,
        })
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let session_count = self.sessions.list_sessions().await?.len();
        let chunk_count = self.index.count(&MetadataFilter::all()).await?;
        Ok(IndexStats {
            session_count,
            chunk_count,
        })
    }
}

/// 설정에 맞는 벡터 인덱스 열기
///
/// `ephemeral`이면 메모리 인덱스, 아니면 `<data_dir>/index.lance`.
pub async fn open_index(config: &AppConfig, ephemeral: bool) -> Result<Arc<dyn VectorIndex>> {
    if ephemeral {
        tracing::info!("Using in-memory vector index");
        return Ok(Arc::new(InMemoryVectorIndex::new()));
    }

    let index =
        LanceVectorIndex::open(&config.storage.index_path(), config.embedding.dimension).await?;
    Ok(Arc::new(index))
}

fn insufficient_context(retrieval_info: RetrievalInfo) -> Answer {
    Answer {
        answer: NO_ANSWER.to_string(),
        status: AnswerStatus::InsufficientContext,
        sources: Vec::new(),
        retrieval_info,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::ChunkConfig;
    use crate::knowledge::testing::{BrokenAddIndex, FakeEmbedder, FakeGenerator};

    const LEASE: &str = "The tenant pays monthly rent of five hundred dollars. \
        Rent is due on the first day of each month.\n\n\
        The security deposit equals one month of rent and is returned within thirty days. \
        Pets are not allowed without written consent from the landlord.\n\n\
        Either party may terminate the lease with sixty days written notice.";

    const MANUAL: &str = "Press the power button for three seconds to start the device. \
        The battery charges fully in two hours.\n\n\
        Clean the lens with a dry microfiber cloth. \
        Do not submerge the device in water.";

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.chunking = ChunkConfig::new(160, 30);
        config.embedding.backoff_ms = 1;
        config.embedding.max_attempts = 2;
        config.generation.backoff_ms = 1;
        config
    }

    struct Harness {
        qa: DocumentQa,
        index: Arc<InMemoryVectorIndex>,
        embedder: Arc<FakeEmbedder>,
        generator: Arc<FakeGenerator>,
    }

    fn harness_with(embedder: FakeEmbedder, generator: FakeGenerator) -> Harness {
        let index = Arc::new(InMemoryVectorIndex::new());
        let embedder = Arc::new(embedder);
        let generator = Arc::new(generator);
        let qa = DocumentQa::new(
            &test_config(),
            index.clone(),
            embedder.clone(),
            generator.clone(),
        )
        .unwrap();
        Harness {
            qa,
            index,
            embedder,
            generator,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeEmbedder::new(), FakeGenerator::new())
    }

    #[tokio::test]
    async fn test_upload_and_list_two_documents() {
        let h = harness();
        let a = h.qa.process_upload(LEASE, "A.pdf").await.unwrap();
        let b = h.qa.process_upload(MANUAL, "B.pdf").await.unwrap();

        assert!(a.chunk_count > 1);
        assert!(b.chunk_count >= 1);
        assert_ne!(a.session_id, b.session_id);

        let sessions = h.qa.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);

        let find = |id: &str| sessions.iter().find(|s| s.session_id == id).unwrap().clone();
        assert_eq!(find(&a.session_id).filename, "A.pdf");
        assert_eq!(find(&a.session_id).chunk_count, a.chunk_count);
        assert_eq!(find(&b.session_id).filename, "B.pdf");
        assert_eq!(find(&b.session_id).chunk_count, b.chunk_count);

        let stats = h.qa.stats().await.unwrap();
        assert_eq!(stats.session_count, 2);
        assert_eq!(stats.chunk_count, a.chunk_count + b.chunk_count);
    }

    #[tokio::test]
    async fn test_upload_positions_are_contiguous() {
        let h = harness();
        let receipt = h.qa.process_upload(LEASE, "lease.txt").await.unwrap();

        let records = h
            .index
            .get(&MetadataFilter::session(receipt.session_id.as_str()))
            .await
            .unwrap();
        let mut positions: Vec<usize> = records.iter().map(|r| r.metadata.position).collect();
        positions.sort_unstable();
        assert_eq!(positions, (0..receipt.chunk_count).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_upload_empty_text_indexes_nothing() {
        let h = harness();
        let receipt = h.qa.process_upload("   \n\n ", "blank.txt").await.unwrap();

        assert_eq!(receipt.chunk_count, 0);
        assert!(h.qa.list_sessions().await.unwrap().is_empty());
        assert_eq!(h.embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_upload_empty_filename_rejected() {
        let h = harness();
        let err = h.qa.process_upload(LEASE, "  ").await.unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_embeddings_follow_chunk_order() {
        let h = harness_with(FakeEmbedder::with_inverse_delay(), FakeGenerator::new());
        let receipt = h.qa.process_upload(LEASE, "lease.txt").await.unwrap();
        let filter = MetadataFilter::session(receipt.session_id.as_str());

        // 각 청크는 자기 텍스트의 벡터로 저장되어 있어야 함
        for record in h.index.get(&filter).await.unwrap() {
            let hits = h
                .index
                .query(&FakeEmbedder::vector(&record.text), 1, &filter)
                .await
                .unwrap();
            assert!(hits[0].distance < 1e-5, "chunk {} has a foreign embedding", record.id);
        }
    }

    #[tokio::test]
    async fn test_transient_embedding_failure_is_retried() {
        let h = harness_with(FakeEmbedder::failing_transiently(1), FakeGenerator::new());
        let receipt = h.qa.process_upload(MANUAL, "manual.txt").await.unwrap();
        assert!(receipt.chunk_count >= 1);
    }

    #[tokio::test]
    async fn test_permanent_embedding_failure_indexes_nothing() {
        let h = harness_with(FakeEmbedder::poisoned("security deposit"), FakeGenerator::new());
        let err = h.qa.process_upload(LEASE, "lease.txt").await.unwrap_err();

        assert!(matches!(err, RagError::EmbeddingUnavailable { retryable: false, .. }));
        assert_eq!(h.index.count(&MetadataFilter::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_add_is_rolled_back() {
        let broken = Arc::new(BrokenAddIndex::default());
        let qa = DocumentQa::new(
            &test_config(),
            broken.clone(),
            Arc::new(FakeEmbedder::new()),
            Arc::new(FakeGenerator::new()),
        )
        .unwrap();

        let err = qa.process_upload(LEASE, "lease.txt").await.unwrap_err();
        assert!(matches!(err, RagError::IndexUnavailable(_)));
        assert_eq!(broken.inner.count(&MetadataFilter::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_answer_with_empty_index() {
        let h = harness();
        let answer = h.qa.answer_question("What is the rent?", None).await.unwrap();

        assert_eq!(answer.status, AnswerStatus::InsufficientContext);
        assert_eq!(answer.answer, NO_ANSWER);
        assert!(answer.sources.is_empty());
        assert!(h.generator.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_answer_rejects_empty_question() {
        let h = harness();
        let err = h.qa.answer_question("  ", None).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_answer_unknown_session() {
        let h = harness();
        h.qa.process_upload(LEASE, "lease.txt").await.unwrap();
        let err = h
            .qa
            .answer_question("What is the rent?", Some("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_answer_scoped_to_session() {
        let h = harness();
        let lease = h.qa.process_upload(LEASE, "lease.txt").await.unwrap();
        h.qa.process_upload(MANUAL, "manual.txt").await.unwrap();

        let answer = h
            .qa
            .answer_question(
                "How long does the battery take to charge?",
                Some(lease.session_id.as_str()),
            )
            .await
            .unwrap();

        assert_eq!(answer.status, AnswerStatus::Answered);
        assert!(!answer.sources.is_empty());
        assert!(answer
            .sources
            .iter()
            .all(|s| s.candidate.metadata.session_id == lease.session_id));
        assert_eq!(answer.retrieval_info.documents_searched, 1);

        let prompts = h.generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("[Source: lease.txt]"));
        assert!(!prompts[0].contains("[Source: manual.txt]"));
    }

    #[tokio::test]
    async fn test_answer_across_documents() {
        let h = harness();
        h.qa.process_upload(LEASE, "lease.txt").await.unwrap();
        h.qa.process_upload(MANUAL, "manual.txt").await.unwrap();

        let answer = h
            .qa
            .answer_question("How long does the battery take to charge?", None)
            .await
            .unwrap();

        let info = &answer.retrieval_info;
        assert!(info.initial_retrieved >= info.after_reranking);
        assert!(info.after_reranking <= 5);
        assert_eq!(answer.sources[0].filename(), "manual.txt");
        assert_eq!(answer.sources[0].rank, 1);
        assert!(answer
            .sources
            .windows(2)
            .all(|w| w[0].scores.combined >= w[1].scores.combined));

        let refs = answer.source_refs();
        assert_eq!(refs.len(), answer.sources.len());
        assert_eq!(refs[0].filename, "manual.txt");
    }

    #[tokio::test]
    async fn test_generation_failure_propagates() {
        let h = harness_with(FakeEmbedder::new(), FakeGenerator::failing());
        h.qa.process_upload(LEASE, "lease.txt").await.unwrap();

        let err = h.qa.answer_question("What is the rent?", None).await.unwrap_err();
        assert!(matches!(err, RagError::GenerationUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_delete_session() {
        let h = harness();
        let receipt = h.qa.process_upload(LEASE, "lease.txt").await.unwrap();

        let deleted = h.qa.delete_session(&receipt.session_id).await.unwrap();
        assert_eq!(deleted.deleted_count, receipt.chunk_count);
        assert!(h.qa.list_sessions().await.unwrap().is_empty());

        let err = h.qa.delete_session(&receipt.session_id).await.unwrap_err();
        assert!(matches!(err, RagError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_analyze_document() {
        let h = harness();
        let receipt = h.qa.process_upload(LEASE, "lease.txt").await.unwrap();

        let analysis = h.qa.analyze_document(&receipt.session_id).await.unwrap();
        assert_eq!(analysis.filename, "lease.txt");
        assert_eq!(analysis.chunks_analyzed, receipt.chunk_count);
        assert!(analysis.analysis.starts_with("generated answer"));

        let prompts = h.generator.prompts();
        assert!(prompts[0].contains("\"lease.txt\""));
        assert!(prompts[0].contains("monthly rent"));

        let err = h.qa.analyze_document("missing").await.unwrap_err();
        assert!(matches!(err, RagError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_open_index_on_disk_and_ephemeral() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.storage.data_dir = dir.path().join("data");

        let index = open_index(&config, false).await.unwrap();
        assert_eq!(index.count(&MetadataFilter::all()).await.unwrap(), 0);
        assert!(config.storage.data_dir.exists());

        let memory = open_index(&config, true).await.unwrap();
        assert_eq!(memory.name(), "memory");
    }

    #[test]
    fn test_settings_from_config() {
        let settings = QaSettings::from_config(&AppConfig::default());
        assert_eq!(settings.top_n, 20);
        assert_eq!(settings.top_k, 5);
        assert_eq!(settings.embed_concurrency, 4);
        assert_eq!(settings.embed_retry.max_attempts, 2);
    }
}
