//! Knowledge 모듈 - 문서 질의응답 검색 파이프라인
//!
//! - Chunker: 구분자 우선순위 기반 재귀 분할 + 오버랩
//! - VectorIndex: LanceDB (디스크) / 메모리 인덱스
//! - Retriever: 세션 범위 1차 최근접 검색
//! - Reranker: 의미/BM25/구문/위치/길이 신호를 결합한 하이브리드 점수
//! - Context: 출처 태그가 붙은 생성용 컨텍스트
//! - Session: 인덱스 메타데이터에서 문서 목록 도출

mod answer;
mod chunker;
mod context;
mod lance;
mod memory;
mod pipeline;
mod reranker;
mod retriever;
mod retry;
mod session;
mod vector;

#[cfg(test)]
mod testing;

// Re-exports
pub use answer::{
    Analysis, Answer, AnswerStatus, DeleteReceipt, IndexStats, RetrievalInfo, SourceRecord,
    SourceRef, UploadReceipt,
};
pub use chunker::{
    count_sentences, count_words, default_chunker, recursive_chunker, Chunk, ChunkConfig,
    Chunker, RecursiveChunker,
};
pub use context::{
    build_analysis_prompt, build_answer_prompt, AssembledContext, ContextAssembler,
    ContextConfig, DocumentGroup, CHUNK_SEPARATOR, NO_ANSWER,
};
pub use lance::LanceVectorIndex;
pub use memory::InMemoryVectorIndex;
pub use pipeline::{open_index, DocumentQa, QaSettings};
pub use reranker::{
    bm25_term, Bm25Params, LengthPrior, PhraseBonus, PositionPrior, QueryTerms, RerankConfig,
    RerankWeights, Reranker, ScoreBreakdown, ScoredChunk, DEFAULT_TOP_K,
};
pub use retriever::{Retriever, DEFAULT_TOP_N};
pub use retry::RetryPolicy;
pub use session::{Session, SessionRegistry};
pub use vector::{
    cosine_distance, cosine_similarity, ChunkMetadata, IndexRecord, IndexedChunk,
    MetadataFilter, RetrievedCandidate, VectorIndex, DEFAULT_EMBEDDING_DIMENSION,
};
