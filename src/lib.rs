//! palank-docqa - 업로드 문서 질의응답 RAG
//!
//! 문서를 청킹해 벡터 인덱스(LanceDB)에 넣고, 질문마다 넓게 검색한 뒤
//! 하이브리드 리랭킹으로 추려 생성 모델에 컨텍스트로 전달합니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod knowledge;

// Re-exports
pub use config::{AppConfig, ProviderKind};
pub use embedding::{
    create_embedder, get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding,
    OllamaEmbedding,
};
pub use error::{ErrorKind, RagError, Result};
pub use generation::{
    create_generator, GeminiGeneration, GenerationParams, GenerationProvider, OllamaGeneration,
};
pub use knowledge::{
    Answer, AnswerStatus, ChunkConfig, Chunker, ContextAssembler, DocumentQa, InMemoryVectorIndex,
    LanceVectorIndex, RerankConfig, Reranker, Retriever, ScoredChunk, Session, SessionRegistry,
    UploadReceipt, VectorIndex,
};
