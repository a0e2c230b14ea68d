//! 파이프라인 결과 타입
//!
//! 업로드/질의/삭제/분석 결과와 출처 표현입니다.

use serde::{Deserialize, Serialize};

use super::reranker::ScoredChunk;

/// 업로드 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub session_id: String,
    pub filename: String,
    pub chunk_count: usize,
}

/// 삭제 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteReceipt {
    pub session_id: String,
    pub deleted_count: usize,
}

/// 답변 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Answered,
    /// 검색된 컨텍스트가 없음 (고정 답변 반환)
    InsufficientContext,
}

/// 검색 단계별 개수
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalInfo {
    pub initial_retrieved: usize,
    pub after_reranking: usize,
    pub documents_searched: usize,
}

/// 질의 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub status: AnswerStatus,
    pub sources: Vec<ScoredChunk>,
    pub retrieval_info: RetrievalInfo,
}

impl Answer {
    /// 출처를 표시용 형태로 변환
    pub fn source_refs(&self) -> Vec<SourceRef> {
        self.sources
            .iter()
            .cloned()
            .map(|c| SourceRecord::Scored(c).resolve())
            .collect()
    }
}

/// 문서 분석 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub session_id: String,
    pub filename: String,
    pub analysis: String,
    /// 프롬프트에 들어간 청크 수
    pub chunks_analyzed: usize,
}

/// 인덱스 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub session_count: usize,
    pub chunk_count: usize,
}

// ============================================================================
// Sources
// ============================================================================

/// 답변에 붙는 출처 원본
///
/// 예전 형식은 파일명 문자열만 담고 있었고, 현재 형식은 점수가 포함된 청크입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceRecord {
    Scored(ScoredChunk),
    Legacy(String),
}

/// 형식에 상관없는 출처 표현
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub filename: String,
    pub session_id: Option<String>,
    pub position: Option<usize>,
    pub rank: Option<usize>,
    pub score: Option<f64>,
    /// 청크 본문 (예전 형식은 비어 있음)
    pub excerpt: String,
}

impl SourceRecord {
    pub fn resolve(self) -> SourceRef {
        match self {
            SourceRecord::Legacy(filename) => SourceRef {
                filename,
                session_id: None,
                position: None,
                rank: None,
                score: None,
                excerpt: String::new(),
            },
            SourceRecord::Scored(chunk) => {
                let meta = chunk.candidate.metadata;
                SourceRef {
                    filename: meta.filename,
                    session_id: Some(meta.session_id),
                    position: Some(meta.position),
                    rank: Some(chunk.rank),
                    score: Some(chunk.scores.combined),
                    excerpt: chunk.candidate.text,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::reranker::ScoreBreakdown;
    use crate::knowledge::vector::{ChunkMetadata, RetrievedCandidate};
    use chrono::Utc;

    fn scored() -> ScoredChunk {
        ScoredChunk {
            candidate: RetrievedCandidate {
                id: "s1-0".to_string(),
                text: "Rent is $500.".to_string(),
                metadata: ChunkMetadata {
                    session_id: "s1".to_string(),
                    filename: "lease.txt".to_string(),
                    position: 3,
                    length: 13,
                    sentence_count: 1,
                    word_count: 3,
                    uploaded_at: Utc::now(),
                },
                distance: 0.1,
            },
            scores: ScoreBreakdown {
                combined: 4.2,
                ..Default::default()
            },
            rank: 1,
        }
    }

    #[test]
    fn test_resolve_scored() {
        let source = SourceRecord::Scored(scored()).resolve();
        assert_eq!(source.filename, "lease.txt");
        assert_eq!(source.session_id.as_deref(), Some("s1"));
        assert_eq!(source.position, Some(3));
        assert_eq!(source.rank, Some(1));
        assert_eq!(source.excerpt, "Rent is $500.");
    }

    #[test]
    fn test_resolve_legacy() {
        let source = SourceRecord::Legacy("A.pdf".to_string()).resolve();
        assert_eq!(source.filename, "A.pdf");
        assert!(source.session_id.is_none());
        assert!(source.excerpt.is_empty());
    }

    #[test]
    fn test_deserialize_both_shapes() {
        let json = serde_json::to_string(&vec![
            SourceRecord::Legacy("A.pdf".to_string()),
            SourceRecord::Scored(scored()),
        ])
        .unwrap();

        let parsed: Vec<SourceRecord> = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed[0], SourceRecord::Legacy(_)));
        assert!(matches!(parsed[1], SourceRecord::Scored(_)));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&AnswerStatus::InsufficientContext).unwrap();
        assert_eq!(json, "\"insufficient_context\"");
    }
}
