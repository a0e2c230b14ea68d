//! Context Assembler - 생성용 컨텍스트 구성
//!
//! 리랭킹 순서를 유지한 채 청크마다 `[Source: 파일명]` 태그를 붙이고
//! 구분선으로 이어 붙입니다. 길이 예산을 넘는 청크부터는 잘라냅니다.

use serde::{Deserialize, Serialize};

use super::reranker::ScoredChunk;

/// 청크 사이 구분선
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// 컨텍스트를 찾지 못했을 때의 고정 답변
pub const NO_ANSWER: &str = "I cannot find this information in the uploaded documents.";

/// 컨텍스트 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// 컨텍스트 최대 문자 수 (첫 청크는 항상 포함)
    pub max_context_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_chars: 8000,
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// 문서별 청크 묶음
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentGroup {
    pub filename: String,
    pub texts: Vec<String>,
}

/// 조립된 컨텍스트
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    pub context_text: String,
    /// 파일명별 청크 (처음 등장한 문서 순서)
    pub grouped_by_document: Vec<DocumentGroup>,
    /// 실제로 포함된 청크 수
    pub included_chunks: usize,
}

impl AssembledContext {
    /// 기여한 서로 다른 문서 수
    pub fn document_count(&self) -> usize {
        self.grouped_by_document.len()
    }

    pub fn is_empty(&self) -> bool {
        self.included_chunks == 0
    }
}

// ============================================================================
// ContextAssembler
// ============================================================================

/// 컨텍스트 조립기
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// 리랭킹 결과로 컨텍스트 조립
    pub fn assemble(&self, scored: &[ScoredChunk]) -> AssembledContext {
        self.assemble_parts(scored.iter().map(|c| (c.filename(), c.text())))
    }

    /// (파일명, 텍스트) 순서열로 컨텍스트 조립
    pub fn assemble_parts<'a>(
        &self,
        parts: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> AssembledContext {
        let mut context = AssembledContext::default();
        let mut used = 0;

        for (filename, text) in parts {
            let section = format!("[Source: {}]\n{}", filename, text);
            let cost = section.chars().count()
                + if context.included_chunks > 0 {
                    CHUNK_SEPARATOR.len()
                } else {
                    0
                };

            if context.included_chunks > 0 && used + cost > self.config.max_context_chars {
                tracing::debug!(
                    "Context budget reached ({} chars), kept {} chunks",
                    used,
                    context.included_chunks
                );
                break;
            }

            if context.included_chunks > 0 {
                context.context_text.push_str(CHUNK_SEPARATOR);
            }
            context.context_text.push_str(&section);
            used += cost;
            context.included_chunks += 1;

            match context
                .grouped_by_document
                .iter_mut()
                .find(|g| g.filename == filename)
            {
                Some(group) => group.texts.push(text.to_string()),
                None => context.grouped_by_document.push(DocumentGroup {
                    filename: filename.to_string(),
                    texts: vec![text.to_string()],
                }),
            }
        }

        context
    }
}

// ============================================================================
// Prompts
// ============================================================================

/// 질의응답 프롬프트
pub fn build_answer_prompt(context: &AssembledContext, question: &str) -> String {
    format!(
        r#"You are a careful assistant answering questions about uploaded documents.

Instructions:
1. Answer ONLY from the context below.
2. Cite the source file names you used, e.g. (Source: contract.pdf).
3. If the context does not contain the answer, reply exactly: "{no_answer}"
4. Quote exact wording for definitions, amounts, dates and deadlines.

Context ({documents} document(s)):
{context}

Question: {question}

Answer:"#,
        no_answer = NO_ANSWER,
        documents = context.document_count(),
        context = context.context_text,
        question = question.trim(),
    )
}

/// 문서 분석 프롬프트
pub fn build_analysis_prompt(filename: &str, context: &AssembledContext) -> String {
    format!(
        r#"You are reviewing the document "{filename}". Using only the excerpts below, write a structured overview:

1. Document type and purpose
2. Parties or main entities involved
3. Key terms, obligations and definitions
4. Important dates, amounts and deadlines
5. Notable risks or unusual provisions

Excerpts:
{context}

Overview:"#,
        filename = filename,
        context = context.context_text,
    )
}

// ============================================================================
// Tests
// ============================================================================
