//! Text Chunking Module
//!
//! 문서를 인덱싱 단위(청크)로 분할합니다.
//!
//! 구분자 우선순위(문단 → 줄 → 문장 → 단어 → 문자)에 따라 재귀적으로 쪼갠 뒤
//! 예산 크기까지 탐욕적으로 병합하고, 앞 청크의 마지막 `overlap` 문자를
//! 다음 청크의 접두어로 이어 붙입니다 (슬라이딩 윈도우).
//!
//! 모든 길이는 문자(char) 단위이며 UTF-8 경계를 절대 자르지 않습니다.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 분할 구분자 (우선순위 순). 빈 문자열은 문자 단위 폴백.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// 문장 경계: `. `, `!`, `?` 각각 하나
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\. |[!?]").expect("sentence regex is valid"));

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub chunk_size: usize,
    /// 오버랩 크기 (문자 수)
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            overlap: 200,
        }
    }
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }

    /// 오버랩 없는 설정
    pub fn without_overlap(chunk_size: usize) -> Self {
        Self::new(chunk_size, 0)
    }

    /// 실제 적용되는 오버랩 (항상 chunk_size 미만)
    fn effective_overlap(&self) -> usize {
        self.overlap.min(self.chunk_size.saturating_sub(1))
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// 문서 청크 (생성 후 불변)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// 청크 텍스트 (오버랩 접두어 포함)
    pub text: String,
    /// 문서 내 순서 (0-based, 연속)
    pub position: usize,
    /// 문자 수
    pub length: usize,
    /// 문장 수
    pub sentence_count: usize,
    /// 단어 수 (공백 기준)
    pub word_count: usize,
    /// 앞 청크와 공유하는 선행 문자 수
    pub overlap: usize,
}

impl Chunk {
    fn new(text: String, position: usize, overlap: usize) -> Self {
        Self {
            length: text.chars().count(),
            sentence_count: count_sentences(&text),
            word_count: count_words(&text),
            text,
            position,
            overlap,
        }
    }

    /// 오버랩을 제외한 새 콘텐츠
    pub fn fresh_text(&self) -> &str {
        let start = self
            .text
            .char_indices()
            .nth(self.overlap)
            .map(|(i, _)| i)
            .unwrap_or(self.text.len());
        &self.text[start..]
    }
}

/// 문장 경계 개수
pub fn count_sentences(text: &str) -> usize {
    SENTENCE_END.find_iter(text).count()
}

/// 공백 기준 단어 개수
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<Chunk>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// RecursiveChunker
// ============================================================================

/// 재귀 계층 분할 청커
///
/// 1. 우선순위 구분자로 분할 (구분자는 앞 조각에 붙어 원문을 빈틈없이 덮음)
/// 2. 예산을 넘는 조각은 다음 구분자로 재분할
/// 3. 예산까지 탐욕적으로 병합 후 방출, 앞 청크 끝 `overlap` 문자를 접두어로 연결
pub struct RecursiveChunker {
    config: ChunkConfig,
}

impl RecursiveChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 생성 (1200 / 200)
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// 조각들을 예산까지 병합하여 새 콘텐츠 범위(문자 단위) 목록 생성
    fn merge_pieces(&self, pieces: &[Range<usize>], overlap: usize) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        let mut start = match pieces.first() {
            Some(p) => p.start,
            None => return spans,
        };
        let mut end = start;

        for piece in pieces {
            let budget = if spans.is_empty() {
                self.config.chunk_size
            } else {
                self.config.chunk_size - overlap
            };

            if end > start && piece.end - start > budget {
                spans.push(start..end);
                start = end;
            }
            end = piece.end;
        }

        if end > start {
            spans.push(start..end);
        }
        spans
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() || self.config.chunk_size == 0 {
            return vec![];
        }

        let index = CharIndex::new(text);

        // 짧은 텍스트는 오버랩 없이 단일 청크
        if index.len() <= self.config.chunk_size {
            return vec![Chunk::new(text.to_string(), 0, 0)];
        }

        let overlap = self.config.effective_overlap();
        let limit = self.config.chunk_size - overlap;

        // 1-2. 재귀 분할
        let mut pieces = Vec::new();
        split_recursive(text, &index, 0..index.len(), &SEPARATORS, limit, &mut pieces);

        // 3. 병합 + 공백 구간 흡수 + 오버랩
        let spans = fold_blank_spans(text, &index, self.merge_pieces(&pieces, overlap));
        spans
            .into_iter()
            .enumerate()
            .map(|(position, span)| {
                let lead = if position == 0 {
                    0
                } else {
                    overlap.min(span.start)
                };
                let from = index.byte(span.start - lead);
                let to = index.byte(span.end);
                Chunk::new(text[from..to].to_string(), position, lead)
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "RecursiveChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 문자 위치 ↔ 바이트 오프셋 변환표
struct CharIndex {
    /// 각 문자의 시작 바이트 + 끝(text.len())
    bounds: Vec<usize>,
}

impl CharIndex {
    fn new(text: &str) -> Self {
        let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        bounds.push(text.len());
        Self { bounds }
    }

    /// 문자 개수
    fn len(&self) -> usize {
        self.bounds.len() - 1
    }

    /// 문자 위치 → 바이트 오프셋
    fn byte(&self, char_pos: usize) -> usize {
        self.bounds[char_pos]
    }

    /// 바이트 오프셋(문자 경계) → 문자 위치
    fn char_pos(&self, byte: usize) -> usize {
        self.bounds.binary_search(&byte).unwrap_or_else(|i| i)
    }
}

/// 범위를 구분자 우선순위에 따라 `limit` 이하 조각으로 재귀 분할
fn split_recursive(
    text: &str,
    index: &CharIndex,
    range: Range<usize>,
    separators: &[&str],
    limit: usize,
    out: &mut Vec<Range<usize>>,
) {
    if range.len() <= limit {
        out.push(range);
        return;
    }

    let slice = &text[index.byte(range.start)..index.byte(range.end)];

    for (i, sep) in separators.iter().enumerate() {
        // 문자 단위 폴백
        if sep.is_empty() {
            out.extend((range.start..range.end).map(|c| c..c + 1));
            return;
        }

        if !slice.contains(sep) {
            continue;
        }

        let base = index.byte(range.start);
        let mut piece_start = range.start;
        for (at, _) in slice.match_indices(sep) {
            let piece_end = index.char_pos(base + at + sep.len());
            push_piece(text, index, piece_start..piece_end, &separators[i + 1..], limit, out);
            piece_start = piece_end;
        }
        if piece_start < range.end {
            push_piece(text, index, piece_start..range.end, &separators[i + 1..], limit, out);
        }
        return;
    }

    // 구분자 소진: limit 단위로 강제 분할
    let mut start = range.start;
    while start < range.end {
        let end = (start + limit).min(range.end);
        out.push(start..end);
        start = end;
    }
}

/// 공백뿐인 구간을 이웃 구간에 흡수
///
/// 앞 구간이 있으면 뒤로 늘리고, 문서 맨 앞이면 다음 구간의 시작으로 당깁니다.
/// 원문 커버리지는 그대로 유지됩니다.
fn fold_blank_spans(
    text: &str,
    index: &CharIndex,
    spans: Vec<Range<usize>>,
) -> Vec<Range<usize>> {
    let mut folded: Vec<Range<usize>> = Vec::with_capacity(spans.len());
    let mut leading: Option<usize> = None;

    for span in spans {
        let blank = text[index.byte(span.start)..index.byte(span.end)]
            .trim()
            .is_empty();
        if blank {
            match folded.last_mut() {
                Some(prev) => prev.end = span.end,
                None => {
                    leading.get_or_insert(span.start);
                }
            }
            continue;
        }
        let start = leading.take().unwrap_or(span.start);
        folded.push(start..span.end);
    }

    folded
}

fn push_piece(
    text: &str,
    index: &CharIndex,
    piece: Range<usize>,
    separators: &[&str],
    limit: usize,
    out: &mut Vec<Range<usize>>,
) {
    if piece.is_empty() {
        return;
    }
    if piece.len() > limit {
        split_recursive(text, index, piece, separators, limit, out);
    } else {
        out.push(piece);
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(RecursiveChunker::with_defaults())
}

/// 설정 지정 청커 생성
pub fn recursive_chunker(config: ChunkConfig) -> Box<dyn Chunker> {
    Box::new(RecursiveChunker::new(config))
}

// ============================================================================
// Tests
// ============================================================================
