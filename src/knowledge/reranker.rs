//! 하이브리드 리랭커
//!
//! 1차 벡터 검색 후보를 다섯 가지 신호의 선형 결합으로 다시 정렬합니다.
//!
//! | 신호     | 공식                                              |
//! |----------|---------------------------------------------------|
//! | semantic | `(1 - distance) × 10`                             |
//! | bm25     | `Σ tf·(k1+1) / (tf + k1·(1 - b + b·dl/avgdl)) × 2` |
//! | phrase   | 트라이그램 +10, 바이그램 +5 (리터럴 부분 문자열)  |
//! | position | `max(0, 3 - 0.1·position)`                        |
//! | length   | `max(0, 2 - |length - 1200| / 500)`               |
//!
//! combined = 0.45·semantic + 0.30·bm25 + 0.15·phrase + 0.05·position + 0.05·length
//!
//! 코퍼스 통계를 따로 관리하지 않으므로 IDF는 상수(`idf_weight`)로 근사합니다.
//! ref: https://en.wikipedia.org/wiki/Okapi_BM25

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::chunker::count_words;
use super::vector::RetrievedCandidate;

/// 기본 리랭킹 결과 수
pub const DEFAULT_TOP_K: usize = 5;

/// 코사인 거리의 최댓값
const WORST_DISTANCE: f64 = 2.0;

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+").expect("word regex is valid"));

// ============================================================================
// Configuration
// ============================================================================

/// 신호별 결합 가중치
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankWeights {
    pub semantic: f64,
    pub bm25: f64,
    pub phrase: f64,
    pub position: f64,
    pub length: f64,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            semantic: 0.45,
            bm25: 0.30,
            phrase: 0.15,
            position: 0.05,
            length: 0.05,
        }
    }
}

impl RerankWeights {
    /// 가중 합
    pub fn combine(&self, s: &ScoreBreakdown) -> f64 {
        self.semantic * s.semantic
            + self.bm25 * s.bm25
            + self.phrase * s.phrase
            + self.position * s.position
            + self.length * s.length
    }
}

/// BM25 상수
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
    /// 평균 문서 길이 (단어 수)
    pub avg_doc_len: f64,
    /// 균일 IDF 근사값
    pub idf_weight: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            avg_doc_len: 300.0,
            idf_weight: 2.0,
        }
    }
}

/// 구문 일치 보너스
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhraseBonus {
    pub trigram: f64,
    pub bigram: f64,
}

impl Default for PhraseBonus {
    fn default() -> Self {
        Self {
            trigram: 10.0,
            bigram: 5.0,
        }
    }
}

/// 문서 앞부분 선호 (정의와 핵심 용어가 앞에 오는 문서가 많음)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionPrior {
    pub max: f64,
    pub decay: f64,
}

impl Default for PositionPrior {
    fn default() -> Self {
        Self { max: 3.0, decay: 0.1 }
    }
}

/// 표준 청크 크기에 가까울수록 가산
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LengthPrior {
    pub target: f64,
    pub tolerance: f64,
    pub max: f64,
}

impl Default for LengthPrior {
    fn default() -> Self {
        Self {
            target: 1200.0,
            tolerance: 500.0,
            max: 2.0,
        }
    }
}

/// 리랭커 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub weights: RerankWeights,
    pub bm25: Bm25Params,
    pub phrase: PhraseBonus,
    pub position: PositionPrior,
    pub length: LengthPrior,
    /// 거리 → 유사도 변환 배율
    pub semantic_scale: f64,
    /// 어휘 점수에 쓰는 최소 토큰 길이 (문자 수)
    pub min_token_len: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            weights: RerankWeights::default(),
            bm25: Bm25Params::default(),
            phrase: PhraseBonus::default(),
            position: PositionPrior::default(),
            length: LengthPrior::default(),
            semantic_scale: 10.0,
            min_token_len: 3,
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// 신호별 점수
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub semantic: f64,
    pub bm25: f64,
    pub phrase: f64,
    pub position: f64,
    pub length: f64,
    pub combined: f64,
}

/// 리랭킹된 청크 (출처 정보로 호출자에게 반환)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub candidate: RetrievedCandidate,
    pub scores: ScoreBreakdown,
    /// 1부터 시작하는 순위
    pub rank: usize,
}

impl ScoredChunk {
    pub fn filename(&self) -> &str {
        &self.candidate.metadata.filename
    }

    pub fn text(&self) -> &str {
        &self.candidate.text
    }
}

/// 질문에서 뽑은 어휘 신호
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryTerms {
    /// BM25 용어 (중복 제거, 최소 길이 이상)
    pub terms: Vec<String>,
    pub bigrams: Vec<String>,
    pub trigrams: Vec<String>,
}

impl QueryTerms {
    /// 질문 토큰화
    ///
    /// 단어는 소문자 `\w+` 중 `min_token_len` 이상만 남깁니다.
    /// 용어는 그 중복 제거, n-gram은 걸러진 순서 그대로 만듭니다.
    pub fn parse(query: &str, min_token_len: usize) -> Self {
        let lowered = query.to_lowercase();
        let words: Vec<&str> = WORD
            .find_iter(&lowered)
            .map(|m| m.as_str())
            .filter(|w| w.chars().count() >= min_token_len)
            .collect();

        let terms = unique(words.iter().map(|w| w.to_string()));
        let bigrams = unique(words.windows(2).map(|w| w.join(" ")));
        let trigrams = unique(words.windows(3).map(|w| w.join(" ")));

        Self {
            terms,
            bigrams,
            trigrams,
        }
    }
}

/// 정렬 키: 비정상 점수는 맨 뒤로
fn sort_key(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}

/// 순서를 유지하며 중복 제거
fn unique(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.filter(|item| seen.insert(item.clone())).collect()
}

// ============================================================================
// Reranker
// ============================================================================

/// 하이브리드 리랭커
#[derive(Debug, Clone, Default)]
pub struct Reranker {
    config: RerankConfig,
}

impl Reranker {
    pub fn new(config: RerankConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RerankConfig {
        &self.config
    }

    /// 후보 리랭킹
    ///
    /// combined 내림차순 안정 정렬 (동점이면 검색 순서 유지) 후 상위 `top_k`.
    /// 같은 입력에는 항상 같은 순서와 점수를 돌려줍니다.
    pub fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievedCandidate>,
        top_k: usize,
    ) -> Vec<ScoredChunk> {
        if candidates.is_empty() || top_k == 0 {
            return vec![];
        }

        let query_terms = QueryTerms::parse(query, self.config.min_token_len);

        let mut scored: Vec<ScoredChunk> = candidates
            .into_iter()
            .map(|candidate| {
                let scores = self.score(&query_terms, &candidate);
                ScoredChunk {
                    candidate,
                    scores,
                    rank: 0,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            sort_key(b.scores.combined).total_cmp(&sort_key(a.scores.combined))
        });
        scored.truncate(top_k);
        for (i, chunk) in scored.iter_mut().enumerate() {
            chunk.rank = i + 1;
        }

        tracing::debug!(
            "Reranked to {} chunks (top score {:.3})",
            scored.len(),
            scored.first().map(|c| c.scores.combined).unwrap_or_default()
        );

        scored
    }

    /// 후보 하나의 신호별 점수
    pub fn score(&self, query: &QueryTerms, candidate: &RetrievedCandidate) -> ScoreBreakdown {
        let lowered = candidate.text.to_lowercase();
        let doc_len = count_words(&candidate.text);

        let mut scores = ScoreBreakdown {
            semantic: self.semantic_score(candidate.distance),
            bm25: self.lexical_score(&query.terms, &lowered, doc_len),
            phrase: self.phrase_score(query, &lowered),
            position: self.position_score(candidate.metadata.position),
            length: self.length_score(candidate.metadata.length),
            combined: 0.0,
        };
        scores.combined = self.config.weights.combine(&scores);
        scores
    }

    /// 의미 점수: (1 - distance) × scale
    ///
    /// NaN/무한 거리(영벡터 코사인 등)는 최악 거리로 취급합니다.
    pub fn semantic_score(&self, distance: f32) -> f64 {
        let distance = if distance.is_finite() {
            f64::from(distance)
        } else {
            WORST_DISTANCE
        };
        (1.0 - distance) * self.config.semantic_scale
    }

    /// BM25 어휘 점수 (lowered = 소문자 후보 텍스트)
    pub fn lexical_score(&self, terms: &[String], lowered: &str, doc_len: usize) -> f64 {
        let params = &self.config.bm25;
        terms
            .iter()
            .map(|term| {
                let tf = lowered.matches(term.as_str()).count();
                bm25_term(tf, doc_len, params) * params.idf_weight
            })
            .sum()
    }

    /// 구문 점수: 트라이그램/바이그램 리터럴 일치
    pub fn phrase_score(&self, query: &QueryTerms, lowered: &str) -> f64 {
        let trigrams = query
            .trigrams
            .iter()
            .filter(|t| lowered.contains(t.as_str()))
            .count();
        let bigrams = query
            .bigrams
            .iter()
            .filter(|b| lowered.contains(b.as_str()))
            .count();

        trigrams as f64 * self.config.phrase.trigram + bigrams as f64 * self.config.phrase.bigram
    }

    /// 위치 점수: max(0, max - decay × position)
    pub fn position_score(&self, position: usize) -> f64 {
        let prior = &self.config.position;
        (prior.max - prior.decay * position as f64).max(0.0)
    }

    /// 길이 점수: max(0, max - |length - target| / tolerance)
    pub fn length_score(&self, length: usize) -> f64 {
        let prior = &self.config.length;
        if prior.tolerance <= 0.0 {
            return 0.0;
        }
        (prior.max - (length as f64 - prior.target).abs() / prior.tolerance).max(0.0)
    }
}

/// 단일 용어의 정규화 TF
///
/// `tf·(k1+1) / (tf + k1·(1 - b + b·doc_len/avg_doc_len))`. tf가 0이면 0.
pub fn bm25_term(tf: usize, doc_len: usize, params: &Bm25Params) -> f64 {
    if tf == 0 {
        return 0.0;
    }
    let tf = tf as f64;
    let avg = if params.avg_doc_len > 0.0 {
        params.avg_doc_len
    } else {
        1.0
    };
    let norm = 1.0 - params.b + params.b * (doc_len as f64 / avg);
    tf * (params.k1 + 1.0) / (tf + params.k1 * norm)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::vector::ChunkMetadata;
    use chrono::{TimeZone, Utc};

    fn candidate(id: &str, text: &str, distance: f32, position: usize) -> RetrievedCandidate {
        RetrievedCandidate {
            id: id.to_string(),
            text: text.to_string(),
            metadata: ChunkMetadata {
                session_id: "s1".to_string(),
                filename: "contract.pdf".to_string(),
                position,
                length: 1200,
                sentence_count: 1,
                word_count: count_words(text),
                uploaded_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            },
            distance,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_rerank_empty() {
        let reranker = Reranker::default();
        assert!(reranker.rerank("anything", vec![], 5).is_empty());
    }

    #[test]
    fn test_query_terms() {
        let q = QueryTerms::parse("What is the Termination clause? The termination!", 3);
        assert_eq!(q.terms, vec!["what", "the", "termination", "clause"]);
        assert!(q.bigrams.contains(&"termination clause".to_string()));
        assert!(q.trigrams.contains(&"what the termination".to_string()));
    }

    #[test]
    fn test_ngrams_skip_short_words() {
        let q = QueryTerms::parse("What is the notice period?", 3);
        assert_eq!(q.bigrams, vec!["what the", "the notice", "notice period"]);
        assert!(!q.bigrams.contains(&"is the".to_string()));

        let reranker = Reranker::default();
        let unrelated = "this is the rent schedule for the premises";
        assert!(close(reranker.phrase_score(&q, unrelated), 0.0));
    }

    #[test]
    fn test_non_finite_distance_ranks_last() {
        let reranker = Reranker::default();
        assert!(close(reranker.semantic_score(f32::NAN), -10.0));
        assert!(close(reranker.semantic_score(f32::INFINITY), -10.0));

        let candidates = vec![
            candidate("blank", "   ", f32::NAN, 0),
            candidate("good", "rent is due monthly", 0.0, 1),
        ];
        let ranked = reranker.rerank("rent", candidates, 2);
        let ids: Vec<&str> = ranked.iter().map(|c| c.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["good", "blank"]);
        assert!(ranked.iter().all(|c| c.scores.combined.is_finite()));
    }

    #[test]
    fn test_signal_formulas() {
        let reranker = Reranker::default();
        assert!(close(reranker.semantic_score(0.25), 7.5));
        assert!(close(reranker.position_score(0), 3.0));
        assert!(close(reranker.position_score(5), 2.5));
        assert!(close(reranker.position_score(40), 0.0));
        assert!(close(reranker.length_score(1200), 2.0));
        assert!(close(reranker.length_score(1700), 1.0));
        assert!(close(reranker.length_score(200), 0.0));
    }

    #[test]
    fn test_bm25_term_values() {
        let params = Bm25Params::default();
        assert_eq!(bm25_term(0, 300, &params), 0.0);
        // doc_len == avg_doc_len → tf·2.5 / (tf + 1.5)
        assert!(close(bm25_term(1, 300, &params), 2.5 / 2.5));
        assert!(close(bm25_term(3, 300, &params), 7.5 / 4.5));
    }

    #[test]
    fn test_bm25_monotonic_in_tf() {
        let params = Bm25Params::default();
        for doc_len in [10, 300, 2000] {
            let mut prev = 0.0;
            for tf in 0..30 {
                let score = bm25_term(tf, doc_len, &params);
                assert!(score >= prev, "tf={} doc_len={}", tf, doc_len);
                prev = score;
            }
        }
    }

    #[test]
    fn test_lexical_counts_case_insensitive_substrings() {
        let reranker = Reranker::default();
        let terms = vec!["fee".to_string()];
        let one = reranker.lexical_score(&terms, &"The FEE is due".to_lowercase(), 4);
        let two = reranker.lexical_score(&terms, &"fee and fees".to_lowercase(), 4);
        assert!(one > 0.0);
        assert!(two > one);
    }

    #[test]
    fn test_combined_uses_weights() {
        let reranker = Reranker::default();
        let q = QueryTerms::parse("payment terms", 3);
        let c = candidate("c1", "Payment terms are net thirty days.", 0.2, 10);
        let s = reranker.score(&q, &c);

        let expected = 0.45 * s.semantic
            + 0.30 * s.bm25
            + 0.15 * s.phrase
            + 0.05 * s.position
            + 0.05 * s.length;
        assert!(close(s.combined, expected));
        assert!(close(s.phrase, 5.0));
        assert!(close(s.position, 2.0));
    }

    #[test]
    fn test_trigram_match_ranks_first() {
        let reranker = Reranker::default();
        let query = "termination for convenience clause";
        let candidates = vec![
            candidate("c0", "Convenience fees apply; termination requires notice for cause.", 0.3, 0),
            candidate("c1", "Clause four: termination needs notice for cause and convenience.", 0.3, 0),
            candidate("c2", "Either party may invoke termination for convenience with notice.", 0.3, 0),
            candidate("c3", "Notice for cause: termination, convenience, clause obligations.", 0.3, 0),
            candidate("c4", "Convenience and termination rights; clause applies for cause.", 0.3, 0),
        ];

        let ranked = reranker.rerank(query, candidates, 5);
        let top = &ranked[0];
        assert_eq!(top.candidate.id, "c2");
        assert!(top.scores.phrase >= 10.0);
        assert!(ranked[1..].iter().all(|c| c.scores.phrase < 10.0));
        assert!(ranked[1..].iter().all(|c| c.scores.combined <= top.scores.combined));
    }

    #[test]
    fn test_top_k_bound_and_order() {
        let reranker = Reranker::default();
        let candidates: Vec<_> = (0..8)
            .map(|i| candidate(&format!("c{}", i), "liability cap", 0.1 * i as f32, i))
            .collect();

        let ranked = reranker.rerank("liability", candidates.clone(), 3);
        assert_eq!(ranked.len(), 3);
        assert!(ranked.windows(2).all(|w| w[0].scores.combined >= w[1].scores.combined));
        assert_eq!(ranked.iter().map(|c| c.rank).collect::<Vec<_>>(), vec![1, 2, 3]);

        let all = reranker.rerank("liability", candidates, 20);
        assert_eq!(all.len(), 8);
    }

    #[test]
    fn test_deterministic() {
        let reranker = Reranker::default();
        let candidates = vec![
            candidate("a", "governing law is the state of New York", 0.4, 3),
            candidate("b", "the governing law clause", 0.35, 7),
            candidate("c", "arbitration in New York", 0.5, 1),
        ];

        let first = reranker.rerank("governing law new york", candidates.clone(), 3);
        let second = reranker.rerank("governing law new york", candidates, 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_ties_keep_retrieval_order() {
        let reranker = Reranker::default();
        let candidates = vec![
            candidate("first", "same text", 0.2, 0),
            candidate("second", "same text", 0.2, 0),
            candidate("third", "same text", 0.2, 0),
        ];

        let ranked = reranker.rerank("text", candidates, 3);
        let ids: Vec<&str> = ranked.iter().map(|c| c.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_custom_weights() {
        let config = RerankConfig {
            weights: RerankWeights {
                semantic: 0.0,
                bm25: 0.0,
                phrase: 0.0,
                position: 1.0,
                length: 0.0,
            },
            ..Default::default()
        };
        let reranker = Reranker::new(config);
        let candidates = vec![
            candidate("late", "x", 0.0, 20),
            candidate("early", "x", 0.9, 0),
        ];

        let ranked = reranker.rerank("x", candidates, 2);
        assert_eq!(ranked[0].candidate.id, "early");
    }
}
