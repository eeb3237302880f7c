//! Cross-encoder reranking stage.
//!
//! Runs after MMR diversification: takes the `k_rerank = 3*k` MMR survivors
//! and re-scores each query/chunk pair jointly, then truncates to `k`. No
//! cross-encoder model ships in this dependency stack, so the default
//! reranker falls back to a lexical-overlap scorer; a real cross-encoder
//! provider can be plugged in behind the same trait without touching the
//! retrieval pipeline.

use async_trait::async_trait;

/// One item going through reranking: an opaque payload plus the text to
/// score against the query.
pub struct RerankCandidate<T> {
    pub item: T,
    pub text: String,
}

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score every candidate against `query`, return `(item, score)` pairs
    /// sorted by descending score. Does not truncate — callers slice to `k`.
    async fn rerank<T: Send + 'static>(
        &self,
        query: &str,
        candidates: Vec<RerankCandidate<T>>,
    ) -> Vec<(T, f64)>;
}

/// Jaccard-style overlap between query and candidate tokens, case-folded.
/// A reasonable proxy for relevance when no cross-encoder model is
/// configured, used by default and as the fallback on provider error.
pub struct LexicalOverlapReranker;

#[async_trait]
impl Reranker for LexicalOverlapReranker {
    async fn rerank<T: Send + 'static>(
        &self,
        query: &str,
        candidates: Vec<RerankCandidate<T>>,
    ) -> Vec<(T, f64)> {
        let query_tokens = tokenize(query);
        let mut scored: Vec<(T, f64)> = candidates
            .into_iter()
            .map(|c| {
                let score = overlap_score(&query_tokens, &tokenize(&c.text));
                (c.item, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }
}

fn tokenize(s: &str) -> std::collections::HashSet<String> {
    s.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn overlap_score(
    query_tokens: &std::collections::HashSet<String>,
    candidate_tokens: &std::collections::HashSet<String>,
) -> f64 {
    if query_tokens.is_empty() || candidate_tokens.is_empty() {
        return 0.0;
    }
    let intersection = query_tokens.intersection(candidate_tokens).count();
    let union = query_tokens.union(candidate_tokens).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ranks_exact_match_highest() {
        let reranker = LexicalOverlapReranker;
        let candidates = vec![
            RerankCandidate {
                item: "a",
                text: "rust programming language".to_string(),
            },
            RerankCandidate {
                item: "b",
                text: "totally unrelated text".to_string(),
            },
        ];
        let scored = reranker.rerank("rust programming", candidates).await;
        assert_eq!(scored[0].0, "a");
        assert!(scored[0].1 >= scored[1].1);
    }

    #[tokio::test]
    async fn empty_query_scores_zero() {
        let reranker = LexicalOverlapReranker;
        let candidates = vec![RerankCandidate {
            item: "a",
            text: "some text".to_string(),
        }];
        let scored = reranker.rerank("", candidates).await;
        assert_eq!(scored[0].1, 0.0);
    }
}
