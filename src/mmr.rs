//! Maximal Marginal Relevance diversification.
//!
//! Applied after candidate fusion and before cross-encoder reranking: pulls
//! a diverse top-k out of a larger candidate pool by trading off relevance
//! against redundancy with what's already selected.

/// One scored candidate going into MMR selection. `embedding` must be
/// L2-normalized (see [`crate::embedding::embed_batch`]) so that the
/// dot product below is a cosine similarity.
pub struct MmrCandidate<T> {
    pub item: T,
    pub relevance: f64,
    pub embedding: Vec<f32>,
}

/// Select `k` items from `candidates` by Maximal Marginal Relevance:
///
/// ```text
/// MMR = argmax_{d in candidates \ selected} [ lambda * relevance(d)
///                                              - (1 - lambda) * max_{s in selected} sim(d, s) ]
/// ```
///
/// `lambda` closer to 1.0 favors relevance, closer to 0.0 favors diversity.
/// Ties in MMR score are broken by the higher original `relevance`, then by
/// input order, so the result is deterministic.
pub fn select<T>(mut candidates: Vec<MmrCandidate<T>>, k: usize, lambda: f64) -> Vec<T> {
    let mut selected: Vec<MmrCandidate<T>> = Vec::new();

    while !candidates.is_empty() && selected.len() < k {
        let mut best_idx = 0;
        let mut best_score = f64::NEG_INFINITY;

        for (idx, candidate) in candidates.iter().enumerate() {
            let max_sim = selected
                .iter()
                .map(|s| cosine(&candidate.embedding, &s.embedding) as f64)
                .fold(0.0_f64, f64::max);
            let score = lambda * candidate.relevance - (1.0 - lambda) * max_sim;

            if score > best_score
                || (score == best_score && candidate.relevance > candidates[best_idx].relevance)
            {
                best_score = score;
                best_idx = idx;
            }
        }

        selected.push(candidates.remove(best_idx));
    }

    selected.into_iter().map(|c| c.item).collect()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// `k_pool`: how many fused candidates MMR is allowed to choose from —
/// `max(50, 5*k)`.
pub fn pool_size(k: usize) -> usize {
    (5 * k).max(50)
}

/// `k_rerank`: how many MMR-selected items are handed to the cross-encoder
/// reranker before truncating to `k` — `3*k`.
pub fn rerank_pool_size(k: usize) -> usize {
    3 * k
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(item: &str, relevance: f64, embedding: Vec<f32>) -> MmrCandidate<String> {
        MmrCandidate {
            item: item.to_string(),
            relevance,
            embedding,
        }
    }

    #[test]
    fn picks_most_relevant_first() {
        let candidates = vec![
            candidate("a", 0.9, vec![1.0, 0.0]),
            candidate("b", 0.5, vec![0.0, 1.0]),
        ];
        let result = select(candidates, 1, 0.7);
        assert_eq!(result, vec!["a".to_string()]);
    }

    #[test]
    fn prefers_diversity_for_near_duplicate_high_scorers() {
        let candidates = vec![
            candidate("a", 0.9, vec![1.0, 0.0]),
            candidate("a_dup", 0.89, vec![1.0, 0.0]),
            candidate("b", 0.6, vec![0.0, 1.0]),
        ];
        let result = select(candidates, 2, 0.5);
        assert_eq!(result[0], "a");
        assert_eq!(result[1], "b");
    }

    #[test]
    fn lambda_one_is_pure_relevance_ranking() {
        let candidates = vec![
            candidate("a", 0.9, vec![1.0, 0.0]),
            candidate("a_dup", 0.89, vec![1.0, 0.0]),
            candidate("b", 0.6, vec![0.0, 1.0]),
        ];
        let result = select(candidates, 3, 1.0);
        assert_eq!(result, vec!["a", "a_dup", "b"]);
    }

    #[test]
    fn k_larger_than_pool_returns_all() {
        let candidates = vec![candidate("a", 0.9, vec![1.0, 0.0])];
        let result = select(candidates, 5, 0.7);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn pool_sizes_match_spec_formula() {
        assert_eq!(pool_size(6), 50);
        assert_eq!(pool_size(20), 100);
        assert_eq!(rerank_pool_size(6), 18);
    }
}
