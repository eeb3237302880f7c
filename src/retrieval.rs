//! Retrieval Worker: answer a question with a generated answer and grounded
//! citations. Public operation: `query(question, options) -> Answer`.
//!
//! The pipeline runs candidate generation, MMR diversification, cross-encoder
//! reranking, parallel image retrieval, context assembly, answer generation,
//! and citation assembly in that order. Every downstream subsystem failure is
//! absorbed locally and surfaced as a warning rather than aborting the query.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde::Serialize;

use crate::config::{Config, SearchMode};
use crate::embedding;
use crate::generator::{self, Generator};
use crate::mmr::{self, MmrCandidate};
use crate::models::Chunk;
use crate::registry::DocumentRegistry;
use crate::reranker::{RerankCandidate, Reranker};
use crate::store::{self, ScoredChunk, ScoredImage, StoreBackend};

/// Every recognized query option, with defaults sourced from
/// [`crate::config::RetrievalConfig`] unless the caller overrides them.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub question: String,
    pub k: usize,
    pub search_mode: SearchMode,
    pub use_mmr: bool,
    pub mmr_lambda: f64,
    pub semantic_weight: f64,
    pub use_agentic_rag: bool,
    pub use_rerank: bool,
    pub max_context_tokens: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Restrict retrieval to chunks of this document. Filtered by the
    /// chunk's stable `document_id`, which tolerates renames by construction
    /// (unlike `source_name`, it never changes after intake).
    pub document_id: Option<String>,
    /// Restrict retrieval to these source names. Resolved against the
    /// registry's current `name` and `original_name` so a rename doesn't
    /// break a caller still asking for the pre-rename name.
    pub active_sources: Option<Vec<String>>,
    /// Force image retrieval even when the question doesn't look like it's
    /// asking about imagery. Set by the `/query/images` surface.
    pub include_images: bool,
}

impl QueryOptions {
    pub fn from_config(config: &Config, question: String) -> Self {
        let r = &config.retrieval;
        Self {
            question,
            k: r.k,
            search_mode: r.search_mode,
            use_mmr: r.use_mmr,
            mmr_lambda: r.mmr_lambda,
            semantic_weight: r.semantic_weight,
            use_agentic_rag: r.use_agentic_rag,
            use_rerank: r.use_rerank,
            max_context_tokens: r.max_context_tokens,
            temperature: r.temperature,
            max_tokens: r.max_tokens,
            document_id: None,
            active_sources: None,
            include_images: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub id: u32,
    pub source_name: String,
    pub page: Option<u32>,
    pub snippet: String,
    pub full_text: String,
    pub similarity_score: f64,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

/// Result of [`query`]. `warnings` enumerates retrieval-degradation events
/// (a skipped reranker, disabled embeddings, unknown `active_sources`, and
/// so on) — these never fail the query, they just narrow what was actually
/// done to answer it.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub image_citations: Vec<Citation>,
    pub sources: Vec<String>,
    pub num_chunks_used: usize,
    pub context_tokens: usize,
    pub response_tokens: usize,
    pub total_tokens: usize,
    pub generation_failed: bool,
    pub warnings: Vec<String>,
}

const IMAGERY_KEYWORDS: &[&str] = &[
    "image", "images", "picture", "pictures", "photo", "photos", "diagram", "diagrams",
    "figure", "figures", "screenshot", "screenshots", "scan", "scanned",
];

fn mentions_imagery(question: &str) -> bool {
    let lower = question.to_lowercase();
    IMAGERY_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

pub async fn query<R: Reranker>(
    config: &Config,
    store: &dyn StoreBackend,
    registry: &DocumentRegistry,
    generator: &dyn Generator,
    reranker: &R,
    options: QueryOptions,
) -> Result<Answer> {
    tracing::info!(question = %options.question, k = options.k, mode = ?options.search_mode, "query started");
    let mut warnings = Vec::new();
    let k = options.k.max(1);

    let effective_mode = if !config.embedding.is_enabled() && options.search_mode != SearchMode::Keyword {
        warnings.push("embeddings disabled, falling back to keyword search".to_string());
        SearchMode::Keyword
    } else {
        options.search_mode
    };

    // Step 1: optional agentic decomposition.
    let sub_questions = if options.use_agentic_rag {
        if config.generator.is_enabled() {
            match decompose_query(generator, &config.generator, &options.question).await {
                Ok(qs) if !qs.is_empty() => qs,
                _ => {
                    warnings.push(
                        "agentic decomposition produced no sub-questions, using direct retrieval"
                            .to_string(),
                    );
                    vec![options.question.clone()]
                }
            }
        } else {
            warnings.push("agentic decomposition requires a generator, using direct retrieval".to_string());
            vec![options.question.clone()]
        }
    } else {
        vec![options.question.clone()]
    };

    // Step 2: candidate generation, unioned across sub-questions.
    let pool_size = mmr::pool_size(k);
    let mut by_id: HashMap<String, ScoredChunk> = HashMap::new();
    for sub_question in &sub_questions {
        let candidates = candidate_chunks(
            config,
            store,
            effective_mode,
            sub_question,
            pool_size,
            options.semantic_weight,
            &mut warnings,
        )
        .await;
        for c in candidates {
            by_id
                .entry(c.chunk.chunk_id.clone())
                .and_modify(|existing| {
                    if c.score > existing.score {
                        *existing = c.clone();
                    }
                })
                .or_insert(c);
        }
    }
    let mut candidates: Vec<ScoredChunk> = by_id.into_values().collect();
    sort_fused(&mut candidates);

    candidates = restrict_to_sources(registry, candidates, &options, &mut warnings);

    // Step 3: MMR diversification.
    let pooled: Vec<ScoredChunk> = candidates.into_iter().take(pool_size).collect();
    let k_rerank = mmr::rerank_pool_size(k);
    let diversified: Vec<ScoredChunk> = if options.use_mmr {
        let mmr_input: Vec<MmrCandidate<ScoredChunk>> = pooled
            .into_iter()
            .map(|c| MmrCandidate {
                relevance: c.score,
                embedding: c.chunk.embedding.clone().unwrap_or_default(),
                item: c,
            })
            .collect();
        mmr::select(mmr_input, k_rerank, options.mmr_lambda)
    } else {
        pooled.into_iter().take(k_rerank).collect()
    };

    // Step 4: cross-encoder rerank.
    let mut top_k: Vec<(ScoredChunk, f64)> = if options.use_rerank {
        let rerank_candidates: Vec<RerankCandidate<ScoredChunk>> = diversified
            .into_iter()
            .map(|c| RerankCandidate { text: c.chunk.text.clone(), item: c })
            .collect();
        reranker.rerank(&options.question, rerank_candidates).await
    } else {
        diversified.into_iter().map(|c| { let s = c.score; (c, s) }).collect()
    };

    top_k.sort_by(|(a_chunk, a_score), (b_chunk, b_score)| {
        b_score
            .partial_cmp(a_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b_chunk.score.partial_cmp(&a_chunk.score).unwrap_or(Ordering::Equal))
            .then_with(|| a_chunk.chunk.source_name.cmp(&b_chunk.chunk.source_name))
            .then_with(|| a_chunk.chunk.chunk_index.cmp(&b_chunk.chunk.chunk_index))
    });
    top_k.truncate(k);
    let top_chunks: Vec<(Chunk, f64)> = top_k.into_iter().map(|(c, score)| (c.chunk, score)).collect();

    // Step 5: image retrieval, run regardless of text-retrieval outcome.
    let image_citations = if options.include_images || mentions_imagery(&options.question) {
        let mut images = candidate_images(
            config,
            store,
            effective_mode,
            &options.question,
            pool_size,
            options.semantic_weight,
            &mut warnings,
        )
        .await;
        sort_fused_images(&mut images);
        images.truncate(k);
        images
            .into_iter()
            .enumerate()
            .map(|(i, scored)| image_to_citation(i as u32 + 1, scored))
            .collect()
    } else {
        Vec::new()
    };

    // Step 6: context assembly.
    let (context, used_chunks) = assemble_context(&top_chunks, options.max_context_tokens);

    if used_chunks.is_empty() {
        return Ok(Answer {
            answer: "insufficient context".to_string(),
            citations: Vec::new(),
            image_citations,
            sources: Vec::new(),
            num_chunks_used: 0,
            context_tokens: 0,
            response_tokens: 0,
            total_tokens: 0,
            generation_failed: false,
            warnings,
        });
    }

    // Step 7: answer generation, with extractive fallback on failure.
    let (answer_text, response_tokens, generation_failed) = if config.generator.is_enabled() {
        match generator::generate(generator, &config.generator, &options.question, &context).await {
            Ok(text) => {
                let tokens = estimate_tokens(&text);
                (text, tokens, false)
            }
            Err(_) => {
                warnings.push("generator unavailable after retries, returning extractive fallback".to_string());
                (extractive_fallback(&used_chunks), 0, true)
            }
        }
    } else {
        warnings.push("generator disabled, returning extractive fallback".to_string());
        (extractive_fallback(&used_chunks), 0, true)
    };

    // Step 8: citation assembly.
    let citations = assemble_citations(&used_chunks, &answer_text);
    let context_tokens = estimate_tokens(&context);
    let mut sources: Vec<String> = used_chunks.iter().map(|(c, _)| c.source_name.clone()).collect();
    sources.sort();
    sources.dedup();

    if !warnings.is_empty() {
        tracing::warn!(?warnings, "query completed in degraded mode");
    }

    Ok(Answer {
        answer: answer_text,
        num_chunks_used: used_chunks.len(),
        citations,
        image_citations,
        sources,
        context_tokens,
        response_tokens,
        total_tokens: context_tokens + response_tokens,
        generation_failed,
        warnings,
    })
}

fn sort_fused(candidates: &mut [ScoredChunk]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.source_name.cmp(&b.chunk.source_name))
            .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
    });
}

fn sort_fused_images(images: &mut [ScoredImage]) {
    images.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.image.source_name.cmp(&b.image.source_name))
            .then_with(|| a.image.image_number.cmp(&b.image.image_number))
    });
}

/// Embed the question (if the mode needs it) and query one or both streams,
/// then fuse. Falls back to the single available stream's score directly
/// when only one side ran; a failing stream degrades to empty with a
/// warning rather than aborting the query.
async fn candidate_chunks(
    config: &Config,
    store: &dyn StoreBackend,
    mode: SearchMode,
    question: &str,
    pool_size: usize,
    semantic_weight: f64,
    warnings: &mut Vec<String>,
) -> Vec<ScoredChunk> {
    let lexical = if mode != SearchMode::Semantic {
        store.lexical_search_chunks(question, pool_size).await.unwrap_or_else(|e| {
            warnings.push(format!("lexical chunk search failed: {}", e));
            Vec::new()
        })
    } else {
        Vec::new()
    };

    let semantic = if mode != SearchMode::Keyword {
        match embed_question(config, question).await {
            Ok(query_vec) => store.semantic_search_chunks(&query_vec, pool_size).await.unwrap_or_else(|e| {
                warnings.push(format!("semantic chunk search failed: {}", e));
                Vec::new()
            }),
            Err(e) => {
                warnings.push(format!("embedding the query failed: {}", e));
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    match (lexical.is_empty(), semantic.is_empty()) {
        (false, false) => store::fuse_chunks(lexical, semantic, semantic_weight),
        (true, false) => semantic,
        (false, true) => lexical,
        (true, true) => Vec::new(),
    }
}

async fn candidate_images(
    config: &Config,
    store: &dyn StoreBackend,
    mode: SearchMode,
    question: &str,
    pool_size: usize,
    semantic_weight: f64,
    warnings: &mut Vec<String>,
) -> Vec<ScoredImage> {
    let lexical = if mode != SearchMode::Semantic {
        store.lexical_search_images(question, pool_size).await.unwrap_or_else(|e| {
            warnings.push(format!("lexical image search failed: {}", e));
            Vec::new()
        })
    } else {
        Vec::new()
    };

    let semantic = if mode != SearchMode::Keyword {
        match embed_question(config, question).await {
            Ok(query_vec) => store.semantic_search_images(&query_vec, pool_size).await.unwrap_or_else(|e| {
                warnings.push(format!("semantic image search failed: {}", e));
                Vec::new()
            }),
            Err(e) => {
                warnings.push(format!("embedding the query failed: {}", e));
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    match (lexical.is_empty(), semantic.is_empty()) {
        (false, false) => store::fuse_images(lexical, semantic, semantic_weight),
        (true, false) => semantic,
        (false, true) => lexical,
        (true, true) => Vec::new(),
    }
}

async fn embed_question(config: &Config, question: &str) -> Result<Vec<f32>> {
    let provider = embedding::create_provider(&config.embedding)?;
    embedding::embed_query(provider.as_ref(), &config.embedding, question).await
}

/// Apply `document_id`/`active_sources` restriction. An `active_sources`
/// list that matches no known document falls back to unrestricted search
/// with a warning rather than failing the query.
fn restrict_to_sources(
    registry: &DocumentRegistry,
    candidates: Vec<ScoredChunk>,
    options: &QueryOptions,
    warnings: &mut Vec<String>,
) -> Vec<ScoredChunk> {
    let mut candidates = candidates;

    if let Some(document_id) = &options.document_id {
        candidates.retain(|c| &c.chunk.document_id == document_id);
        return candidates;
    }

    if let Some(active_sources) = &options.active_sources {
        if active_sources.is_empty() {
            return candidates;
        }
        let wanted: HashSet<&str> = active_sources.iter().map(|s| s.as_str()).collect();
        let matching_document_ids: HashSet<String> = registry
            .list()
            .into_iter()
            .filter(|d| wanted.contains(d.name.as_str()) || wanted.contains(d.original_name.as_str()))
            .map(|d| d.document_id)
            .collect();

        if matching_document_ids.is_empty() {
            warnings.push(format!(
                "active_sources {:?} matched no known document, retrieval is unrestricted",
                active_sources
            ));
            return candidates;
        }

        candidates.retain(|c| matching_document_ids.contains(&c.chunk.document_id));
    }

    candidates
}

/// Concatenate chunks into a citation-tagged context, dropping from the tail
/// once `max_context_tokens` would be exceeded. Each chunk carries its fused/
/// reranked similarity score alongside it so citation assembly downstream
/// can report the real score instead of a placeholder.
fn assemble_context(chunks: &[(Chunk, f64)], max_context_tokens: usize) -> (String, Vec<(Chunk, f64)>) {
    let mut context = String::new();
    let mut used = Vec::new();
    let mut tokens_so_far = 0usize;

    for (i, (chunk, score)) in chunks.iter().enumerate() {
        let header = match chunk.page {
            Some(page) => format!("[{}] {} (page {})\n", i + 1, chunk.source_name, page),
            None => format!("[{}] {}\n", i + 1, chunk.source_name),
        };
        let block = format!("{}{}\n\n", header, chunk.text);
        let block_tokens = estimate_tokens(&block);
        if tokens_so_far + block_tokens > max_context_tokens && !used.is_empty() {
            break;
        }
        context.push_str(&block);
        tokens_so_far += block_tokens;
        used.push((chunk.clone(), *score));
    }

    (context, used)
}

/// Attach a Citation for every `[n]` tag actually present in the generated
/// answer. No dangling references.
fn assemble_citations(used_chunks: &[(Chunk, f64)], answer: &str) -> Vec<Citation> {
    let mentioned = mentioned_citation_ids(answer);
    used_chunks
        .iter()
        .enumerate()
        .filter(|(i, _)| mentioned.contains(&(*i as u32 + 1)))
        .map(|(i, (chunk, score))| Citation {
            id: i as u32 + 1,
            source_name: chunk.source_name.clone(),
            page: chunk.page,
            snippet: chunk.text.chars().take(200).collect(),
            full_text: chunk.text.clone(),
            similarity_score: *score,
            content_type: chunk.content_type.clone(),
            image_ref: None,
        })
        .collect()
}

fn mentioned_citation_ids(answer: &str) -> HashSet<u32> {
    let mut ids = HashSet::new();
    let bytes = answer.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == b']' {
                if let Ok(n) = answer[i + 1..j].parse::<u32>() {
                    ids.insert(n);
                }
            }
            i = j;
        } else {
            i += 1;
        }
    }
    ids
}

fn image_to_citation(id: u32, scored: ScoredImage) -> Citation {
    Citation {
        id,
        source_name: scored.image.source_name.clone(),
        page: scored.image.page,
        snippet: scored.image.ocr_text.chars().take(200).collect(),
        full_text: scored.image.ocr_text.clone(),
        similarity_score: scored.score,
        content_type: scored.image.content_type.clone(),
        image_ref: Some(scored.image.image_id.clone()),
    }
}

/// When the generator is unavailable, hand back the raw top-k chunks
/// verbatim rather than nothing. `generation_failed = true` flags this mode.
fn extractive_fallback(chunks: &[(Chunk, f64)]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, (c, _))| format!("[{}] {}", i + 1, c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Ask the generator to decompose `question` into 1-5 sub-questions, one per
/// line. Any malformed or empty response degrades to direct retrieval by the
/// caller (not an error here).
async fn decompose_query(
    generator: &dyn Generator,
    config: &crate::config::GeneratorConfig,
    question: &str,
) -> Result<Vec<String>> {
    let prompt = format!(
        "Break the following question into 1 to 5 independent sub-questions, one per line, \
         with no numbering or commentary. If the question is already singular, return it \
         unchanged as the only line.\n\nQuestion: {}",
        question
    );
    let raw = generator::generate(generator, config, &prompt, "").await?;
    let sub_questions: Vec<String> = raw
        .lines()
        .map(|l| l.trim().trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c == '-').trim())
        .filter(|l| !l.is_empty())
        .take(5)
        .map(|l| l.to_string())
        .collect();
    Ok(sub_questions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source_name: &str, chunk_index: i64, text: &str) -> Chunk {
        Chunk {
            chunk_id: format!("{}-{}", source_name, chunk_index),
            document_id: "doc1".to_string(),
            source_name: source_name.to_string(),
            page: Some(1),
            chunk_index,
            token_count: text.split_whitespace().count(),
            text: text.to_string(),
            embedding: None,
            content_type: "text".to_string(),
        }
    }

    #[test]
    fn mentioned_citation_ids_finds_all_tags() {
        let ids = mentioned_citation_ids("As shown in [1] and confirmed by [3], not [abc].");
        assert_eq!(ids, HashSet::from([1, 3]));
    }

    #[test]
    fn assemble_context_drops_tail_past_budget() {
        let chunks = vec![
            (chunk("a.txt", 0, &"word ".repeat(10)), 0.9),
            (chunk("a.txt", 1, &"word ".repeat(10)), 0.8),
            (chunk("a.txt", 2, &"word ".repeat(10)), 0.7),
        ];
        let (_, used) = assemble_context(&chunks, 15);
        assert!(used.len() < chunks.len());
        assert!(!used.is_empty());
    }

    #[test]
    fn assemble_context_keeps_at_least_one_chunk_over_budget() {
        let chunks = vec![(chunk("a.txt", 0, &"word ".repeat(50)), 0.5)];
        let (_, used) = assemble_context(&chunks, 1);
        assert_eq!(used.len(), 1);
    }

    #[test]
    fn assemble_citations_has_no_dangling_references() {
        let chunks = vec![(chunk("a.txt", 0, "alpha"), 0.5), (chunk("a.txt", 1, "beta"), 0.5)];
        let citations = assemble_citations(&chunks, "Answer cites [1] only.");
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].id, 1);
    }

    #[test]
    fn assemble_citations_reports_real_similarity_score() {
        let chunks = vec![(chunk("a.txt", 0, "alpha"), 0.0), (chunk("a.txt", 1, "beta"), 0.73)];
        let citations = assemble_citations(&chunks, "Answer cites [1] and [2].");
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].similarity_score, 0.0);
        assert_eq!(citations[1].similarity_score, 0.73);
    }

    #[test]
    fn mentions_imagery_detects_keywords() {
        assert!(mentions_imagery("What does the diagram show?"));
        assert!(!mentions_imagery("What is the tolerance?"));
    }
}
