//! Document Store abstraction over the dual-index (text/image) schema.
//!
//! Both streams get the same capability set: insert a batch, delete all rows
//! for a document, run lexical (FTS5 BM25) and semantic (cosine) search, and
//! fetch a record by id. Hybrid fusion is a store-level helper built from
//! those two primitives: min-max-normalize each side's scores, then merge by
//! weighted sum.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::models::{Chunk, ImageRecord};

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct ScoredImage {
    pub image: ImageRecord,
    pub score: f64,
}

/// Capability set a Document Store backend exposes for the text stream.
/// The image stream (`image_records`/`image_records_fts`) mirrors this
/// exactly with its own methods below — the two streams are never merged.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()>;
    async fn insert_images(&self, images: &[ImageRecord]) -> Result<()>;

    async fn delete_by_document(&self, document_id: &str) -> Result<()>;

    /// Delete only the image stream for a document, leaving its chunks
    /// untouched. Used by image re-ingest, which replaces detected images
    /// without disturbing the text index already committed for the document.
    async fn delete_images_by_document(&self, document_id: &str) -> Result<()>;

    async fn lexical_search_chunks(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>>;
    async fn semantic_search_chunks(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    async fn lexical_search_images(&self, query: &str, k: usize) -> Result<Vec<ScoredImage>>;
    async fn semantic_search_images(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredImage>>;

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>>;
    async fn get_image(&self, image_id: &str) -> Result<Option<ImageRecord>>;

    async fn list_documents_in_index(&self) -> Result<Vec<String>>;
    async fn index_exists(&self) -> Result<bool>;

    /// Chunks and images recorded for a single page of a document, in
    /// ingest order. Backs `GET /documents/{id}/pages/{page}`.
    async fn list_chunks_by_page(&self, document_id: &str, page: u32) -> Result<Vec<Chunk>>;
    async fn list_images_by_page(&self, document_id: &str, page: u32) -> Result<Vec<ImageRecord>>;
}

/// Min-max normalize raw scores to `[0.0, 1.0]`. All-equal scores normalize
/// to `1.0`.
pub fn normalize_scores(raw: &[(String, f64)]) -> HashMap<String, f64> {
    if raw.is_empty() {
        return HashMap::new();
    }
    let min = raw.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let max = raw
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::NEG_INFINITY, f64::max);

    raw.iter()
        .map(|(id, s)| {
            let norm = if (max - min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - min) / (max - min)
            };
            (id.clone(), norm)
        })
        .collect()
}

/// Fuse lexical and semantic chunk candidates by weighted min-max-normalized
/// score: `score = (1 - semantic_weight) * lexical + semantic_weight * semantic`.
/// Missing from one side counts as `0.0` on that side.
pub fn fuse_chunks(
    lexical: Vec<ScoredChunk>,
    semantic: Vec<ScoredChunk>,
    semantic_weight: f64,
) -> Vec<ScoredChunk> {
    let lex_raw: Vec<(String, f64)> = lexical
        .iter()
        .map(|c| (c.chunk.chunk_id.clone(), c.score))
        .collect();
    let sem_raw: Vec<(String, f64)> = semantic
        .iter()
        .map(|c| (c.chunk.chunk_id.clone(), c.score))
        .collect();

    let lex_norm = normalize_scores(&lex_raw);
    let sem_norm = normalize_scores(&sem_raw);

    // Semantic candidates carry their decoded embedding vector (needed by MMR
    // downstream); prefer that copy over the lexical one when a chunk
    // appears in both streams.
    let mut by_id: HashMap<String, Chunk> = HashMap::new();
    for c in semantic.into_iter().chain(lexical.into_iter()) {
        by_id.entry(c.chunk.chunk_id.clone()).or_insert(c.chunk);
    }

    let mut fused: Vec<ScoredChunk> = by_id
        .into_iter()
        .map(|(id, chunk)| {
            let l = lex_norm.get(&id).copied().unwrap_or(0.0);
            let s = sem_norm.get(&id).copied().unwrap_or(0.0);
            let score = (1.0 - semantic_weight) * l + semantic_weight * s;
            ScoredChunk { chunk, score }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });

    fused
}

/// Same fusion rule as [`fuse_chunks`], applied to the image stream. The two
/// streams never share a ranked list (dual-stream invariant) but the fusion
/// math is identical.
pub fn fuse_images(
    lexical: Vec<ScoredImage>,
    semantic: Vec<ScoredImage>,
    semantic_weight: f64,
) -> Vec<ScoredImage> {
    let lex_raw: Vec<(String, f64)> = lexical
        .iter()
        .map(|i| (i.image.image_id.clone(), i.score))
        .collect();
    let sem_raw: Vec<(String, f64)> = semantic
        .iter()
        .map(|i| (i.image.image_id.clone(), i.score))
        .collect();

    let lex_norm = normalize_scores(&lex_raw);
    let sem_norm = normalize_scores(&sem_raw);

    let mut by_id: HashMap<String, ImageRecord> = HashMap::new();
    for i in semantic.into_iter().chain(lexical.into_iter()) {
        by_id.entry(i.image.image_id.clone()).or_insert(i.image);
    }

    let mut fused: Vec<ScoredImage> = by_id
        .into_iter()
        .map(|(id, image)| {
            let l = lex_norm.get(&id).copied().unwrap_or(0.0);
            let s = sem_norm.get(&id).copied().unwrap_or(0.0);
            let score = (1.0 - semantic_weight) * l + semantic_weight * s;
            ScoredImage { image, score }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.image.image_id.cmp(&b.image.image_id))
    });

    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            document_id: "doc1".to_string(),
            source_name: "a.txt".to_string(),
            page: None,
            chunk_index: 0,
            token_count: 1,
            text: "x".to_string(),
            embedding: None,
            content_type: "text".to_string(),
        }
    }

    #[test]
    fn normalize_empty_is_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn normalize_all_equal_is_one() {
        let raw = vec![("a".to_string(), 5.0), ("b".to_string(), 5.0)];
        let norm = normalize_scores(&raw);
        assert_eq!(norm["a"], 1.0);
        assert_eq!(norm["b"], 1.0);
    }

    #[test]
    fn fuse_prefers_items_present_in_both_streams() {
        let lexical = vec![
            ScoredChunk {
                chunk: chunk("a"),
                score: 1.0,
            },
            ScoredChunk {
                chunk: chunk("b"),
                score: 0.1,
            },
        ];
        let semantic = vec![ScoredChunk {
            chunk: chunk("a"),
            score: 1.0,
        }];
        let fused = fuse_chunks(lexical, semantic, 0.5);
        assert_eq!(fused[0].chunk.chunk_id, "a");
    }

    #[test]
    fn fuse_semantic_weight_zero_is_pure_lexical() {
        let lexical = vec![
            ScoredChunk {
                chunk: chunk("a"),
                score: 1.0,
            },
            ScoredChunk {
                chunk: chunk("b"),
                score: 0.0,
            },
        ];
        let semantic = vec![ScoredChunk {
            chunk: chunk("b"),
            score: 1.0,
        }];
        let fused = fuse_chunks(lexical, semantic, 0.0);
        assert_eq!(fused[0].chunk.chunk_id, "a");
    }
}
