//! SQLite-backed [`StoreBackend`]: FTS5 for lexical search, brute-force
//! cosine scan over the `*_vectors` BLOB tables for semantic search.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use sqlx::{Row, SqlitePool};

use crate::embedding;
use crate::models::{Chunk, ImageRecord, OcrQualityMetrics};

use super::{ScoredChunk, ScoredImage, StoreBackend};

const RETRY_BASE_MS: u64 = 500;
const RETRY_MAX_ATTEMPTS: u32 = 5;

/// Exponential backoff with jitter around a fallible SQLite operation: base
/// 500ms, factor 2, up to 5 attempts. Retries only `SQLITE_BUSY`/`SQLITE_LOCKED`
/// and pool/IO timeouts; everything else (constraint violations, bad SQL)
/// fails on the first attempt.
async fn with_retry<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut last_err = None;
    for attempt in 0..RETRY_MAX_ATTEMPTS {
        if attempt > 0 {
            let backoff_ms = RETRY_BASE_MS * 2u64.pow(attempt - 1);
            let jitter_ms = rand::thread_rng().gen_range(0..=backoff_ms / 2);
            tokio::time::sleep(Duration::from_millis(backoff_ms + jitter_ms)).await;
        }
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if is_transient(&e) => {
                last_err = Some(e);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(last_err.expect("loop body runs at least once").into())
}

fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(db_err.code().as_deref(), Some("5") | Some("6")),
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        _ => false,
    }
}

pub struct LocalSqliteStore {
    pool: SqlitePool,
}

impl LocalSqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StoreBackend for LocalSqliteStore {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        with_retry(|| async {
            let mut tx = self.pool.begin().await?;
            for chunk in chunks {
                sqlx::query(
                    r#"
                    INSERT INTO chunks
                        (chunk_id, document_id, source_name, page, chunk_index, token_count, text, content_type, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, strftime('%s','now'))
                    ON CONFLICT(document_id, chunk_index) DO UPDATE SET
                        text = excluded.text, token_count = excluded.token_count
                    "#,
                )
                .bind(&chunk.chunk_id)
                .bind(&chunk.document_id)
                .bind(&chunk.source_name)
                .bind(chunk.page)
                .bind(chunk.chunk_index)
                .bind(chunk.token_count as i64)
                .bind(&chunk.text)
                .bind(&chunk.content_type)
                .execute(&mut *tx)
                .await?;

                sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
                    .bind(&chunk.chunk_id)
                    .bind(&chunk.document_id)
                    .bind(&chunk.text)
                    .execute(&mut *tx)
                    .await?;

                if let Some(embedding) = &chunk.embedding {
                    sqlx::query(
                        "INSERT OR REPLACE INTO chunk_vectors (chunk_id, document_id, embedding) VALUES (?, ?, ?)",
                    )
                    .bind(&chunk.chunk_id)
                    .bind(&chunk.document_id)
                    .bind(embedding::vec_to_blob(embedding))
                    .execute(&mut *tx)
                    .await?;
                }
            }
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn insert_images(&self, images: &[ImageRecord]) -> Result<()> {
        with_retry(|| async {
            let mut tx = self.pool.begin().await?;
            for image in images {
                sqlx::query(
                    r#"
                    INSERT INTO image_records
                        (image_id, document_id, source_name, page, image_number, ocr_text,
                         char_count, word_count, confidence, content_type, extraction_method,
                         is_placeholder, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, strftime('%s','now'))
                    ON CONFLICT(document_id, image_number) DO UPDATE SET
                        ocr_text = excluded.ocr_text
                    "#,
                )
                .bind(&image.image_id)
                .bind(&image.document_id)
                .bind(&image.source_name)
                .bind(image.page)
                .bind(image.image_number)
                .bind(&image.ocr_text)
                .bind(image.ocr_quality_metrics.char_count as i64)
                .bind(image.ocr_quality_metrics.word_count as i64)
                .bind(image.ocr_quality_metrics.confidence)
                .bind(&image.content_type)
                .bind(&image.extraction_method)
                .bind(image.is_placeholder)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "INSERT INTO image_records_fts (image_id, document_id, ocr_text) VALUES (?, ?, ?)",
                )
                .bind(&image.image_id)
                .bind(&image.document_id)
                .bind(&image.ocr_text)
                .execute(&mut *tx)
                .await?;

                if let Some(embedding) = &image.embedding {
                    sqlx::query(
                        "INSERT OR REPLACE INTO image_vectors (image_id, document_id, embedding) VALUES (?, ?, ?)",
                    )
                    .bind(&image.image_id)
                    .bind(&image.document_id)
                    .bind(embedding::vec_to_blob(embedding))
                    .execute(&mut *tx)
                    .await?;
                }
            }
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<()> {
        with_retry(|| async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
                .bind(document_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
                .bind(document_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM chunks WHERE document_id = ?")
                .bind(document_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM image_records_fts WHERE document_id = ?")
                .bind(document_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM image_vectors WHERE document_id = ?")
                .bind(document_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM image_records WHERE document_id = ?")
                .bind(document_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn delete_images_by_document(&self, document_id: &str) -> Result<()> {
        with_retry(|| async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM image_records_fts WHERE document_id = ?")
                .bind(document_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM image_vectors WHERE document_id = ?")
                .bind(document_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM image_records WHERE document_id = ?")
                .bind(document_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn lexical_search_chunks(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        with_retry(|| async {
            let rows = sqlx::query(
                r#"
                SELECT c.chunk_id, c.document_id, c.source_name, c.page, c.chunk_index,
                       c.token_count, c.text, c.content_type, f.rank AS rank
                FROM chunks_fts f
                JOIN chunks c ON c.chunk_id = f.chunk_id
                WHERE chunks_fts MATCH ?
                ORDER BY f.rank
                LIMIT ?
                "#,
            )
            .bind(query)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await?;

            Ok(rows
                .iter()
                .map(|row| {
                    let rank: f64 = row.get("rank");
                    ScoredChunk {
                        chunk: row_to_chunk(row),
                        score: -rank,
                    }
                })
                .collect())
        })
        .await
    }

    async fn semantic_search_chunks(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        with_retry(|| async {
            let rows = sqlx::query(
                r#"
                SELECT c.chunk_id, c.document_id, c.source_name, c.page, c.chunk_index,
                       c.token_count, c.text, c.content_type, cv.embedding AS embedding
                FROM chunk_vectors cv
                JOIN chunks c ON c.chunk_id = cv.chunk_id
                "#,
            )
            .fetch_all(&self.pool)
            .await?;

            let mut scored: Vec<ScoredChunk> = rows
                .iter()
                .map(|row| {
                    let blob: Vec<u8> = row.get("embedding");
                    let vec = embedding::blob_to_vec(&blob);
                    let score = embedding::cosine_similarity(query_vec, &vec) as f64;
                    let mut chunk = row_to_chunk(row);
                    chunk.embedding = Some(vec);
                    ScoredChunk { chunk, score }
                })
                .collect();

            scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);
            Ok(scored)
        })
        .await
    }

    async fn lexical_search_images(&self, query: &str, k: usize) -> Result<Vec<ScoredImage>> {
        with_retry(|| async {
            let rows = sqlx::query(
                r#"
                SELECT i.image_id, i.document_id, i.source_name, i.page, i.image_number,
                       i.ocr_text, i.char_count, i.word_count, i.confidence, i.content_type,
                       i.extraction_method, i.is_placeholder, f.rank AS rank
                FROM image_records_fts f
                JOIN image_records i ON i.image_id = f.image_id
                WHERE image_records_fts MATCH ?
                ORDER BY f.rank
                LIMIT ?
                "#,
            )
            .bind(query)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await?;

            Ok(rows
                .iter()
                .map(|row| {
                    let rank: f64 = row.get("rank");
                    ScoredImage {
                        image: row_to_image(row),
                        score: -rank,
                    }
                })
                .collect())
        })
        .await
    }

    async fn semantic_search_images(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredImage>> {
        with_retry(|| async {
            let rows = sqlx::query(
                r#"
                SELECT i.image_id, i.document_id, i.source_name, i.page, i.image_number,
                       i.ocr_text, i.char_count, i.word_count, i.confidence, i.content_type,
                       i.extraction_method, i.is_placeholder, iv.embedding AS embedding
                FROM image_vectors iv
                JOIN image_records i ON i.image_id = iv.image_id
                "#,
            )
            .fetch_all(&self.pool)
            .await?;

            let mut scored: Vec<ScoredImage> = rows
                .iter()
                .map(|row| {
                    let blob: Vec<u8> = row.get("embedding");
                    let vec = embedding::blob_to_vec(&blob);
                    let score = embedding::cosine_similarity(query_vec, &vec) as f64;
                    let mut image = row_to_image(row);
                    image.embedding = Some(vec);
                    ScoredImage { image, score }
                })
                .collect();

            scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);
            Ok(scored)
        })
        .await
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        with_retry(|| async {
            let row = sqlx::query(
                "SELECT chunk_id, document_id, source_name, page, chunk_index, token_count, text, content_type FROM chunks WHERE chunk_id = ?",
            )
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(|r| row_to_chunk(&r)))
        })
        .await
    }

    async fn get_image(&self, image_id: &str) -> Result<Option<ImageRecord>> {
        with_retry(|| async {
            let row = sqlx::query(
                "SELECT image_id, document_id, source_name, page, image_number, ocr_text, char_count, word_count, confidence, content_type, extraction_method, is_placeholder FROM image_records WHERE image_id = ?",
            )
            .bind(image_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(|r| row_to_image(&r)))
        })
        .await
    }

    async fn list_documents_in_index(&self) -> Result<Vec<String>> {
        with_retry(|| async {
            let rows = sqlx::query("SELECT DISTINCT document_id FROM chunks")
                .fetch_all(&self.pool)
                .await?;
            Ok(rows.iter().map(|r| r.get("document_id")).collect())
        })
        .await
    }

    async fn index_exists(&self) -> Result<bool> {
        with_retry(|| async {
            sqlx::query_scalar(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks'",
            )
            .fetch_one(&self.pool)
            .await
        })
        .await
    }

    async fn list_chunks_by_page(&self, document_id: &str, page: u32) -> Result<Vec<Chunk>> {
        with_retry(|| async {
            let rows = sqlx::query(
                "SELECT chunk_id, document_id, source_name, page, chunk_index, token_count, text, content_type \
                 FROM chunks WHERE document_id = ? AND page = ? ORDER BY chunk_index",
            )
            .bind(document_id)
            .bind(page as i64)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.iter().map(row_to_chunk).collect())
        })
        .await
    }

    async fn list_images_by_page(&self, document_id: &str, page: u32) -> Result<Vec<ImageRecord>> {
        with_retry(|| async {
            let rows = sqlx::query(
                "SELECT image_id, document_id, source_name, page, image_number, ocr_text, char_count, \
                 word_count, confidence, content_type, extraction_method, is_placeholder \
                 FROM image_records WHERE document_id = ? AND page = ? ORDER BY image_number",
            )
            .bind(document_id)
            .bind(page as i64)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.iter().map(row_to_image).collect())
        })
        .await
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    Chunk {
        chunk_id: row.get("chunk_id"),
        document_id: row.get("document_id"),
        source_name: row.get("source_name"),
        page: row.get::<Option<i64>, _>("page").map(|p| p as u32),
        chunk_index: row.get("chunk_index"),
        token_count: row.get::<i64, _>("token_count") as usize,
        text: row.get("text"),
        embedding: None,
        content_type: row.get("content_type"),
    }
}

fn row_to_image(row: &sqlx::sqlite::SqliteRow) -> ImageRecord {
    ImageRecord {
        image_id: row.get("image_id"),
        document_id: row.get("document_id"),
        source_name: row.get("source_name"),
        page: row.get::<Option<i64>, _>("page").map(|p| p as u32),
        image_number: row.get::<i64, _>("image_number") as u32,
        ocr_text: row.get("ocr_text"),
        ocr_quality_metrics: OcrQualityMetrics {
            char_count: row.get::<i64, _>("char_count") as usize,
            word_count: row.get::<i64, _>("word_count") as usize,
            confidence: row.get("confidence"),
        },
        embedding: None,
        content_type: row.get("content_type"),
        extraction_method: row.get("extraction_method"),
        is_placeholder: row.get("is_placeholder"),
    }
}
