//! Database schema migrations.
//!
//! Creates the two parallel index pairs the Document Store exposes — `chunks`
//! / `chunks_fts` for the text stream and `image_records` / `image_records_fts`
//! for the image-OCR stream — plus their vector-blob sidecar tables. Documents
//! themselves are not stored here: the Gateway's Document Registry is a
//! separate file-backed store (see `registry.rs`); this schema holds only the
//! two streams the Document Store owns. Idempotent, run via `ragctl migrate`
//! or automatically at `ragctl serve` startup.

use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            source_name TEXT NOT NULL,
            page INTEGER,
            chunk_index INTEGER NOT NULL,
            token_count INTEGER NOT NULL,
            text TEXT NOT NULL,
            content_type TEXT NOT NULL DEFAULT 'text',
            created_at INTEGER NOT NULL,
            UNIQUE(document_id, chunk_index)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(chunk_id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    let chunks_fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(&pool)
    .await?;
    if !chunks_fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                document_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(&pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS image_records (
            image_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            source_name TEXT NOT NULL,
            page INTEGER,
            image_number INTEGER NOT NULL,
            ocr_text TEXT NOT NULL DEFAULT '',
            char_count INTEGER NOT NULL DEFAULT 0,
            word_count INTEGER NOT NULL DEFAULT 0,
            confidence REAL,
            content_type TEXT NOT NULL DEFAULT 'image_ocr',
            extraction_method TEXT NOT NULL,
            is_placeholder INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            UNIQUE(document_id, image_number)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS image_vectors (
            image_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (image_id) REFERENCES image_records(image_id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    let images_fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='image_records_fts'",
    )
    .fetch_one(&pool)
    .await?;
    if !images_fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE image_records_fts USING fts5(
                image_id UNINDEXED,
                document_id UNINDEXED,
                ocr_text
            )
            "#,
        )
        .execute(&pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_document_id ON chunk_vectors(document_id)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_image_records_document_id ON image_records(document_id)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_image_vectors_document_id ON image_vectors(document_id)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}
