//! Ingestion Worker: turn one uploaded document into durable Chunks and
//! ImageRecords.
//!
//! The pipeline is sequential through text extraction, then parallelizes
//! embedding over batches bounded by a semaphore, then writes both index
//! streams concurrently. Every step is a checkpoint: failures are attributed
//! to the step that produced them and folded into the final DocumentRecord's
//! `status`/`error`/`processing_metadata`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::chunk;
use crate::config::{ChunkingStrategy, Config};
use crate::embedding;
use crate::extract::{self, ContentClass};
use crate::models::{Chunk, Document, DocumentStatus, ImageRecord, OcrQualityMetrics, Page, UploadMetadata};
use crate::ocr::{self, OcrProvider};
use crate::progress::{IngestPhase, IngestProgressEvent, IngestProgressReporter};
use crate::registry::DocumentRegistry;
use crate::store::StoreBackend;

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// `auto` (None) | `fast` | `ocr` | `image_model` — disables fallback when set.
    pub parser_preference: Option<String>,
    pub chunking_strategy: Option<ChunkingStrategy>,
}

/// Ingest `source_bytes` as a new document.
pub async fn ingest(
    config: &Config,
    registry: &DocumentRegistry,
    store: &dyn StoreBackend,
    ocr_provider: &dyn OcrProvider,
    content_type: &str,
    source_bytes: &[u8],
    source_name: &str,
    options: IngestOptions,
    progress: &dyn IngestProgressReporter,
) -> Result<Document> {
    let started = Instant::now();

    // Step 1: intake.
    let document_id = Uuid::new_v4().to_string();
    tracing::info!(%document_id, source_name, content_type, bytes = source_bytes.len(), "ingest started");
    let file_hash = sha256_hex(source_bytes);
    progress.report(IngestProgressEvent {
        document_id: document_id.clone(),
        phase: IngestPhase::Intake,
        n: 0,
        total: 0,
    });
    registry
        .write_blob(&document_id, source_name, source_bytes)
        .context("persisting uploaded blob")?;

    let upload = UploadMetadata {
        source: "upload".to_string(),
        timestamp: chrono::Utc::now(),
        size_bytes: source_bytes.len() as u64,
        uploader: None,
    };
    let mut document = Document::new(document_id.clone(), source_name.to_string(), file_hash, upload);
    registry
        .add(document.clone())
        .map_err(|e| anyhow::anyhow!("registering document: {}", e))?;
    document.status = DocumentStatus::Processing;

    // Step 2-3: parser selection + text extraction.
    progress.report(IngestProgressEvent {
        document_id: document_id.clone(),
        phase: IngestPhase::ParserSelection,
        n: 0,
        total: 0,
    });
    let class = extract::classify(source_bytes, content_type);
    let chain = extract::parser_chain(
        content_type,
        class,
        ocr_provider,
        options.parser_preference.as_deref(),
    );

    if chain.is_empty() {
        return finish_failed(
            registry,
            document,
            format!("no parser available for content-type '{}'", content_type),
        );
    }

    // A parser invocation is CPU-bound, synchronous work (pdf-extract / zip /
    // quick-xml parsing); each attempt in the preference list is tried in
    // turn, the first to succeed wins, with no intervening async suspension
    // point to cancel against mid-parse.
    let mut pages: Vec<Page> = Vec::new();
    let mut parser_attempts: Vec<String> = Vec::new();
    let mut parsed_with: Option<String> = None;

    for parser in &chain {
        parser_attempts.push(parser.name().to_string());
        match parser.parse(source_bytes) {
            Ok(result_pages) => {
                pages = result_pages;
                parsed_with = Some(parser.name().to_string());
                break;
            }
            Err(_) => continue,
        }
    }

    let parser_used = match parsed_with {
        Some(name) => name,
        None => {
            return finish_failed(
                registry,
                document,
                "all parsers in the fallback chain failed".to_string(),
            );
        }
    };
    document.parser_used = Some(parser_used.clone());

    progress.report(IngestProgressEvent {
        document_id: document_id.clone(),
        phase: IngestPhase::TextExtraction,
        n: pages.len() as u64,
        total: pages.len() as u64,
    });

    let total_text_length: usize = pages.iter().map(|p| p.text.len()).sum();
    let total_extracted_images: usize = pages.iter().map(|p| p.extracted_images.len()).sum();

    if total_text_length == 0 && total_extracted_images == 0 {
        return finish_failed(registry, document, "parser extracted no text".to_string());
    }

    // Scanned-image class with zero structured image records: insert
    // placeholder markers.
    if class == ContentClass::ScannedImage && total_extracted_images == 0 && !pages.is_empty() {
        let placeholder_count =
            ocr::estimate_placeholder_image_count(total_text_length, config.ingestion.image_marker_divisor);
        for i in 0..placeholder_count {
            pages[0].extracted_images.push(crate::models::ExtractedImage {
                image_number: i as u32,
                ocr_text: String::new(),
                confidence: None,
            });
        }
    }

    // Step 4: chunking.
    let strategy = options
        .chunking_strategy
        .unwrap_or(config.ingestion.default_chunking_strategy);
    progress.report(IngestProgressEvent {
        document_id: document_id.clone(),
        phase: IngestPhase::Chunking,
        n: 0,
        total: 0,
    });
    let produced_chunks = chunk::chunk_document(&document_id, source_name, &pages, strategy);
    let total_produced_chunks = produced_chunks.len();

    // Step 5: embedding, parallelized over batches bounded by a semaphore.
    progress.report(IngestProgressEvent {
        document_id: document_id.clone(),
        phase: IngestPhase::Embedding,
        n: 0,
        total: total_produced_chunks as u64,
    });
    let (persisted_chunks, failed_chunk_indices) = embed_chunks(config, produced_chunks).await;

    // Step 6: image OCR + embedding.
    progress.report(IngestProgressEvent {
        document_id: document_id.clone(),
        phase: IngestPhase::ImageOcr,
        n: 0,
        total: total_extracted_images as u64,
    });
    let produced_images = build_image_records(&document_id, source_name, &pages);
    let total_produced_images = produced_images.len();
    let persisted_images = embed_images(config, produced_images).await;

    // Step 7: dual-index write (independent).
    progress.report(IngestProgressEvent {
        document_id: document_id.clone(),
        phase: IngestPhase::IndexWrite,
        n: 0,
        total: 0,
    });
    let chunks_write_ok = if persisted_chunks.is_empty() {
        true
    } else {
        store.insert_chunks(&persisted_chunks).await.is_ok()
    };
    let images_write_ok = if persisted_images.is_empty() {
        true
    } else {
        store.insert_images(&persisted_images).await.is_ok()
    };

    let chunks_created = if chunks_write_ok { persisted_chunks.len() as u64 } else { 0 };
    let images_stored = if images_write_ok { persisted_images.len() as u64 } else { 0 };

    let status = determine_status(
        chunks_created as usize,
        total_produced_chunks,
        images_stored as usize,
        total_produced_images,
    );

    document.status = status;
    document.chunks_created = chunks_created;
    document.images_stored = images_stored;
    document.processing_metadata.duration_ms = started.elapsed().as_millis() as u64;
    document.processing_metadata.parser_attempts = parser_attempts;
    document.processing_metadata.failed_chunk_indices = failed_chunk_indices;
    if status == DocumentStatus::Partial {
        document.error = Some("some chunks or images failed to persist".to_string());
    }

    // Step 8: registry commit.
    progress.report(IngestProgressEvent {
        document_id: document_id.clone(),
        phase: IngestPhase::RegistryCommit,
        n: 0,
        total: 0,
    });
    let committed = registry
        .update(&document_id, None, |d| {
            d.status = document.status;
            d.chunks_created = document.chunks_created;
            d.images_stored = document.images_stored;
            d.parser_used = document.parser_used.clone();
            d.processing_metadata = document.processing_metadata.clone();
            d.error = document.error.clone();
        })
        .map_err(|e| anyhow::anyhow!("committing document state: {}", e))?;

    tracing::info!(
        %document_id,
        status = %committed.status,
        chunks_created = committed.chunks_created,
        images_stored = committed.images_stored,
        duration_ms = committed.processing_metadata.duration_ms,
        "ingest complete"
    );
    Ok(committed)
}

/// Re-run steps 3-7 for an existing document whose images were detected but
/// not stored, replacing its image stream atomically.
pub async fn reingest_images(
    config: &Config,
    registry: &DocumentRegistry,
    store: &dyn StoreBackend,
    ocr_provider: &dyn OcrProvider,
    content_type: &str,
    document_id: &str,
) -> Result<Document> {
    tracing::info!(%document_id, "reindexing images");
    let document = registry
        .get(document_id)
        .map_err(|e| anyhow::anyhow!("looking up document: {}", e))?;

    let bytes = registry
        .read_blob(document_id, &document.original_name)
        .context("reading stored blob")?;

    let class = extract::classify(&bytes, content_type);
    let chain = extract::parser_chain(content_type, class, ocr_provider, None);

    let mut pages: Vec<Page> = Vec::new();
    for parser in &chain {
        if let Ok(result_pages) = parser.parse(&bytes) {
            pages = result_pages;
            break;
        }
    }

    let total_text_length: usize = pages.iter().map(|p| p.text.len()).sum();
    let total_extracted_images: usize = pages.iter().map(|p| p.extracted_images.len()).sum();
    if class == ContentClass::ScannedImage && total_extracted_images == 0 && !pages.is_empty() {
        let placeholder_count =
            ocr::estimate_placeholder_image_count(total_text_length, config.ingestion.image_marker_divisor);
        for i in 0..placeholder_count {
            pages[0].extracted_images.push(crate::models::ExtractedImage {
                image_number: i as u32,
                ocr_text: String::new(),
                confidence: None,
            });
        }
    }

    let produced_images = build_image_records(document_id, &document.original_name, &pages);
    let persisted_images = embed_images(config, produced_images).await;

    store.delete_images_by_document(document_id).await.ok();
    let images_write_ok = if persisted_images.is_empty() {
        true
    } else {
        store.insert_images(&persisted_images).await.is_ok()
    };
    let images_stored = if images_write_ok { persisted_images.len() as u64 } else { 0 };

    let status = if images_stored as usize == persisted_images.len() && document.chunks_created > 0 {
        DocumentStatus::Success
    } else {
        DocumentStatus::Partial
    };

    let updated = registry
        .update(document_id, None, |d| {
            d.images_stored = images_stored;
            d.status = status;
        })
        .map_err(|e| anyhow::anyhow!("committing re-ingest state: {}", e))?;

    Ok(updated)
}

fn determine_status(
    chunks_created: usize,
    total_chunks: usize,
    images_stored: usize,
    total_images: usize,
) -> DocumentStatus {
    let text_complete = chunks_created == total_chunks;
    let images_complete = images_stored == total_images;
    if text_complete && images_complete {
        DocumentStatus::Success
    } else if chunks_created > 0 || images_stored > 0 {
        DocumentStatus::Partial
    } else {
        DocumentStatus::Failed
    }
}

fn finish_failed(registry: &DocumentRegistry, document: Document, error: String) -> Result<Document> {
    tracing::warn!(document_id = %document.document_id, %error, "ingest failed");
    let updated = registry
        .update(&document.document_id, None, |d| {
            d.status = DocumentStatus::Failed;
            d.error = Some(error.clone());
        })
        .map_err(|e| anyhow::anyhow!("committing failed document state: {}", e))?;
    Ok(updated)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Embed chunk batches under a semaphore bound, one `tokio::spawn`ed task
/// per batch so batches genuinely run concurrently up to the bound. A batch
/// that fails after the provider's own internal retries is dropped entirely
/// (not persisted); its `chunk_index`es are recorded as failed rather than
/// silently skipped.
async fn embed_chunks(config: &Config, chunks: Vec<Chunk>) -> (Vec<Chunk>, Vec<i64>) {
    if !config.embedding.is_enabled() || chunks.is_empty() {
        return (chunks, Vec::new());
    }

    let batch_size = config.embedding.batch_size.max(1);
    let semaphore = Arc::new(Semaphore::new(config.ingestion.max_concurrent_embed_batches.max(1)));
    let mut handles = Vec::new();

    for batch in chunks.chunks(batch_size).map(|c| c.to_vec()) {
        let semaphore = semaphore.clone();
        let embedding_config = config.embedding.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            match embed_with_timeout(&embedding_config, &texts).await {
                Ok(vectors) => {
                    let mut out = batch;
                    for (chunk, vector) in out.iter_mut().zip(vectors.into_iter()) {
                        chunk.embedding = Some(vector);
                    }
                    (out, Vec::new())
                }
                Err(_) => {
                    let failed: Vec<i64> = batch.iter().map(|c| c.chunk_index).collect();
                    (Vec::new(), failed)
                }
            }
        }));
    }

    let mut persisted = Vec::new();
    let mut failed_indices = Vec::new();
    for handle in handles {
        if let Ok((chunks, failed)) = handle.await {
            persisted.extend(chunks);
            failed_indices.extend(failed);
        }
    }
    persisted.sort_by_key(|c| c.chunk_index);
    failed_indices.sort();
    (persisted, failed_indices)
}

async fn embed_with_timeout(
    config: &crate::config::EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let provider = embedding::create_provider(config)?;
    tokio::time::timeout(
        Duration::from_secs(60),
        embedding::embed_batch(provider.as_ref(), config, texts),
    )
    .await
    .map_err(|_| anyhow::anyhow!("embedding batch timed out"))?
}

fn build_image_records(document_id: &str, source_name: &str, pages: &[Page]) -> Vec<ImageRecord> {
    let mut records = Vec::new();
    for page in pages {
        for image in &page.extracted_images {
            let char_count = image.ocr_text.chars().count();
            let word_count = image.ocr_text.split_whitespace().count();
            let is_placeholder = image.ocr_text.is_empty();
            records.push(ImageRecord {
                image_id: Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                source_name: source_name.to_string(),
                page: Some(page.page_number),
                image_number: image.image_number,
                ocr_text: image.ocr_text.clone(),
                ocr_quality_metrics: OcrQualityMetrics {
                    char_count,
                    word_count,
                    confidence: image.confidence,
                },
                embedding: None,
                content_type: "image_ocr".to_string(),
                extraction_method: if is_placeholder { "placeholder".to_string() } else { "ocr".to_string() },
                is_placeholder,
            });
        }
    }
    records
}

/// Embed each image's OCR text when non-empty; placeholders (empty OCR text)
/// are stored with no embedding and `is_placeholder = true`. Unlike chunk
/// embedding failures, an image record is always kept — the dual-stream
/// invariant tracks images independently of embedding success.
async fn embed_images(config: &Config, mut images: Vec<ImageRecord>) -> Vec<ImageRecord> {
    if !config.embedding.is_enabled() {
        return images;
    }
    for image in images.iter_mut() {
        if image.ocr_text.is_empty() {
            continue;
        }
        if let Ok(vector) = embed_with_timeout(&config.embedding, &[image.ocr_text.clone()]).await {
            image.embedding = vector.into_iter().next();
        }
    }
    images
}
