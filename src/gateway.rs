//! Gateway: the single entry point external clients (HTTP, MCP, CLI) go
//! through. Owns the Document Registry, the Document Store, and
//! the OCR/embedding/generation providers; routes writes to the Ingestion
//! Worker and reads to the Retrieval Worker.
//!
//! Construction wires up every backing subsystem once at startup: the SQLite
//! pool (migrated on open), the file-backed registry, the OCR provider, and
//! the generator. A single `LexicalOverlapReranker` is used directly rather
//! than behind a trait object, since [`crate::reranker::Reranker::rerank`] is
//! generic and therefore not object-safe.

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::db;
use crate::generator::{self, Generator};
use crate::ingest::{self, IngestOptions};
use crate::migrate;
use crate::models::{Chunk, Document, ImageRecord};
use crate::ocr::{self, OcrProvider};
use crate::progress::IngestProgressReporter;
use crate::registry::{DocumentRegistry, RegistryError, SyncStatus};
use crate::reranker::LexicalOverlapReranker;
use crate::retrieval::{self, Answer, QueryOptions};
use crate::store::sqlite::LocalSqliteStore;
use crate::store::StoreBackend;

pub struct Gateway {
    config: Config,
    registry: DocumentRegistry,
    store: Box<dyn StoreBackend>,
    ocr_provider: Box<dyn OcrProvider>,
    generator: Box<dyn Generator>,
    reranker: LexicalOverlapReranker,
}

impl Gateway {
    /// Wire up every backing subsystem: runs schema migrations, opens the
    /// registry (creating it on first run), and resolves the configured OCR
    /// and generation providers.
    pub async fn open(config: Config) -> Result<Self> {
        migrate::run_migrations(&config)
            .await
            .context("running schema migrations")?;
        let pool = db::connect(&config).await.context("connecting to store db")?;
        let store: Box<dyn StoreBackend> = Box::new(LocalSqliteStore::new(pool));

        let registry = DocumentRegistry::open(&config.registry.root).context("opening document registry")?;
        let ocr_provider = ocr::default_provider();
        let generator = generator::create_generator(&config.generator).context("creating generator")?;

        tracing::info!(registry_root = %config.registry.root.display(), "gateway opened");

        Ok(Self {
            config,
            registry,
            store,
            ocr_provider,
            generator,
            reranker: LexicalOverlapReranker,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `POST /documents`: ingest new bytes as a new document.
    pub async fn ingest_document(
        &self,
        content_type: &str,
        source_bytes: &[u8],
        source_name: &str,
        options: IngestOptions,
        progress: &dyn IngestProgressReporter,
    ) -> Result<Document> {
        ingest::ingest(
            &self.config,
            &self.registry,
            self.store.as_ref(),
            self.ocr_provider.as_ref(),
            content_type,
            source_bytes,
            source_name,
            options,
            progress,
        )
        .await
    }

    /// Re-run image extraction/OCR/embedding for an existing document,
    /// leaving its text chunks untouched.
    pub async fn reingest_images(&self, content_type: &str, document_id: &str) -> Result<Document> {
        ingest::reingest_images(
            &self.config,
            &self.registry,
            self.store.as_ref(),
            self.ocr_provider.as_ref(),
            content_type,
            document_id,
        )
        .await
    }

    /// `GET /documents/{id}`.
    pub fn get_document(&self, document_id: &str) -> Result<Document, RegistryError> {
        self.registry.get(document_id)
    }

    /// `GET /documents`.
    pub fn list_documents(&self) -> Vec<Document> {
        self.registry.list()
    }

    /// `PUT /documents/{id}`: rename. `original_name` is untouched so
    /// already-ingested chunks keep pointing at the name they were chunked
    /// under.
    pub fn rename_document(
        &self,
        document_id: &str,
        new_name: String,
        expected_version: Option<u64>,
    ) -> Result<Document, RegistryError> {
        self.registry.update(document_id, expected_version, |doc| {
            doc.name = new_name.clone();
        })
    }

    /// `DELETE /documents/{id}`: cascades to both index streams, then drops
    /// the registry record. Store rows are removed before the registry entry
    /// so a crash mid-delete leaves an orphaned-but-still-listed document
    /// rather than index rows nothing points to.
    pub async fn delete_document(&self, document_id: &str) -> Result<(), RegistryError> {
        self.store
            .delete_by_document(document_id)
            .await
            .map_err(RegistryError::Io)?;
        let result = self.registry.remove(document_id);
        tracing::info!(document_id, "document deleted");
        result
    }

    /// `POST /query` / `POST /query/images`.
    pub async fn query(&self, options: QueryOptions) -> Result<Answer> {
        retrieval::query(
            &self.config,
            self.store.as_ref(),
            &self.registry,
            self.generator.as_ref(),
            &self.reranker,
            options,
        )
        .await
    }

    /// `GET /documents/{id}/pages/{page}`: chunks and images recorded for
    /// that page, in ingest order.
    pub async fn get_page(&self, document_id: &str, page: u32) -> Result<PageContent> {
        let text_chunks = self.store.list_chunks_by_page(document_id, page).await?;
        let images = self.store.list_images_by_page(document_id, page).await?;
        Ok(PageContent {
            total_chunks: text_chunks.len(),
            total_images: images.len(),
            text_chunks,
            images,
        })
    }

    /// `GET /documents/{id}/storage/status`: whether both index streams hold
    /// rows for this document, independent of the registry's own counts.
    pub async fn storage_status(&self, document_id: &str) -> Result<StorageStatus> {
        let text_indexed = self.store.list_documents_in_index().await?.iter().any(|d| d == document_id);
        Ok(StorageStatus {
            text_indexed,
            index_exists: self.store.index_exists().await?,
        })
    }

    /// `GET /health`.
    pub fn sync_status(&self) -> Result<SyncStatus> {
        self.registry.get_sync_status()
    }

    pub fn registry_root(&self) -> &Path {
        &self.config.registry.root
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StorageStatus {
    pub text_indexed: bool,
    pub index_exists: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PageContent {
    pub text_chunks: Vec<Chunk>,
    pub images: Vec<ImageRecord>,
    pub total_chunks: usize,
    pub total_images: usize,
}
