//! Core data models shared across the ingestion, retrieval, and registry layers.
//!
//! These types mirror the persisted shape of documents and their derived
//! Chunks/ImageRecords. `Document`/`DocumentRecord` is the registry's unit of
//! truth; `Chunk` and `ImageRecord` are the two retrieval units living in the
//! text and image streams respectively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Partial,
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Success => "success",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Partial => "partial",
        };
        write!(f, "{}", s)
    }
}

/// How the document's bytes were received, for audit/display purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
    pub uploader: Option<String>,
}

/// PDF-specific metadata, present only when the parser reports it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PdfMetadata {
    pub page_count: Option<u32>,
    pub author: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
}

/// Timings and the parser fallback chain actually taken during ingest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub duration_ms: u64,
    pub parser_attempts: Vec<String>,
    pub failed_chunk_indices: Vec<i64>,
}

/// A single entry in a document's version history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: u64,
    pub changed_at: DateTime<Utc>,
    pub summary: String,
}

/// Monotonic version number plus the change log that produced it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: u64,
    pub history: Vec<VersionEntry>,
}

/// A logical ingested source document: the registry's record type, moved
/// around by `insert`/`get`/`list` on the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub name: String,
    /// Prior names, most recent first, preserved across renames for
    /// retrieval compatibility (chunks still carry the name-at-ingest-time).
    pub original_name: String,
    pub file_hash: String,
    pub upload_metadata: UploadMetadata,
    #[serde(default)]
    pub pdf_metadata: Option<PdfMetadata>,
    pub parser_used: Option<String>,
    #[serde(default)]
    pub processing_metadata: ProcessingMetadata,
    pub chunks_created: u64,
    pub images_stored: u64,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub text_index: String,
    pub images_index: String,
    #[serde(default)]
    pub version_info: VersionInfo,
}

impl Document {
    pub fn new(document_id: String, name: String, file_hash: String, upload: UploadMetadata) -> Self {
        let text_index = "chunks".to_string();
        let images_index = "image_records".to_string();
        Self {
            document_id,
            original_name: name.clone(),
            name,
            file_hash,
            upload_metadata: upload,
            pdf_metadata: None,
            parser_used: None,
            processing_metadata: ProcessingMetadata::default(),
            chunks_created: 0,
            images_stored: 0,
            status: DocumentStatus::Pending,
            error: None,
            text_index,
            images_index,
            version_info: VersionInfo::default(),
        }
    }
}

/// A contiguous token-bounded span of text extracted from exactly one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    /// The document name at ingest time — retained even after rename.
    pub source_name: String,
    pub page: Option<u32>,
    pub chunk_index: i64,
    pub token_count: usize,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default = "content_type_text")]
    pub content_type: String,
}

fn content_type_text() -> String {
    "text".to_string()
}

/// An image extracted from a document together with its OCR text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_id: String,
    pub document_id: String,
    pub source_name: String,
    pub page: Option<u32>,
    pub image_number: u32,
    pub ocr_text: String,
    pub ocr_quality_metrics: OcrQualityMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default = "content_type_image")]
    pub content_type: String,
    pub extraction_method: String,
    /// True when this record is a placeholder inserted by the image-marker
    /// heuristic rather than an actually-extracted image.
    #[serde(default)]
    pub is_placeholder: bool,
}

fn content_type_image() -> String {
    "image_ocr".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrQualityMetrics {
    pub char_count: usize,
    pub word_count: usize,
    pub confidence: Option<f32>,
}

/// A page of extracted text plus the images found on it, produced by the
/// intake/parser step before chunking.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub page_number: u32,
    pub text: String,
    pub extracted_images: Vec<ExtractedImage>,
}

#[derive(Debug, Clone)]
pub struct ExtractedImage {
    pub image_number: u32,
    pub ocr_text: String,
    pub confidence: Option<f32>,
}

/// A generic search result item, used by the CLI and HTTP surfaces to render
/// hits regardless of whether they came from the text or image stream.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub id: String,
    pub score: f64,
    pub document_id: String,
    pub source_name: String,
    pub page: Option<u32>,
    pub snippet: String,
    pub content_type: String,
}
