//! Configuration parsing and validation.
//!
//! `ragctl` is configured via a TOML file (default: `config/ragctl.toml`).
//! The config defines database paths, chunking presets, embedding/generator
//! provider settings, retrieval tuning, registry storage root, server bind
//! address, and the MCP transport bind address.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub mcp: McpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Chunking presets: precise / balanced (default) / comprehensive.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    Precise,
    Balanced,
    Comprehensive,
}

impl ChunkingStrategy {
    pub fn max_tokens(&self) -> usize {
        match self {
            ChunkingStrategy::Precise => 256,
            ChunkingStrategy::Balanced => 384,
            ChunkingStrategy::Comprehensive => 512,
        }
    }

    pub fn overlap_tokens(&self) -> usize {
        match self {
            ChunkingStrategy::Precise => 50,
            ChunkingStrategy::Balanced => 75,
            ChunkingStrategy::Comprehensive => 100,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "precise" => Some(ChunkingStrategy::Precise),
            "balanced" => Some(ChunkingStrategy::Balanced),
            "comprehensive" => Some(ChunkingStrategy::Comprehensive),
            _ => None,
        }
    }
}

impl Default for ChunkingStrategy {
    fn default() -> Self {
        ChunkingStrategy::Balanced
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    #[serde(default)]
    pub default_chunking_strategy: ChunkingStrategy,
    #[serde(default = "default_parser_timeout_secs")]
    pub parser_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_ingests")]
    pub max_concurrent_ingests: usize,
    #[serde(default = "default_max_concurrent_embed_batches")]
    pub max_concurrent_embed_batches: usize,
    #[serde(default = "default_image_marker_divisor")]
    pub image_marker_divisor: usize,
}

fn default_parser_timeout_secs() -> u64 {
    20 * 60
}

fn default_max_concurrent_ingests() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(1)
}

fn default_max_concurrent_embed_batches() -> usize {
    4
}

fn default_image_marker_divisor() -> usize {
    5000
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            default_chunking_strategy: ChunkingStrategy::default(),
            parser_timeout_secs: default_parser_timeout_secs(),
            max_concurrent_ingests: default_max_concurrent_ingests(),
            max_concurrent_embed_batches: default_max_concurrent_embed_batches(),
            image_marker_divisor: default_image_marker_divisor(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Keyword,
    Hybrid,
}

impl Default for SearchMode {
    fn default() -> Self {
        SearchMode::Hybrid
    }
}

impl SearchMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "semantic" => Some(SearchMode::Semantic),
            "keyword" => Some(SearchMode::Keyword),
            "hybrid" => Some(SearchMode::Hybrid),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub search_mode: SearchMode,
    #[serde(default = "default_true")]
    pub use_mmr: bool,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f64,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default)]
    pub use_agentic_rag: bool,
    #[serde(default = "default_true")]
    pub use_rerank: bool,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_k() -> usize {
    6
}
fn default_true() -> bool {
    true
}
fn default_mmr_lambda() -> f64 {
    0.7
}
fn default_semantic_weight() -> f64 {
    0.7
}
fn default_max_context_tokens() -> usize {
    6000
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    1024
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            search_mode: SearchMode::default(),
            use_mmr: true,
            mmr_lambda: default_mmr_lambda(),
            semantic_weight: default_semantic_weight(),
            use_agentic_rag: false,
            use_rerank: true,
            max_context_tokens: default_max_context_tokens(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// The answer-synthesis LLM. Mirrors [`EmbeddingConfig`]'s shape since both
/// are thin HTTP clients with the same retry/backoff needs.
#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generate_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_generator_provider() -> String {
    "disabled".to_string()
}

fn default_generate_timeout_secs() -> u64 {
    60
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_generator_provider(),
            model: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_generate_timeout_secs(),
        }
    }
}

impl GeneratorConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Document Registry storage root. Layout under this root:
/// `documents.json`, `version`, `../blobs/{doc_id}/{original_filename}`.
#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_root")]
    pub root: PathBuf,
}

fn default_registry_root() -> PathBuf {
    PathBuf::from("data/registry")
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: default_registry_root(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct McpConfig {
    #[serde(default = "default_mcp_bind")]
    pub bind: String,
    #[serde(default)]
    pub enabled: bool,
}

fn default_mcp_bind() -> String {
    "127.0.0.1:9901".to_string()
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            bind: default_mcp_bind(),
            enabled: false,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &std::path::Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.ingestion.parser_timeout_secs == 0 {
        anyhow::bail!("ingestion.parser_timeout_secs must be > 0");
    }
    if config.ingestion.max_concurrent_ingests == 0 {
        anyhow::bail!("ingestion.max_concurrent_ingests must be >= 1");
    }

    if config.retrieval.k == 0 {
        anyhow::bail!("retrieval.k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.semantic_weight) {
        anyhow::bail!("retrieval.semantic_weight must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.retrieval.mmr_lambda) {
        anyhow::bail!("retrieval.mmr_lambda must be in [0.0, 1.0]");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    match config.generator.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown generator provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(config)
}
