//! # ragctl
//!
//! **A retrieval-augmented question-answering platform for enterprise document
//! collections.**
//!
//! `ragctl` ingests documents into a dual-index Document Store (text chunks
//! and image OCR records, never merged), then answers natural-language
//! questions against them with hybrid retrieval, MMR diversification,
//! cross-encoder reranking, and citation-backed generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────┐   ┌──────────┐
//! │ Gateway  │──▶│  Ingestion  │──▶│  SQLite   │◀──│ Retrieval │
//! │ (HTTP/   │   │   Worker    │   │ FTS5+Vec  │   │  Worker   │
//! │  MCP)    │   │             │   │(dual idx) │   │           │
//! └────┬─────┘   └────────────┘   └───────────┘   └────┬─────┘
//!      │                                                 │
//!      └──────────────── Document Registry ──────────────┘
//!             (file-backed, atomic write, version-checked)
//! ```
//!
//! ## Data Flow
//!
//! 1. The **Gateway** ([`gateway`]) accepts uploads over HTTP or MCP and
//!    assigns a document id via the **Document Registry** ([`registry`]).
//! 2. The **Ingestion Worker** ([`ingest`]) selects a parser ([`extract`]),
//!    extracts text/images, chunks text ([`chunk`]), OCRs images ([`ocr`]),
//!    embeds both streams ([`embedding`]), and writes them to the
//!    **Document Store** ([`store`]).
//! 3. The **Retrieval Worker** ([`retrieval`]) answers questions by fusing
//!    lexical and semantic candidates, diversifying with MMR ([`mmr`]),
//!    reranking ([`reranker`]), and generating a cited answer
//!    ([`generator`]).
//! 4. Results are exposed via the **HTTP API** ([`server`]) and the
//!    **MCP tool surface** ([`mcp`], [`traits`]).
//!
//! ## Quick Start
//!
//! ```bash
//! ragctl migrate                        # create the store schema
//! ragctl serve                          # start the HTTP + MCP gateway
//! ragctl ingest report.pdf              # ingest a document
//! ragctl query "what changed in Q3?"    # ask a question
//! ragctl stats                          # registry and store counts
//! ```
//!
//! ## Search Modes
//!
//! | Mode | Engine | Requires Embeddings |
//! |------|--------|---------------------|
//! | `keyword` | SQLite FTS5 (BM25) | No |
//! | `semantic` | Cosine similarity over vectors | Yes |
//! | `hybrid` | Weighted, min-max-normalized merge | Yes |
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types: `Document`, `Chunk`, `ImageRecord` |
//! | [`registry`] | File-backed Document Registry (atomic writes, versioning) |
//! | [`extract`] | Parser fallback chains per content class |
//! | [`chunk`] | Boundary-preference text chunker (precise/balanced/comprehensive) |
//! | [`ocr`] | OCR provider trait plus the scanned-image placeholder heuristic |
//! | [`embedding`] | Embedding provider trait, local and remote implementations |
//! | [`ingest`] | Ingestion Worker: intake → extract → chunk → embed → OCR → index |
//! | [`store`] | Dual-index Document Store abstraction plus hybrid fusion |
//! | [`mmr`] | Maximal marginal relevance diversification |
//! | [`reranker`] | Cross-encoder (and lexical-overlap fallback) reranking |
//! | [`generator`] | Answer generation provider trait (OpenAI, Ollama, disabled) |
//! | [`retrieval`] | Retrieval Worker: candidates → MMR → rerank → generate → cite |
//! | [`gateway`] | Single entry point: owns the registry, routes reads/writes |
//! | [`traits`] | MCP `Tool` trait and the seven built-in Gateway-backed tools |
//! | [`mcp`] | MCP JSON-RPC bridge (Streamable HTTP) |
//! | [`server`] | REST API (Axum) plus CORS |
//! | [`stats`] | Registry and store count summaries |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Document Store schema migrations (idempotent) |
//! | [`error`] | Gateway-facing error taxonomy (`RagError`) |
//! | [`progress`] | Ingest progress reporting (human/JSON/off) |
//!
//! ## Configuration
//!
//! `ragctl` is configured via a TOML file (default: `config/ragctl.toml`).
//! See [`config`] for all available options and [`config::load_config`] for
//! validation rules.

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod generator;
pub mod ingest;
pub mod mcp;
pub mod migrate;
pub mod mmr;
pub mod models;
pub mod ocr;
pub mod progress;
pub mod registry;
pub mod reranker;
pub mod retrieval;
pub mod server;
pub mod stats;
pub mod store;
pub mod traits;
