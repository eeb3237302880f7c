//! `ragctl` — CLI front end for the Gateway.
//!
//! Thin wrapper: every subcommand either talks to the Gateway in-process
//! (`ingest`, `query`, `documents`, `stats`, `migrate`) or starts the HTTP +
//! MCP servers (`serve`). Exit codes: `0` success, `1` operation failed,
//! `2` usage/config error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

use ragctl::config::{self, SearchMode};
use ragctl::gateway::Gateway;
use ragctl::ingest::IngestOptions;
use ragctl::migrate;
use ragctl::progress::ProgressMode;
use ragctl::retrieval::QueryOptions;
use ragctl::{server, stats};

#[derive(Parser)]
#[command(name = "ragctl", about = "Retrieval-augmented question answering over ingested documents", version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/ragctl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the Document Store schema
    Migrate,

    /// Ingest a file as a new document
    Ingest {
        /// Path to the file to ingest
        path: PathBuf,

        /// MIME type override (guessed from extension when absent)
        #[arg(long)]
        content_type: Option<String>,

        /// Disable parser fallback and force one parser: fast | ocr | image_model
        #[arg(long)]
        parser: Option<String>,

        /// Progress reporting: off, human, json
        #[arg(long)]
        progress: Option<String>,
    },

    /// Ask a question against ingested documents
    Query {
        /// The question to ask
        question: String,

        /// Number of chunks to retrieve
        #[arg(long)]
        k: Option<usize>,

        /// Search mode: semantic, keyword, hybrid
        #[arg(long)]
        mode: Option<String>,

        /// Restrict to a single document id
        #[arg(long)]
        document_id: Option<String>,

        /// Force image retrieval
        #[arg(long)]
        images: bool,
    },

    /// Document registry operations
    Documents {
        #[command(subcommand)]
        action: DocumentsAction,
    },

    /// Re-run image extraction/OCR for an existing document
    ReindexImages {
        document_id: String,
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
    },

    /// Print registry and store counts
    Stats,

    /// Start the HTTP API (and MCP endpoint, if enabled)
    Serve,

    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum DocumentsAction {
    /// List all documents
    List,
    /// Show one document's registry record
    Get { document_id: String },
    /// Delete a document and its indexed chunks/images
    Delete { document_id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut std::io::stdout());
        return ExitCode::SUCCESS;
    }

    let cfg = match config::load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    match run(cfg, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: ragctl::config::Config, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Completions { .. } => unreachable!("handled before config load"),

        Commands::Migrate => {
            migrate::run_migrations(&cfg).await?;
            println!("store schema up to date.");
        }

        Commands::Ingest {
            path,
            content_type,
            parser,
            progress,
        } => {
            let bytes = std::fs::read(&path)?;
            let source_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "upload".to_string());
            let content_type = content_type.unwrap_or_else(|| guess_content_type(&path));
            let progress_mode = match progress.as_deref() {
                Some("off") => ProgressMode::Off,
                Some("human") => ProgressMode::Human,
                Some("json") => ProgressMode::Json,
                Some(other) => anyhow::bail!("unknown --progress value: {}", other),
                None => ProgressMode::default_for_tty(),
            };

            let gateway = Gateway::open(cfg).await?;
            let document = gateway
                .ingest_document(
                    &content_type,
                    &bytes,
                    &source_name,
                    IngestOptions {
                        parser_preference: parser,
                        chunking_strategy: None,
                    },
                    progress_mode.reporter().as_ref(),
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&document)?);
        }

        Commands::Query {
            question,
            k,
            mode,
            document_id,
            images,
        } => {
            let gateway = Gateway::open(cfg.clone()).await?;
            let mut options = QueryOptions::from_config(&cfg, question);
            if let Some(k) = k {
                options.k = k;
            }
            if let Some(mode) = mode {
                options.search_mode = match mode.as_str() {
                    "semantic" => SearchMode::Semantic,
                    "keyword" => SearchMode::Keyword,
                    "hybrid" => SearchMode::Hybrid,
                    other => anyhow::bail!("unknown --mode value: {}", other),
                };
            }
            options.document_id = document_id;
            options.include_images = images;

            let answer = gateway.query(options).await?;
            println!("{}", serde_json::to_string_pretty(&answer)?);
        }

        Commands::Documents { action } => {
            let gateway = Gateway::open(cfg).await?;
            match action {
                DocumentsAction::List => {
                    let documents = gateway.list_documents();
                    println!("{}", serde_json::to_string_pretty(&documents)?);
                }
                DocumentsAction::Get { document_id } => {
                    let document = gateway.get_document(&document_id).map_err(|e| anyhow::anyhow!(e))?;
                    println!("{}", serde_json::to_string_pretty(&document)?);
                }
                DocumentsAction::Delete { document_id } => {
                    gateway.delete_document(&document_id).await.map_err(|e| anyhow::anyhow!(e))?;
                    println!("deleted {}", document_id);
                }
            }
        }

        Commands::ReindexImages {
            document_id,
            content_type,
        } => {
            let gateway = Gateway::open(cfg).await?;
            let document = gateway.reingest_images(&content_type, &document_id).await?;
            println!("{}", serde_json::to_string_pretty(&document)?);
        }

        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }

        Commands::Serve => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .init();
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn guess_content_type(path: &std::path::Path) -> String {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase().as_str() {
        "pdf" => "application/pdf",
        "txt" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
    .to_string()
}
