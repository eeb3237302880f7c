//! System statistics: document registry counts plus per-stream index
//! coverage. Backs `ragctl stats` and the `get_system_stats` MCP tool.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::models::DocumentStatus;
use crate::registry::DocumentRegistry;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SystemStats {
    pub total_documents: u64,
    pub success: u64,
    pub partial: u64,
    pub failed: u64,
    pub pending_or_processing: u64,
    pub total_chunks: i64,
    pub embedded_chunks: i64,
    pub total_images: i64,
    pub embedded_images: i64,
    pub registry_version: u64,
    pub db_size_bytes: u64,
}

pub async fn collect_stats(config: &Config) -> Result<SystemStats> {
    let registry = DocumentRegistry::open(&config.registry.root)?;
    let documents = registry.list();

    let mut success = 0u64;
    let mut partial = 0u64;
    let mut failed = 0u64;
    let mut pending_or_processing = 0u64;
    for doc in &documents {
        match doc.status {
            DocumentStatus::Success => success += 1,
            DocumentStatus::Partial => partial += 1,
            DocumentStatus::Failed => failed += 1,
            DocumentStatus::Pending | DocumentStatus::Processing => pending_or_processing += 1,
        }
    }

    let pool = db::connect(config).await?;
    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks").fetch_one(&pool).await?;
    let embedded_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors").fetch_one(&pool).await?;
    let total_images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image_records").fetch_one(&pool).await?;
    let embedded_images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image_vectors").fetch_one(&pool).await?;
    pool.close().await;

    let db_size_bytes = std::fs::metadata(&config.db.path).map(|m| m.len()).unwrap_or(0);

    Ok(SystemStats {
        total_documents: documents.len() as u64,
        success,
        partial,
        failed,
        pending_or_processing,
        total_chunks,
        embedded_chunks,
        total_images,
        embedded_images,
        registry_version: registry.registry_version()?,
        db_size_bytes,
    })
}

/// Run the `ragctl stats` command: collect and print a human-readable summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let stats = collect_stats(config).await?;

    println!("ragctl — system stats");
    println!("======================");
    println!();
    println!("  Registry version: {}", stats.registry_version);
    println!("  Database:         {}", config.db.path.display());
    println!("  Size:             {}", format_bytes(stats.db_size_bytes));
    println!();
    println!("  Documents: {} total", stats.total_documents);
    println!(
        "    success {}  partial {}  failed {}  pending/processing {}",
        stats.success, stats.partial, stats.failed, stats.pending_or_processing
    );
    println!();
    println!(
        "  Chunks:  {} total, {} embedded ({}%)",
        stats.total_chunks,
        stats.embedded_chunks,
        percent(stats.embedded_chunks, stats.total_chunks)
    );
    println!(
        "  Images:  {} total, {} embedded ({}%)",
        stats.total_images,
        stats.embedded_images,
        percent(stats.embedded_images, stats.total_images)
    );
    println!();

    Ok(())
}

fn percent(part: i64, total: i64) -> i64 {
    if total > 0 {
        (part * 100) / total
    } else {
        0
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
