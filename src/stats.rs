//! Index statistics.
//!
//! `rv stats` prints how many documents, chunks and embedded documents the
//! index holds per repository, which makes it easy to check that ingestion
//! and event consumption kept up with the file store.

use anyhow::Result;

use repovault_core::index::RepositoryStats;

use crate::config::Config;
use crate::sqlite_index::open_index;

pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let index = open_index(config).await?;
    let stats = index.stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("repovault index stats");
    println!("=====================");
    println!();
    println!("  Backend:     {}", config.index.backend);
    if config.index.backend == "sqlite" {
        println!("  Database:    {}", config.db.path.display());
        println!("  Size:        {}", format_bytes(db_size));
    }
    println!();
    print!("{}", render_table(&stats));
    Ok(())
}

fn render_table(stats: &[RepositoryStats]) -> String {
    let documents: u64 = stats.iter().map(|s| s.documents).sum();
    let chunks: u64 = stats.iter().map(|s| s.chunks).sum();
    let embedded: u64 = stats.iter().map(|s| s.embedded).sum();

    let mut out = String::new();
    out.push_str(&format!("  Documents:   {}\n", documents));
    out.push_str(&format!("  Chunks:      {}\n", chunks));
    out.push_str(&format!(
        "  Embedded:    {} / {} ({}%)\n",
        embedded,
        documents,
        if documents > 0 { embedded * 100 / documents } else { 0 }
    ));

    if !stats.is_empty() {
        out.push_str("\n  By repository:\n");
        out.push_str(&format!(
            "  {:<24} {:<12} {:>6} {:>8} {:>10}\n",
            "REPOSITORY", "ID", "DOCS", "CHUNKS", "EMBEDDED"
        ));
        out.push_str(&format!("  {}\n", "-".repeat(64)));
        for s in stats {
            out.push_str(&format!(
                "  {:<24} {:<12} {:>6} {:>8} {:>10}\n",
                s.repository_identifier, s.repository_id, s.documents, s.chunks, s.embedded
            ));
        }
    }
    out
}

/// Format a byte count as a human-readable string.
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
