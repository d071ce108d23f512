//! Ledger and store overview for `fig stats`.
//!
//! Shows how far the pipeline has got: documents extracted, images
//! analyzed (and how many hit rate limits), and figures indexed.

use anyhow::Result;

use crate::config::Config;
use crate::embedding::DisabledEmbedder;
use crate::ledger::Ledger;
use crate::store::sqlite::SqliteVectorStore;
use crate::store::VectorStore;

pub async fn run_stats(config: &Config) -> Result<()> {
    let ledger = Ledger::open(config).await?;
    let counts = ledger.counts().await?;
    let stored = SqliteVectorStore::new(ledger.pool().clone(), Box::new(DisabledEmbedder))
        .count()
        .await?;
    ledger.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Figure Harness: Ledger Stats");
    println!("============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", counts.documents);
    println!("    complete:    {}", counts.documents_ok);
    println!("    incomplete:  {}", counts.documents_failed);
    println!("    duplicates:  {}", counts.duplicates);
    println!("  Images:      {}", counts.images_recorded);
    println!();
    println!(
        "  Analyzed:    {} / {} ({}%)",
        counts.analyses_ok,
        counts.analyses,
        percent(counts.analyses_ok, counts.analyses)
    );
    println!("    rate limited: {}", counts.analyses_rate_limited);
    println!("    embedded:     {}", counts.analyses_embedded);
    println!();
    println!(
        "  Indexed:     {} / {} ({}%)",
        counts.indexed,
        counts.analyses_ok,
        percent(counts.indexed, counts.analyses_ok)
    );
    println!("    failed:       {}", counts.index_failed);
    println!("    in store:     {}", stored);
    println!();

    Ok(())
}

fn percent(part: i64, whole: i64) -> i64 {
    if whole > 0 {
        (part * 100) / whole
    } else {
        0
    }
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
