//! Stage orchestration: `fig extract`, `fig analyze`, `fig retry`,
//! `fig index`, and `fig run`.
//!
//! Each `run_*` function builds its components from the [`Config`], walks
//! its work list one item at a time, and prints an end-of-run summary to
//! stdout. Per-item problems are logged and counted; they never stop the
//! batch. Stage order is fixed: extract, then analyze, then index.
//!
//! The `*_all` functions take already-built components so tests can swap in
//! fakes for the vision provider and the vector store.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::PathBuf;
use std::time::Duration;
use walkdir::WalkDir;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::extract::{ExtractionOutcome, Extractor};
use crate::image_embed::create_image_embedder;
use crate::indexer::{IndexStats, Indexer};
use crate::layout::OutputLayout;
use crate::ledger::{Ledger, RetryFilter};
use crate::processor::{AnalysisOutcome, ImageProcessor};
use crate::prompts::ANALYSIS_PROMPT;
use crate::retry::{Retrier, RetryStats};
use crate::store::sqlite::SqliteVectorStore;
use crate::store::VectorStore;
use crate::vision::create_analyzer;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub images: usize,
    pub text_files: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzeStats {
    pub total: usize,
    pub fresh: usize,
    pub cached: usize,
    pub successful: usize,
    pub failed: usize,
}

/// PDFs under `paths.input_dir` matching the include globs, sorted.
pub fn discover_pdfs(config: &Config) -> Result<Vec<PathBuf>> {
    let root = &config.paths.input_dir;
    if !root.exists() {
        bail!("Input directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.extract.include_globs)?;
    let exclude_set = build_globset(&config.extract.exclude_globs)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.extract.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel_str = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        paths.push(path.to_path_buf());
    }

    paths.sort();
    Ok(paths)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

// ============ extract ============

pub async fn extract_all(extractor: &Extractor, paths: &[PathBuf]) -> ExtractStats {
    let mut stats = ExtractStats {
        total: paths.len(),
        ..ExtractStats::default()
    };

    for path in paths {
        match extractor.process(path).await {
            Ok(ExtractionOutcome::AlreadyProcessed(_)) => stats.skipped += 1,
            Ok(ExtractionOutcome::Duplicate(_)) => stats.duplicates += 1,
            Ok(ExtractionOutcome::Processed(record)) => {
                stats.images += record.image_info.len();
                if record.text_extracted {
                    stats.text_files += 1;
                }
                if record.error_message.is_none() {
                    stats.processed += 1;
                } else {
                    stats.failed += 1;
                }
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "extraction failed");
                stats.failed += 1;
            }
        }
    }

    stats
}

pub async fn run_extract(config: &Config) -> Result<ExtractStats> {
    let ledger = Ledger::open(config).await?;
    let layout = OutputLayout::new(&config.paths.output_dir);
    let extractor = Extractor::new(ledger.clone(), layout, config.extract.jpeg_quality);

    let paths = discover_pdfs(config)?;
    let stats = extract_all(&extractor, &paths).await;
    ledger.close().await;

    println!("extract");
    println!("  pdfs found: {}", stats.total);
    println!("  processed: {}", stats.processed);
    println!("  already processed: {}", stats.skipped);
    println!("  duplicates removed: {}", stats.duplicates);
    println!("  failed: {}", stats.failed);
    println!("  images extracted: {}", stats.images);
    println!("  text files written: {}", stats.text_files);
    println!("ok");

    Ok(stats)
}

// ============ analyze ============

/// Analyze every image recorded for a non-duplicate document, in extraction
/// order. Documents whose image stage partly failed still contribute the
/// images that were written. Sleeps `inter_call_delay` after each fresh call.
pub async fn analyze_all(
    processor: &ImageProcessor,
    layout: &OutputLayout,
    inter_call_delay: Duration,
) -> Result<AnalyzeStats> {
    let mut stats = AnalyzeStats::default();
    let records = processor.ledger().list_extractions().await?;

    for record in records.iter().filter(|r| !r.is_duplicate) {
        let document_id = record.document_id();
        for image in &record.image_info {
            stats.total += 1;
            let image_path = layout.resolve(&image.path);

            match processor.process(&image_path, &document_id).await {
                Ok(outcome) => {
                    if outcome.record().success {
                        stats.successful += 1;
                    } else {
                        stats.failed += 1;
                    }
                    match outcome {
                        AnalysisOutcome::Cached(_) => stats.cached += 1,
                        AnalysisOutcome::Fresh(_) => {
                            stats.fresh += 1;
                            if !inter_call_delay.is_zero() {
                                tokio::time::sleep(inter_call_delay).await;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(image = %image_path.display(), error = %e, "analysis aborted");
                    stats.failed += 1;
                }
            }
        }
    }

    Ok(stats)
}

fn build_processor(config: &Config, ledger: Ledger, layout: OutputLayout) -> Result<ImageProcessor> {
    let analyzer = create_analyzer(&config.vision)?;
    Ok(ImageProcessor::new(ledger, analyzer, layout, ANALYSIS_PROMPT)
        .with_image_embedder(create_image_embedder(&config.image_embedding)))
}

pub async fn run_analyze(config: &Config) -> Result<AnalyzeStats> {
    let ledger = Ledger::open(config).await?;
    let layout = OutputLayout::new(&config.paths.output_dir);
    let processor = build_processor(config, ledger.clone(), layout.clone())?;

    let stats = analyze_all(
        &processor,
        &layout,
        Duration::from_millis(config.pipeline.inter_call_delay_ms),
    )
    .await?;
    ledger.close().await;

    println!("analyze");
    println!("  images: {}", stats.total);
    println!("  fresh: {}", stats.fresh);
    println!("  cached: {}", stats.cached);
    println!("  successful: {}", stats.successful);
    println!("  failed: {}", stats.failed);
    println!("ok");

    Ok(stats)
}

// ============ retry ============

pub async fn run_retry(config: &Config, filter: &RetryFilter) -> Result<RetryStats> {
    let ledger = Ledger::open(config).await?;
    let layout = OutputLayout::new(&config.paths.output_dir);
    let processor = build_processor(config, ledger.clone(), layout)?;
    let retrier = Retrier::new(
        processor,
        config.pipeline.max_image_bytes,
        Duration::from_millis(config.pipeline.retry_delay_ms),
    );

    let stats = retrier.retry_failed(filter).await?;
    ledger.close().await;

    println!("retry");
    println!("  selected: {}", stats.selected);
    println!("  successful: {}", stats.successful);
    println!("  failed: {}", stats.failed);
    println!("  skipped (oversize): {}", stats.skipped_oversize);
    println!("ok");

    Ok(stats)
}

// ============ index ============

/// The SQLite vector store over the ledger's own database.
pub fn build_store(config: &Config, ledger: &Ledger) -> Result<Box<dyn VectorStore>> {
    let embedder = create_embedder(&config.embedding)?;
    Ok(Box::new(SqliteVectorStore::new(ledger.pool().clone(), embedder)))
}

pub async fn run_index(config: &Config) -> Result<IndexStats> {
    let ledger = Ledger::open(config).await?;
    let store = build_store(config, &ledger)?;
    let indexer = Indexer::new(ledger.clone(), store);

    let stats = indexer
        .run_batch(Duration::from_millis(config.pipeline.index_delay_ms))
        .await?;
    ledger.close().await;

    println!("index");
    println!("  pending: {}", stats.total);
    println!("  validated: {}", stats.validated);
    println!("  indexed: {}", stats.indexed);
    println!("  already indexed: {}", stats.already_indexed);
    println!("  failed: {}", stats.failed);
    println!("ok");

    Ok(stats)
}

// ============ run ============

pub async fn run_all(config: &Config) -> Result<()> {
    run_extract(config).await?;
    run_analyze(config).await?;
    run_index(config).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("pdfs");
        std::fs::create_dir_all(input.join("nested")).unwrap();
        std::fs::create_dir_all(input.join("skip")).unwrap();
        std::fs::write(input.join("b.pdf"), b"x").unwrap();
        std::fs::write(input.join("nested/a.pdf"), b"x").unwrap();
        std::fs::write(input.join("skip/c.pdf"), b"x").unwrap();
        std::fs::write(input.join("notes.txt"), b"x").unwrap();

        let mut config = Config::with_paths(
            dir.path().join("db.sqlite"),
            input.clone(),
            dir.path().join("out"),
        );
        config.extract.exclude_globs = vec!["skip/**".to_string()];

        let found = discover_pdfs(&config).unwrap();
        assert_eq!(found, vec![input.join("b.pdf"), input.join("nested/a.pdf")]);
    }

    #[test]
    fn missing_input_dir_is_an_error() {
        let config = Config::with_paths(
            PathBuf::from("/tmp/db.sqlite"),
            PathBuf::from("/definitely/not/here"),
            PathBuf::from("/tmp/out"),
        );
        assert!(discover_pdfs(&config).is_err());
    }
}
