//! `fig get`: everything the ledger knows about one source document.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::ledger::Ledger;
use crate::models::{ExtractionRecord, ImageAnalysisRecord, IndexingRecord};

pub struct DocumentReport {
    pub extraction: ExtractionRecord,
    pub images: Vec<(ImageAnalysisRecord, Option<IndexingRecord>)>,
}

/// Find a document by its recorded path, falling back to its stem
/// (`fig get report` for `./pdfs/report.pdf`).
pub async fn get_document_report(ledger: &Ledger, key: &str) -> Result<DocumentReport> {
    let extraction = match ledger.lookup_extraction(key).await? {
        Some(record) => record,
        None => {
            let mut matches: Vec<ExtractionRecord> = ledger
                .list_extractions()
                .await?
                .into_iter()
                .filter(|r| r.document_id() == key)
                .collect();
            match matches.len() {
                0 => bail!("document not found: {}", key),
                1 => matches.remove(0),
                n => bail!("{} documents share the name '{}'; pass the full path", n, key),
            }
        }
    };

    let mut images = Vec::new();
    for analysis in ledger
        .analyses_for_document(&extraction.document_id())
        .await?
    {
        let indexing = ledger
            .get_indexing(&analysis.pdf_file, &analysis.image_path)
            .await?;
        images.push((analysis, indexing));
    }

    Ok(DocumentReport { extraction, images })
}

pub async fn run_get(config: &Config, key: &str) -> Result<()> {
    let ledger = Ledger::open(config).await?;
    let report = get_document_report(&ledger, key).await;
    ledger.close().await;
    let report = report?;
    let doc = &report.extraction;

    println!("--- Document ---");
    println!("path:             {}", doc.pdf_path);
    println!("hash:             {}", doc.pdf_hash);
    println!("processed:        {}", doc.timestamp);
    if doc.is_duplicate {
        println!(
            "duplicate of:     {}",
            doc.original_path.as_deref().unwrap_or("(unknown)")
        );
    } else {
        println!("text extracted:   {}", doc.text_extracted);
        println!("images extracted: {}", doc.images_extracted);
    }
    if let Some(ref err) = doc.error_message {
        println!("error:            {}", err);
    }
    println!();

    println!("--- Images ({}) ---", doc.image_info.len());
    for image in &doc.image_info {
        println!("  {}", image.path);
    }
    println!();

    println!("--- Analyses ({}) ---", report.images.len());
    for (analysis, indexing) in &report.images {
        let status = analysis
            .status_code
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let indexed = match indexing {
            Some(i) if i.success => "indexed",
            Some(_) => "index failed",
            None => "not indexed",
        };
        println!(
            "[{}] {} status={} {}",
            if analysis.success { "ok" } else { "failed" },
            analysis.image,
            status,
            indexed
        );
        if let Some(ref err) = analysis.error_message {
            println!("    error: {}", err);
        }
        if let Some(err) = indexing.as_ref().and_then(|i| i.error_message.as_deref()) {
            println!("    index error: {}", err);
        }
    }

    Ok(())
}
