//! Ledger records and the transient values that flow between stages.
//!
//! Records mirror the three ledger tables one-to-one. They are built per
//! operation from ledger rows and discarded afterwards; the ledger is the
//! only durable copy.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// One image written by the extractor, as recorded in `image_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedImage {
    pub filename: String,
    /// Path relative to the output root.
    pub path: String,
}

/// Outcome of extracting one source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRecord {
    pub id: i64,
    pub pdf_path: String,
    pub pdf_hash: String,
    pub timestamp: String,
    pub text_extracted: bool,
    pub images_extracted: bool,
    pub image_info: Vec<ExtractedImage>,
    pub error_message: Option<String>,
    pub is_duplicate: bool,
    pub original_path: Option<String>,
}

impl ExtractionRecord {
    /// Document identity used by the analysis and indexing stages: the
    /// file stem, which also names the document's image directory.
    pub fn document_id(&self) -> String {
        document_id_for(Path::new(&self.pdf_path))
    }
}

pub fn document_id_for(pdf_path: &Path) -> String {
    pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// One vision-model attempt for a (document, image) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAnalysisRecord {
    pub id: i64,
    pub pdf_file: String,
    pub timestamp: String,
    pub image: String,
    pub image_path: String,
    pub success: bool,
    pub status_code: Option<i64>,
    pub response: Option<String>,
    pub error_message: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

/// Whether a (document, image) pair made it into the vector store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingRecord {
    pub id: i64,
    pub pdf_file: String,
    pub image_path: String,
    pub success: bool,
    pub timestamp: String,
    pub error_message: Option<String>,
}

/// A successful analysis still waiting for (or failed at) indexing.
#[derive(Debug, Clone)]
pub struct UnindexedAnalysis {
    pub analysis_id: i64,
    pub pdf_file: String,
    pub image_path: String,
    pub response: String,
}

/// A ranked result from the vector store.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub metadata: serde_json::Value,
    pub document: String,
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_is_file_stem() {
        assert_eq!(document_id_for(Path::new("/data/papers/report 2020.pdf")), "report 2020");
        assert_eq!(document_id_for(Path::new("plain")), "plain");
    }
}
