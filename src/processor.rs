//! Per-image analysis with ledger-backed caching.
//!
//! [`ImageProcessor::process`] checks the ledger first. An existing
//! `(image_path, pdf_file)` record is returned without any network call,
//! whatever its outcome. A missing record gets a pending row, a vision call,
//! and a final overwrite of that row with the result.
//!
//! [`ImageProcessor::reprocess`] skips the cache branch; the retrier uses it
//! to overwrite a failed record in place.

use std::path::Path;

use crate::error::PipelineError;
use crate::image_embed::ImageEmbedder;
use crate::layout::OutputLayout;
use crate::ledger::{AnalysisSlot, Ledger};
use crate::models::{now_rfc3339, ImageAnalysisRecord};
use crate::vision::VisionAnalyzer;

/// Which branch [`ImageProcessor::process`] took.
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    Cached(ImageAnalysisRecord),
    Fresh(ImageAnalysisRecord),
}

impl AnalysisOutcome {
    pub fn record(&self) -> &ImageAnalysisRecord {
        match self {
            AnalysisOutcome::Cached(r) | AnalysisOutcome::Fresh(r) => r,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, AnalysisOutcome::Cached(_))
    }
}

pub struct ImageProcessor {
    ledger: Ledger,
    analyzer: Box<dyn VisionAnalyzer>,
    embedder: Option<Box<dyn ImageEmbedder>>,
    layout: OutputLayout,
    prompt: String,
}

impl ImageProcessor {
    pub fn new(
        ledger: Ledger,
        analyzer: Box<dyn VisionAnalyzer>,
        layout: OutputLayout,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            analyzer,
            embedder: None,
            layout,
            prompt: prompt.into(),
        }
    }

    pub fn with_image_embedder(mut self, embedder: Option<Box<dyn ImageEmbedder>>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub async fn process(
        &self,
        image_path: &Path,
        document_id: &str,
    ) -> Result<AnalysisOutcome, PipelineError> {
        let key = image_path.to_string_lossy().to_string();
        let image = image_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| key.clone());

        match self.ledger.upsert_analysis(document_id, &image, &key).await? {
            AnalysisSlot::Existing(record) => {
                if record.success {
                    self.restore_artifact(&record, image_path)?;
                }
                tracing::debug!(image = %key, success = record.success, "cached analysis");
                Ok(AnalysisOutcome::Cached(record))
            }
            AnalysisSlot::Created(record) => {
                let record = self.run(record, image_path).await?;
                Ok(AnalysisOutcome::Fresh(record))
            }
        }
    }

    /// Call the provider again for an existing record and overwrite it.
    pub async fn reprocess(
        &self,
        record: &ImageAnalysisRecord,
    ) -> Result<ImageAnalysisRecord, PipelineError> {
        let image_path = Path::new(&record.image_path).to_path_buf();
        self.run(record.clone(), &image_path).await
    }

    async fn run(
        &self,
        mut record: ImageAnalysisRecord,
        image_path: &Path,
    ) -> Result<ImageAnalysisRecord, PipelineError> {
        record.timestamp = now_rfc3339();
        record.success = false;
        record.status_code = None;
        record.response = None;
        record.error_message = None;

        if let Err(e) = image::image_dimensions(image_path) {
            tracing::warn!(image = %record.image_path, error = %e, "unreadable image");
            record.error_message = Some(format!("Invalid image: {}", e));
            self.ledger.update_analysis(&record).await?;
            return Ok(record);
        }

        if record.embedding.is_none() {
            if let Some(ref embedder) = self.embedder {
                match embedder.embed_image(image_path).await {
                    Ok(vector) => record.embedding = Some(vector),
                    Err(e) => {
                        tracing::warn!(image = %record.image_path, error = %e, "image embedding failed")
                    }
                }
            }
        }

        match self.analyzer.analyze(image_path, &self.prompt).await {
            Ok(text) => {
                record.status_code = Some(200);
                let artifact = self.layout.analysis_path(&record.pdf_file, image_path);
                match write_artifact(&artifact, &text) {
                    Ok(()) => {
                        record.success = true;
                        tracing::info!(image = %record.image_path, provider = self.analyzer.name(), "analyzed");
                    }
                    Err(e) => {
                        tracing::warn!(path = %artifact.display(), error = %e, "could not write analysis");
                        record.error_message = Some(format!("Could not write analysis: {}", e));
                    }
                }
                record.response = Some(text);
            }
            Err(e) => {
                tracing::warn!(image = %record.image_path, error = %e, "analysis failed");
                record.status_code = e.status.map(i64::from);
                record.error_message = Some(e.to_string());
            }
        }

        self.ledger.update_analysis(&record).await?;
        Ok(record)
    }

    fn restore_artifact(
        &self,
        record: &ImageAnalysisRecord,
        image_path: &Path,
    ) -> Result<(), PipelineError> {
        let Some(ref text) = record.response else {
            return Ok(());
        };
        let artifact = self.layout.analysis_path(&record.pdf_file, image_path);
        if artifact.exists() {
            return Ok(());
        }
        write_artifact(&artifact, text).map_err(|e| PipelineError::io(&artifact, e))?;
        tracing::info!(path = %artifact.display(), "restored analysis from ledger");
        Ok(())
    }
}

fn write_artifact(path: &Path, text: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)
}
