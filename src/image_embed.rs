//! Optional image embeddings computed during analysis.
//!
//! Vectors are L2-normalized and stored on the analysis record. Nothing in
//! the indexing or query path reads them yet. Enabled with
//! `[image_embedding] enabled = true` on a build with
//! `--features local-embeddings-fastembed`.

use async_trait::async_trait;
use std::path::Path;

use crate::config::ImageEmbeddingConfig;
use crate::error::ProviderError;

#[async_trait]
pub trait ImageEmbedder: Send + Sync {
    fn model_name(&self) -> &str;

    /// A unit-length feature vector for one image file.
    async fn embed_image(&self, path: &Path) -> Result<Vec<f32>, ProviderError>;
}

#[cfg(feature = "local-embeddings-fastembed")]
pub struct FastembedImageEmbedder {
    model_name: String,
    model: std::sync::Arc<std::sync::Mutex<fastembed::ImageEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl FastembedImageEmbedder {
    pub fn new(config: &ImageEmbeddingConfig) -> anyhow::Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "clip-vit-b-32".to_string());
        let variant = match model_name.as_str() {
            "clip-vit-b-32" => fastembed::ImageEmbeddingModel::ClipVitB32,
            "resnet50" => fastembed::ImageEmbeddingModel::Resnet50,
            "unicom-vit-b-16" => fastembed::ImageEmbeddingModel::UnicomVitB16,
            other => anyhow::bail!(
                "Unknown image embedding model: '{}'. Supported models: clip-vit-b-32, resnet50, unicom-vit-b-16",
                other
            ),
        };

        let model = fastembed::ImageEmbedding::try_new(
            fastembed::ImageInitOptions::new(variant).with_show_download_progress(false),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize image embedding model: {}", e))?;

        Ok(Self {
            model_name,
            model: std::sync::Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl ImageEmbedder for FastembedImageEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn embed_image(&self, path: &Path) -> Result<Vec<f32>, ProviderError> {
        let model = self.model.clone();
        let path = path.to_path_buf();
        let mut vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| ProviderError::new("image-embedding", None, "model lock poisoned"))?;
            model
                .embed(vec![path], None)
                .map_err(|e| ProviderError::new("image-embedding", None, e.to_string()))
        })
        .await
        .map_err(|e| ProviderError::new("image-embedding", None, e.to_string()))??;

        let mut vector = vectors
            .pop()
            .ok_or_else(|| ProviderError::new("image-embedding", None, "empty embedding"))?;
        crate::embedding::l2_normalize(&mut vector);
        Ok(vector)
    }
}

/// The configured image embedder, or `None` when disabled or unavailable.
/// Failing to load a model only disables embedding; analysis still runs.
pub fn create_image_embedder(config: &ImageEmbeddingConfig) -> Option<Box<dyn ImageEmbedder>> {
    if !config.enabled {
        return None;
    }

    #[cfg(feature = "local-embeddings-fastembed")]
    {
        match FastembedImageEmbedder::new(config) {
            Ok(embedder) => Some(Box::new(embedder)),
            Err(e) => {
                tracing::warn!(error = %e, "image embedding disabled");
                None
            }
        }
    }

    #[cfg(not(feature = "local-embeddings-fastembed"))]
    {
        tracing::warn!("image embedding requires --features local-embeddings-fastembed; disabled");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_by_default() {
        assert!(create_image_embedder(&ImageEmbeddingConfig::default()).is_none());
    }
}
