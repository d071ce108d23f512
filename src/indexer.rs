//! Indexing validated analyses into the vector store.
//!
//! Each (document, image) pair becomes one [`StoredDocument`]:
//!
//! - id: `{document_id}_{image_stem}`
//! - text: the validated JSON object, serialized
//! - metadata: `pdf_file`, `image_path`, `image_type`, `title`, and the
//!   image bytes as base64 in `image_data`
//!
//! Every attempt ends in a `json_indexing` row, success or not.

use base64::Engine;
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

use crate::error::IndexError;
use crate::ledger::Ledger;
use crate::store::{StoredDocument, VectorStore};
use crate::validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed,
    AlreadyIndexed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub total: usize,
    pub validated: usize,
    pub indexed: usize,
    pub already_indexed: usize,
    pub failed: usize,
}

pub struct Indexer {
    ledger: Ledger,
    store: Box<dyn VectorStore>,
}

impl Indexer {
    pub fn new(ledger: Ledger, store: Box<dyn VectorStore>) -> Self {
        Self { ledger, store }
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    /// Store one validated object. A pair already marked indexed is a no-op.
    pub async fn index(
        &self,
        document_id: &str,
        image_path: &str,
        object: &Map<String, Value>,
    ) -> Result<IndexOutcome, IndexError> {
        if let Some(existing) = self.ledger.get_indexing(document_id, image_path).await? {
            if existing.success {
                return Ok(IndexOutcome::AlreadyIndexed);
            }
        }

        match self.store_document(document_id, image_path, object).await {
            Ok(()) => {
                self.ledger
                    .record_indexing(document_id, image_path, true, None)
                    .await?;
                tracing::info!(pdf_file = document_id, image = image_path, "indexed");
                Ok(IndexOutcome::Indexed)
            }
            Err(e) => {
                let msg = e.to_string();
                self.ledger
                    .record_indexing(document_id, image_path, false, Some(&msg))
                    .await?;
                tracing::warn!(pdf_file = document_id, image = image_path, error = %msg, "indexing failed");
                Err(e)
            }
        }
    }

    async fn store_document(
        &self,
        document_id: &str,
        image_path: &str,
        object: &Map<String, Value>,
    ) -> Result<(), IndexError> {
        let path = Path::new(image_path);
        let bytes = std::fs::read(path).map_err(|source| IndexError::Image {
            path: path.to_path_buf(),
            source,
        })?;

        let doc = StoredDocument {
            id: document_key(document_id, path),
            document: Value::Object(object.clone()).to_string(),
            metadata: serde_json::json!({
                "pdf_file": document_id,
                "image_path": image_path,
                "image_type": object.get("image_type").cloned().unwrap_or(Value::Null),
                "title": object.get("title").cloned().unwrap_or(Value::Null),
                "image_data": base64::engine::general_purpose::STANDARD.encode(&bytes),
            }),
        };

        self.store
            .upsert(&doc)
            .await
            .map_err(|e| IndexError::Store {
                id: doc.id.clone(),
                message: e.to_string(),
            })
    }

    /// Validate and index every successful analysis not yet indexed.
    pub async fn run_batch(&self, delay: Duration) -> anyhow::Result<IndexStats> {
        let pending = self.ledger.list_unindexed_successes().await?;
        let mut stats = IndexStats::default();

        for (i, item) in pending.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            stats.total += 1;

            let object = match validate::extract_and_validate(&item.response) {
                Ok(object) => object,
                Err(e) => {
                    tracing::warn!(image = %item.image_path, error = %e, "invalid analysis");
                    self.ledger
                        .record_indexing(&item.pdf_file, &item.image_path, false, Some(&e.to_string()))
                        .await?;
                    stats.failed += 1;
                    continue;
                }
            };
            stats.validated += 1;

            match self.index(&item.pdf_file, &item.image_path, &object).await {
                Ok(IndexOutcome::Indexed) => stats.indexed += 1,
                Ok(IndexOutcome::AlreadyIndexed) => stats.already_indexed += 1,
                Err(_) => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}

/// Stable store id for a (document, image) pair.
pub fn document_key(document_id: &str, image_path: &Path) -> String {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("{}_{}", document_id, stem)
}
