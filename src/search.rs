//! `fig query`: free-text retrieval over indexed figures.
//!
//! Hits come back best first. Human output shows id, source document, image
//! type, and title. `--json` prints the full hits; the base64 image payload
//! is dropped unless `--with-images` is given, since it dwarfs everything
//! else.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::ledger::Ledger;
use crate::models::SearchHit;
use crate::pipeline::build_store;
use crate::store::VectorStore;

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub limit: Option<usize>,
    pub json: bool,
    pub with_images: bool,
}

/// Run a query against any store. `limit` defaults to `retrieval.final_limit`.
pub async fn query_store(
    store: &dyn VectorStore,
    text: &str,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    if text.trim().is_empty() {
        bail!("query text is empty");
    }
    store.query(text, limit.max(1)).await
}

pub fn strip_image_data(hit: &mut SearchHit) {
    if let Some(meta) = hit.metadata.as_object_mut() {
        meta.remove("image_data");
    }
}

pub async fn run_query(config: &Config, text: &str, options: &QueryOptions) -> Result<()> {
    let ledger = Ledger::open(config).await?;
    let store = build_store(config, &ledger)?;
    let limit = options.limit.unwrap_or(config.retrieval.final_limit);
    let hits = query_store(store.as_ref(), text, limit).await;
    ledger.close().await;
    let mut hits = hits?;

    if !options.with_images {
        hits.iter_mut().for_each(strip_image_data);
    }

    if options.json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let field = |key: &str| {
            hit.metadata
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or("-")
                .to_string()
        };
        println!("{}. [{:.3}] {}", i + 1, hit.score, field("title"));
        println!("    pdf: {}", field("pdf_file"));
        println!("    type: {}", field("image_type"));
        println!("    image: {}", field("image_path"));
        println!("    id: {}", hit.id);
        if options.with_images {
            println!("    image_data: {} base64 chars", field("image_data").len());
        }
        println!();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryVectorStore;
    use crate::store::StoredDocument;

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let store = InMemoryVectorStore::new();
        assert!(query_store(&store, "   ", 5).await.is_err());
    }

    #[tokio::test]
    async fn image_data_is_stripped_on_request() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(&StoredDocument {
                id: "r_page1_img1".into(),
                document: "{\"title\":\"rainfall\"}".into(),
                metadata: serde_json::json!({ "title": "rainfall", "image_data": "AAAA" }),
            })
            .await
            .unwrap();

        let mut hits = query_store(&store, "rainfall", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        strip_image_data(&mut hits[0]);
        assert!(hits[0].metadata.get("image_data").is_none());
        assert_eq!(hits[0].metadata["title"], "rainfall");
    }
}
