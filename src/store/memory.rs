//! In-memory [`VectorStore`] for tests and dry runs.
//!
//! Scores a document by the fraction of distinct query terms it contains.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::SearchHit;

use super::{terms, StoredDocument, VectorStore};

pub struct InMemoryVectorStore {
    docs: RwLock<BTreeMap<String, StoredDocument>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, id: &str) -> Option<StoredDocument> {
        self.docs.read().ok()?.get(id).cloned()
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, doc: &StoredDocument) -> Result<()> {
        let mut docs = self
            .docs
            .write()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn contains(&self, id: &str) -> Result<bool> {
        let docs = self
            .docs
            .read()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        Ok(docs.contains_key(id))
    }

    async fn query(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let wanted: HashSet<String> = terms(text).into_iter().collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let docs = self
            .docs
            .read()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;

        let mut hits: Vec<SearchHit> = docs
            .values()
            .filter_map(|doc| {
                let have: HashSet<String> = terms(&doc.document).into_iter().collect();
                let matched = wanted.intersection(&have).count();
                if matched == 0 {
                    return None;
                }
                Some(SearchHit {
                    id: doc.id.clone(),
                    score: matched as f64 / wanted.len() as f64,
                    metadata: doc.metadata.clone(),
                    document: doc.document.clone(),
                })
            })
            .collect();

        // BTreeMap iteration is id-ordered and the sort is stable, so ties
        // stay in id order.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self) -> Result<i64> {
        let docs = self
            .docs
            .read()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        Ok(docs.len() as i64)
    }
}
