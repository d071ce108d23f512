//! Vector store abstraction for indexed figures.
//!
//! The [`VectorStore`] trait is what the indexer writes to and `fig query`
//! reads from. Two backends:
//!
//! - [`sqlite::SqliteVectorStore`]: tables in the ledger database. Ranks by
//!   cosine similarity over text embeddings, or by FTS5 when embeddings are
//!   disabled.
//! - [`memory::InMemoryVectorStore`]: token overlap, for tests.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert`](VectorStore::upsert) | Insert, or replace the document with the same id |
//! | [`contains`](VectorStore::contains) | Whether an id is stored |
//! | [`query`](VectorStore::query) | Free text in, ranked hits out |
//! | [`count`](VectorStore::count) | Number of stored documents |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::SearchHit;

/// A retrievable document: primary text plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub document: String,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, doc: &StoredDocument) -> Result<()>;

    async fn contains(&self, id: &str) -> Result<bool>;

    /// At most `limit` hits, best first.
    async fn query(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>>;

    async fn count(&self) -> Result<i64>;
}

/// Lowercased alphanumeric terms of a query or document.
pub(crate) fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}
