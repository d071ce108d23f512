//! SQLite-backed [`VectorStore`].
//!
//! Documents live in `index_documents`, their text in the FTS5 table
//! `index_documents_fts`, and one embedding per document in
//! `index_vectors`. All three are written in one transaction per upsert.
//!
//! With an enabled [`TextEmbedder`], queries are embedded and ranked by
//! brute-force cosine similarity. With embeddings disabled, queries go to
//! FTS5 and are ranked by BM25.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, TextEmbedder};
use crate::models::SearchHit;

use super::{terms, StoredDocument, VectorStore};

pub struct SqliteVectorStore {
    pool: SqlitePool,
    embedder: Box<dyn TextEmbedder>,
}

impl SqliteVectorStore {
    /// The pool must already carry the schema (see [`crate::migrate`]).
    pub fn new(pool: SqlitePool, embedder: Box<dyn TextEmbedder>) -> Self {
        Self { pool, embedder }
    }

    async fn vector_query(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let query_vec = self.embedder.embed_one(text).await?;

        let rows = sqlx::query(
            r#"
            SELECT d.id, d.document, d.metadata_json, v.embedding
            FROM index_vectors v
            JOIN index_documents d ON d.id = v.doc_id
            WHERE v.model = ?
            "#,
        )
        .bind(self.embedder.model_name())
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let score = cosine_similarity(&query_vec, &blob_to_vec(&blob)) as f64;
                hit_from_row(row, score)
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn keyword_query(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let Some(expr) = fts_expression(text) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT d.id, d.document, d.metadata_json, m.rank
            FROM (
                SELECT doc_id, rank
                FROM index_documents_fts
                WHERE index_documents_fts MATCH ?
                ORDER BY rank
                LIMIT ?
            ) m
            JOIN index_documents d ON d.id = m.doc_id
            ORDER BY m.rank
            "#,
        )
        .bind(expr)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                hit_from_row(row, -rank)
            })
            .collect())
    }
}

fn hit_from_row(row: &sqlx::sqlite::SqliteRow, score: f64) -> SearchHit {
    let metadata_json: String = row.get("metadata_json");
    SearchHit {
        id: row.get("id"),
        score,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        document: row.get("document"),
    }
}

/// Quote every term and OR them together, so user punctuation can never be
/// read as FTS5 syntax.
fn fts_expression(text: &str) -> Option<String> {
    let quoted: Vec<String> = terms(text)
        .into_iter()
        .map(|t| format!("\"{}\"", t))
        .collect();
    if quoted.is_empty() {
        None
    } else {
        Some(quoted.join(" OR "))
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, doc: &StoredDocument) -> Result<()> {
        // Embed before touching the tables so a provider failure writes nothing.
        let vector = if self.embedder.is_enabled() {
            Some(self.embedder.embed_one(&doc.document).await?)
        } else {
            None
        };

        let metadata_json = serde_json::to_string(&doc.metadata)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO index_documents (id, document, metadata_json, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document = excluded.document,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.document)
        .bind(&metadata_json)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM index_documents_fts WHERE doc_id = ?")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO index_documents_fts (doc_id, document) VALUES (?, ?)")
            .bind(&doc.id)
            .bind(&doc.document)
            .execute(&mut *tx)
            .await?;

        if let Some(vector) = vector {
            sqlx::query(
                r#"
                INSERT INTO index_vectors (doc_id, model, dims, embedding)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(doc_id) DO UPDATE SET
                    model = excluded.model,
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&doc.id)
            .bind(self.embedder.model_name())
            .bind(vector.len() as i64)
            .bind(vec_to_blob(&vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn contains(&self, id: &str) -> Result<bool> {
        let found: Option<String> = sqlx::query_scalar("SELECT id FROM index_documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn query(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if self.embedder.is_enabled() {
            self.vector_query(text, limit).await
        } else {
            self.keyword_query(text, limit).await
        }
    }

    async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledEmbedder;

    async fn temp_store() -> (tempfile::TempDir, SqliteVectorStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::connect_path(&dir.path().join("store.sqlite"))
            .await
            .unwrap();
        crate::migrate::ensure_schema(&pool).await.unwrap();
        (dir, SqliteVectorStore::new(pool, Box::new(DisabledEmbedder)))
    }

    fn doc(id: &str, text: &str) -> StoredDocument {
        StoredDocument {
            id: id.to_string(),
            document: text.to_string(),
            metadata: serde_json::json!({ "pdf_file": "report", "title": id }),
        }
    }

    #[test]
    fn fts_expression_quotes_terms() {
        assert_eq!(
            fts_expression("GDP \"growth\" AND-OR").as_deref(),
            Some("\"gdp\" OR \"growth\" OR \"and\" OR \"or\"")
        );
        assert_eq!(fts_expression("*** "), None);
    }

    #[tokio::test]
    async fn upsert_twice_keeps_one_document() {
        let (_dir, store) = temp_store().await;
        store.upsert(&doc("report_page1_img1", "old caption")).await.unwrap();
        store.upsert(&doc("report_page1_img1", "rainfall chart")).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.contains("report_page1_img1").await.unwrap());
        assert!(store.query("old", 5).await.unwrap().is_empty());

        let hits = store.query("rainfall", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata["pdf_file"], "report");
    }

    #[tokio::test]
    async fn keyword_query_ranks_and_limits() {
        let (_dir, store) = temp_store().await;
        store.upsert(&doc("a", "population pyramid by age")).await.unwrap();
        store.upsert(&doc("b", "population population growth line graph")).await.unwrap();
        store.upsert(&doc("c", "org chart")).await.unwrap();

        let hits = store.query("population growth", 5).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids[0], "b");
        assert_eq!(ids.len(), 2);

        assert_eq!(store.query("population", 1).await.unwrap().len(), 1);
    }
}
