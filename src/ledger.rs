//! The durable work ledger.
//!
//! Three SQLite tables track every item the pipeline touches:
//!
//! | Table | Key | Written by |
//! |-------|-----|------------|
//! | `pdf_processing` | `pdf_path` | extractor, once per path |
//! | `image_processing` | `(image_path, pdf_file)` | image processor, retrier |
//! | `json_indexing` | `(pdf_file, image_path)` | indexer |
//!
//! Every write is a single statement and therefore its own commit. No
//! transaction spans two stages, so a crash between stages leaves each
//! record either fully written or absent. One writer at a time.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::LedgerError;
use crate::migrate;
use crate::models::{
    now_rfc3339, ExtractedImage, ExtractionRecord, ImageAnalysisRecord, IndexingRecord,
    UnindexedAnalysis,
};

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Which failed analyses a retry sweep selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPredicate {
    /// Every record whose success flag is false.
    Unsuccessful,
    /// Unsuccessful records that ended with this response status, e.g. 429.
    StatusCode(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryFilter {
    pub predicate: RetryPredicate,
    pub offset: u32,
    pub limit: Option<u32>,
}

impl RetryFilter {
    pub fn unsuccessful() -> Self {
        Self {
            predicate: RetryPredicate::Unsuccessful,
            offset: 0,
            limit: None,
        }
    }

    pub fn status(code: i64) -> Self {
        Self {
            predicate: RetryPredicate::StatusCode(code),
            offset: 0,
            limit: None,
        }
    }

    pub fn window(mut self, offset: u32, limit: Option<u32>) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

/// Result of [`Ledger::upsert_analysis`].
#[derive(Debug, Clone)]
pub enum AnalysisSlot {
    /// A record already existed: the cache hit.
    Existing(ImageAnalysisRecord),
    /// A fresh pending record was inserted.
    Created(ImageAnalysisRecord),
}

/// Row counts for `fig stats`.
#[derive(Debug, Clone, Default)]
pub struct LedgerCounts {
    pub documents: i64,
    pub documents_ok: i64,
    pub duplicates: i64,
    pub documents_failed: i64,
    pub images_recorded: i64,
    pub analyses: i64,
    pub analyses_ok: i64,
    pub analyses_rate_limited: i64,
    pub analyses_embedded: i64,
    pub indexed: i64,
    pub index_failed: i64,
}

#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open the ledger named in the config, creating the schema if needed.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        Self::open_path(&config.db.path).await
    }

    pub async fn open_path(path: &Path) -> anyhow::Result<Self> {
        let pool = db::connect_path(path).await?;
        migrate::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ============ Extraction records ============

    /// Insert the one record for a path. A second insert for the same path
    /// fails with [`LedgerError::Conflict`].
    pub async fn upsert_extraction(&self, record: &ExtractionRecord) -> LedgerResult<i64> {
        let image_info = if record.image_info.is_empty() && !record.images_extracted {
            None
        } else {
            Some(
                serde_json::to_string(&record.image_info)
                    .map_err(|e| LedgerError::Decode(e.to_string()))?,
            )
        };

        let result = sqlx::query(
            r#"
            INSERT INTO pdf_processing
                (pdf_path, pdf_hash, process_timestamp, text_extracted, images_extracted,
                 image_info, error_message, is_duplicate, original_path)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.pdf_path)
        .bind(&record.pdf_hash)
        .bind(&record.timestamp)
        .bind(record.text_extracted)
        .bind(record.images_extracted)
        .bind(image_info)
        .bind(&record.error_message)
        .bind(record.is_duplicate)
        .bind(&record.original_path)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(LedgerError::Conflict {
                    path: record.pdf_path.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn lookup_extraction(&self, pdf_path: &str) -> LedgerResult<Option<ExtractionRecord>> {
        let row = sqlx::query("SELECT * FROM pdf_processing WHERE pdf_path = ?")
            .bind(pdf_path)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| extraction_from_row(&r)).transpose()
    }

    /// Another non-duplicate document with the same fingerprint, if any.
    pub async fn find_duplicate(
        &self,
        fingerprint: &str,
        excluding_path: &str,
    ) -> LedgerResult<Option<String>> {
        let original: Option<String> = sqlx::query_scalar(
            r#"
            SELECT pdf_path FROM pdf_processing
            WHERE pdf_hash = ? AND pdf_path != ? AND is_duplicate = 0
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(fingerprint)
        .bind(excluding_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(original)
    }

    /// All extraction records in insertion order.
    pub async fn list_extractions(&self) -> LedgerResult<Vec<ExtractionRecord>> {
        let rows = sqlx::query("SELECT * FROM pdf_processing ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(extraction_from_row).collect()
    }

    // ============ Analysis records ============

    /// Return the existing record for `(image_path, pdf_file)`, or insert a
    /// pending one (success false, no status) and return that.
    pub async fn upsert_analysis(
        &self,
        pdf_file: &str,
        image: &str,
        image_path: &str,
    ) -> LedgerResult<AnalysisSlot> {
        if let Some(existing) = self.get_analysis(pdf_file, image_path).await? {
            return Ok(AnalysisSlot::Existing(existing));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO image_processing (pdf_file, timestamp, image, image_path, success_status)
            VALUES (?, ?, ?, ?, 0)
            ON CONFLICT(image_path, pdf_file) DO NOTHING
            "#,
        )
        .bind(pdf_file)
        .bind(now_rfc3339())
        .bind(image)
        .bind(image_path)
        .execute(&self.pool)
        .await?;

        let record = self
            .get_analysis(pdf_file, image_path)
            .await?
            .ok_or_else(|| LedgerError::Decode(format!("analysis row vanished: {}", image_path)))?;

        if inserted.rows_affected() == 0 {
            Ok(AnalysisSlot::Existing(record))
        } else {
            Ok(AnalysisSlot::Created(record))
        }
    }

    pub async fn get_analysis(
        &self,
        pdf_file: &str,
        image_path: &str,
    ) -> LedgerResult<Option<ImageAnalysisRecord>> {
        let row = sqlx::query("SELECT * FROM image_processing WHERE pdf_file = ? AND image_path = ?")
            .bind(pdf_file)
            .bind(image_path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| analysis_from_row(&r)))
    }

    /// Overwrite the mutable fields of an analysis record. Identity columns
    /// (`pdf_file`, `image`, `image_path`) are left untouched.
    pub async fn update_analysis(&self, record: &ImageAnalysisRecord) -> LedgerResult<()> {
        let blob = record.embedding.as_deref().map(vec_to_blob);
        sqlx::query(
            r#"
            UPDATE image_processing
            SET success_status = ?,
                response_status_code = ?,
                response = ?,
                error_message = ?,
                timestamp = ?,
                embedding = ?
            WHERE id = ?
            "#,
        )
        .bind(record.success)
        .bind(record.status_code)
        .bind(&record.response)
        .bind(&record.error_message)
        .bind(&record.timestamp)
        .bind(blob)
        .bind(record.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Failed analyses matching the filter, in ascending id order.
    pub async fn list_failed_analyses(
        &self,
        filter: &RetryFilter,
    ) -> LedgerResult<Vec<ImageAnalysisRecord>> {
        // SQLite reads a negative LIMIT as "no limit".
        let limit = filter.limit.map(i64::from).unwrap_or(-1);
        let offset = i64::from(filter.offset);
        let rows = match filter.predicate {
            RetryPredicate::Unsuccessful => {
                sqlx::query(
                    r#"
                    SELECT * FROM image_processing
                    WHERE success_status = 0
                    ORDER BY id ASC
                    LIMIT ? OFFSET ?
                    "#,
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            RetryPredicate::StatusCode(code) => {
                sqlx::query(
                    r#"
                    SELECT * FROM image_processing
                    WHERE success_status = 0 AND response_status_code = ?
                    ORDER BY id ASC
                    LIMIT ? OFFSET ?
                    "#,
                )
                .bind(code)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.iter().map(analysis_from_row).collect())
    }

    pub async fn analyses_for_document(
        &self,
        pdf_file: &str,
    ) -> LedgerResult<Vec<ImageAnalysisRecord>> {
        let rows = sqlx::query("SELECT * FROM image_processing WHERE pdf_file = ? ORDER BY id ASC")
            .bind(pdf_file)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(analysis_from_row).collect())
    }

    // ============ Indexing records ============

    /// Successful analyses with no indexing record, or a failed one.
    pub async fn list_unindexed_successes(&self) -> LedgerResult<Vec<UnindexedAnalysis>> {
        let rows = sqlx::query(
            r#"
            SELECT ip.id, ip.pdf_file, ip.image_path, ip.response
            FROM image_processing ip
            LEFT JOIN json_indexing ji
                ON ip.pdf_file = ji.pdf_file AND ip.image_path = ji.image_path
            WHERE ip.success_status = 1
              AND (ji.index_status IS NULL OR ji.index_status = 0)
            ORDER BY ip.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| UnindexedAnalysis {
                analysis_id: row.get("id"),
                pdf_file: row.get("pdf_file"),
                image_path: row.get("image_path"),
                response: row
                    .get::<Option<String>, _>("response")
                    .unwrap_or_default(),
            })
            .collect())
    }

    pub async fn get_indexing(
        &self,
        pdf_file: &str,
        image_path: &str,
    ) -> LedgerResult<Option<IndexingRecord>> {
        let row = sqlx::query("SELECT * FROM json_indexing WHERE pdf_file = ? AND image_path = ?")
            .bind(pdf_file)
            .bind(image_path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| IndexingRecord {
            id: r.get("id"),
            pdf_file: r.get("pdf_file"),
            image_path: r.get("image_path"),
            success: r.get("index_status"),
            timestamp: r.get("timestamp"),
            error_message: r.get("error_message"),
        }))
    }

    pub async fn record_indexing(
        &self,
        pdf_file: &str,
        image_path: &str,
        success: bool,
        error_message: Option<&str>,
    ) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO json_indexing (pdf_file, image_path, index_status, timestamp, error_message)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(pdf_file, image_path) DO UPDATE SET
                index_status = excluded.index_status,
                timestamp = excluded.timestamp,
                error_message = excluded.error_message
            "#,
        )
        .bind(pdf_file)
        .bind(image_path)
        .bind(success)
        .bind(now_rfc3339())
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ============ Aggregates ============

    pub async fn counts(&self) -> LedgerResult<LedgerCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM pdf_processing) AS documents,
                (SELECT COUNT(*) FROM pdf_processing
                    WHERE is_duplicate = 0 AND text_extracted = 1 AND images_extracted = 1) AS documents_ok,
                (SELECT COUNT(*) FROM pdf_processing WHERE is_duplicate = 1) AS duplicates,
                (SELECT COUNT(*) FROM pdf_processing
                    WHERE is_duplicate = 0 AND (text_extracted = 0 OR images_extracted = 0)) AS documents_failed,
                (SELECT COALESCE(SUM(json_array_length(image_info)), 0) FROM pdf_processing
                    WHERE image_info IS NOT NULL) AS images_recorded,
                (SELECT COUNT(*) FROM image_processing) AS analyses,
                (SELECT COUNT(*) FROM image_processing WHERE success_status = 1) AS analyses_ok,
                (SELECT COUNT(*) FROM image_processing WHERE response_status_code = 429) AS analyses_rate_limited,
                (SELECT COUNT(*) FROM image_processing WHERE embedding IS NOT NULL) AS analyses_embedded,
                (SELECT COUNT(*) FROM json_indexing WHERE index_status = 1) AS indexed,
                (SELECT COUNT(*) FROM json_indexing WHERE index_status = 0) AS index_failed
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerCounts {
            documents: row.get("documents"),
            documents_ok: row.get("documents_ok"),
            duplicates: row.get("duplicates"),
            documents_failed: row.get("documents_failed"),
            images_recorded: row.get("images_recorded"),
            analyses: row.get("analyses"),
            analyses_ok: row.get("analyses_ok"),
            analyses_rate_limited: row.get("analyses_rate_limited"),
            analyses_embedded: row.get("analyses_embedded"),
            indexed: row.get("indexed"),
            index_failed: row.get("index_failed"),
        })
    }
}

fn extraction_from_row(row: &SqliteRow) -> LedgerResult<ExtractionRecord> {
    let image_info: Option<String> = row.get("image_info");
    let image_info: Vec<ExtractedImage> = match image_info {
        Some(json) => serde_json::from_str(&json).map_err(|e| {
            LedgerError::Decode(format!("image_info for id {}: {}", row.get::<i64, _>("id"), e))
        })?,
        None => Vec::new(),
    };

    Ok(ExtractionRecord {
        id: row.get("id"),
        pdf_path: row.get("pdf_path"),
        pdf_hash: row.get("pdf_hash"),
        timestamp: row.get("process_timestamp"),
        text_extracted: row.get("text_extracted"),
        images_extracted: row.get("images_extracted"),
        image_info,
        error_message: row.get("error_message"),
        is_duplicate: row.get("is_duplicate"),
        original_path: row.get("original_path"),
    })
}

fn analysis_from_row(row: &SqliteRow) -> ImageAnalysisRecord {
    let blob: Option<Vec<u8>> = row.get("embedding");
    ImageAnalysisRecord {
        id: row.get("id"),
        pdf_file: row.get("pdf_file"),
        timestamp: row.get("timestamp"),
        image: row.get("image"),
        image_path: row.get("image_path"),
        success: row.get("success_status"),
        status_code: row.get("response_status_code"),
        response: row.get("response"),
        error_message: row.get("error_message"),
        embedding: blob.map(|b| blob_to_vec(&b)),
    }
}
