use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every ledger and store table. Safe to call on each open.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    // One row per source document, written once.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pdf_processing (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pdf_path TEXT NOT NULL UNIQUE,
            pdf_hash TEXT NOT NULL,
            process_timestamp TEXT NOT NULL,
            text_extracted INTEGER NOT NULL DEFAULT 0,
            images_extracted INTEGER NOT NULL DEFAULT 0,
            image_info TEXT,
            error_message TEXT,
            is_duplicate INTEGER NOT NULL DEFAULT 0,
            original_path TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per (document, image); identity columns never change.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS image_processing (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pdf_file TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            image TEXT NOT NULL,
            image_path TEXT NOT NULL,
            success_status INTEGER NOT NULL DEFAULT 0,
            response_status_code INTEGER,
            response TEXT,
            error_message TEXT,
            embedding BLOB,
            UNIQUE(image_path, pdf_file)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS json_indexing (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pdf_file TEXT NOT NULL,
            image_path TEXT NOT NULL,
            index_status INTEGER NOT NULL DEFAULT 0,
            timestamp TEXT NOT NULL,
            error_message TEXT,
            UNIQUE(pdf_file, image_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector store collection.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_documents (
            id TEXT PRIMARY KEY,
            document TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_vectors (
            doc_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (doc_id) REFERENCES index_documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='index_documents_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE index_documents_fts USING fts5(
                doc_id UNINDEXED,
                document
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pdf_hash ON pdf_processing(pdf_hash)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_image_processing_status ON image_processing(response_status_code)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_image_processing_pdf ON image_processing(pdf_file)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
