//! Document ingestion status store.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::{Error, Result};

const TABLE: &str = "pgrag_doc_status";

/// Lifecycle of a document inside the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl DocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocStatus::Pending => "pending",
            DocStatus::Processing => "processing",
            DocStatus::Processed => "processed",
            DocStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(DocStatus::Pending),
            "processing" => Ok(DocStatus::Processing),
            "processed" => Ok(DocStatus::Processed),
            "failed" => Ok(DocStatus::Failed),
            other => Err(Error::Database(format!("unknown doc status '{other}'"))),
        }
    }
}

/// One document's status row.
#[derive(Debug, Clone)]
pub struct DocStatusRecord {
    pub doc_id: String,
    pub status: DocStatus,
    pub content_summary: String,
    pub content_length: i64,
    pub chunk_count: i32,
    pub file_path: Option<String>,
    pub create_time: Option<DateTime<Utc>>,
}

/// Status store: one row per ingested document per workspace.
#[derive(Debug, Clone)]
pub struct DocStatusStore {
    pool: PgPool,
    workspace: String,
}

impl DocStatusStore {
    pub fn new(pool: PgPool, workspace: &str) -> Self {
        Self {
            pool,
            workspace: workspace.to_string(),
        }
    }

    pub(crate) async fn create_table(&self) -> Result<()> {
        let query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {TABLE} (
                workspace TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                status TEXT NOT NULL,
                content_summary TEXT NOT NULL DEFAULT '',
                content_length BIGINT NOT NULL DEFAULT 0,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                file_path TEXT,
                create_time TIMESTAMPTZ,
                created_at TIMESTAMPTZ DEFAULT NOW(),
                updated_at TIMESTAMPTZ DEFAULT NOW(),
                PRIMARY KEY (workspace, doc_id)
            );
            CREATE INDEX IF NOT EXISTS idx_{TABLE}_status
            ON {TABLE} (workspace, status);
            "#
        );
        sqlx::raw_sql(&query).execute(&self.pool).await?;
        debug!("Ensured table '{TABLE}'");
        Ok(())
    }

    /// Insert or overwrite a document's status row.
    pub async fn upsert(&self, record: &DocStatusRecord) -> Result<()> {
        let query = format!(
            r#"
            INSERT INTO {TABLE}
                (workspace, doc_id, status, content_summary, content_length,
                 chunk_count, file_path, create_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (workspace, doc_id)
            DO UPDATE SET
                status = EXCLUDED.status,
                content_summary = EXCLUDED.content_summary,
                content_length = EXCLUDED.content_length,
                chunk_count = EXCLUDED.chunk_count,
                file_path = EXCLUDED.file_path,
                create_time = EXCLUDED.create_time,
                updated_at = NOW()
            "#
        );
        sqlx::query(&query)
            .bind(&self.workspace)
            .bind(&record.doc_id)
            .bind(record.status.as_str())
            .bind(&record.content_summary)
            .bind(record.content_length)
            .bind(record.chunk_count)
            .bind(&record.file_path)
            .bind(record.create_time)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Move a document to a new status, updating the chunk count.
    pub async fn set_status(
        &self,
        doc_id: &str,
        status: DocStatus,
        chunk_count: Option<i32>,
    ) -> Result<()> {
        let query = format!(
            r#"
            UPDATE {TABLE}
            SET status = $3, chunk_count = COALESCE($4, chunk_count), updated_at = NOW()
            WHERE workspace = $1 AND doc_id = $2
            "#
        );
        sqlx::query(&query)
            .bind(&self.workspace)
            .bind(doc_id)
            .bind(status.as_str())
            .bind(chunk_count)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, doc_id: &str) -> Result<Option<DocStatusRecord>> {
        let query = format!(
            r#"
            SELECT doc_id, status, content_summary, content_length,
                   chunk_count, file_path, create_time
            FROM {TABLE} WHERE workspace = $1 AND doc_id = $2
            "#
        );
        let row = sqlx::query(&query)
            .bind(&self.workspace)
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            Ok(DocStatusRecord {
                doc_id: r.get("doc_id"),
                status: DocStatus::parse(r.get::<String, _>("status").as_str())?,
                content_summary: r.get("content_summary"),
                content_length: r.get("content_length"),
                chunk_count: r.get("chunk_count"),
                file_path: r.get("file_path"),
                create_time: r.get("create_time"),
            })
        })
        .transpose()
    }

    /// Ids of documents currently in the given status.
    pub async fn ids_with_status(&self, status: DocStatus) -> Result<Vec<String>> {
        let query = format!("SELECT doc_id FROM {TABLE} WHERE workspace = $1 AND status = $2");
        let rows = sqlx::query(&query)
            .bind(&self.workspace)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("doc_id")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            DocStatus::Pending,
            DocStatus::Processing,
            DocStatus::Processed,
            DocStatus::Failed,
        ] {
            assert_eq!(DocStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_an_error() {
        let err = DocStatus::parse("archived").unwrap_err();
        assert!(err.to_string().contains("archived"));
    }
}
