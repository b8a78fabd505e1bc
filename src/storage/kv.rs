//! Namespaced key-value store over a JSONB table.

use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::Result;

const TABLE: &str = "pgrag_kv_store";

/// Key-value store: `(workspace, namespace, key) -> JSONB`.
#[derive(Debug, Clone)]
pub struct KvStore {
    pool: PgPool,
    workspace: String,
}

impl KvStore {
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
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value JSONB NOT NULL,
                created_at TIMESTAMPTZ DEFAULT NOW(),
                updated_at TIMESTAMPTZ DEFAULT NOW(),
                PRIMARY KEY (workspace, namespace, key)
            );
            CREATE INDEX IF NOT EXISTS idx_{TABLE}_namespace
            ON {TABLE} (workspace, namespace);
            "#
        );
        // Two statements per call: prepared statements take only one, so
        // the DDL must go through the simple query protocol.
        sqlx::raw_sql(&query).execute(&self.pool).await?;
        debug!("Ensured table '{TABLE}'");
        Ok(())
    }

    /// Insert or overwrite a value.
    pub async fn put(&self, namespace: &str, key: &str, value: &Value) -> Result<()> {
        let query = format!(
            r#"
            INSERT INTO {TABLE} (workspace, namespace, key, value)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (workspace, namespace, key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#
        );
        sqlx::query(&query)
            .bind(&self.workspace)
            .bind(namespace)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        let query = format!(
            "SELECT value FROM {TABLE} WHERE workspace = $1 AND namespace = $2 AND key = $3"
        );
        let row = sqlx::query(&query)
            .bind(&self.workspace)
            .bind(namespace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<Value, _>("value")))
    }

    pub async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let query =
            format!("DELETE FROM {TABLE} WHERE workspace = $1 AND namespace = $2 AND key = $3");
        sqlx::query(&query)
            .bind(&self.workspace)
            .bind(namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All keys of a namespace (used for dedupe during ingestion).
    pub async fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let query = format!("SELECT key FROM {TABLE} WHERE workspace = $1 AND namespace = $2");
        let rows = sqlx::query(&query)
            .bind(&self.workspace)
            .bind(namespace)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("key")).collect())
    }
}

// Live-database coverage lives in `tests/postgres_storages.rs` and is
// `#[ignore]`d; it needs PGRAG_TEST_DATABASE_URL pointing at a scratch
// database.
