//! Chunk embedding store with cosine top-k retrieval.
//!
//! Embeddings are stored as `real[]`; similarity is computed client-side
//! over the workspace's rows, which is plenty for a demo-scale corpus.

use sqlx::{PgPool, Row};
use tracing::debug;

use crate::Result;

const TABLE: &str = "pgrag_vectors";

/// One embedded chunk to be stored.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub chunk_id: String,
    pub doc_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub content: String,
    pub score: f32,
}

/// Vector store keyed by workspace.
#[derive(Debug, Clone)]
pub struct VectorStore {
    pool: PgPool,
    workspace: String,
}

impl VectorStore {
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
                chunk_id TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding REAL[] NOT NULL,
                created_at TIMESTAMPTZ DEFAULT NOW(),
                PRIMARY KEY (workspace, chunk_id)
            );
            CREATE INDEX IF NOT EXISTS idx_{TABLE}_doc
            ON {TABLE} (workspace, doc_id);
            "#
        );
        sqlx::raw_sql(&query).execute(&self.pool).await?;
        debug!("Ensured table '{TABLE}'");
        Ok(())
    }

    /// Insert or overwrite embedded chunks.
    pub async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let query = format!(
            r#"
            INSERT INTO {TABLE} (workspace, chunk_id, doc_id, content, embedding)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (workspace, chunk_id)
            DO UPDATE SET
                doc_id = EXCLUDED.doc_id,
                content = EXCLUDED.content,
                embedding = EXCLUDED.embedding
            "#
        );
        for record in records {
            sqlx::query(&query)
                .bind(&self.workspace)
                .bind(&record.chunk_id)
                .bind(&record.doc_id)
                .bind(&record.content)
                .bind(&record.embedding)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Top-k chunks by cosine similarity to the query embedding.
    pub async fn top_k(&self, query_embedding: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let query = format!(
            "SELECT chunk_id, doc_id, content, embedding FROM {TABLE} WHERE workspace = $1"
        );
        let rows = sqlx::query(&query)
            .bind(&self.workspace)
            .fetch_all(&self.pool)
            .await?;

        let mut scored: Vec<ScoredChunk> = rows
            .into_iter()
            .map(|r| {
                let embedding: Vec<f32> = r.get("embedding");
                ScoredChunk {
                    chunk_id: r.get("chunk_id"),
                    doc_id: r.get("doc_id"),
                    content: r.get("content"),
                    score: cosine_similarity(query_embedding, &embedding),
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        debug!("Vector query returned {} chunks", scored.len());
        Ok(scored)
    }

    /// Fetch specific chunks by id, preserving the requested order.
    pub async fn fetch_chunks(&self, chunk_ids: &[String]) -> Result<Vec<ScoredChunk>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT chunk_id, doc_id, content FROM {TABLE} \
             WHERE workspace = $1 AND chunk_id = ANY($2)"
        );
        let rows = sqlx::query(&query)
            .bind(&self.workspace)
            .bind(chunk_ids)
            .fetch_all(&self.pool)
            .await?;

        let mut by_id: std::collections::HashMap<String, ScoredChunk> = rows
            .into_iter()
            .map(|r| {
                let chunk = ScoredChunk {
                    chunk_id: r.get("chunk_id"),
                    doc_id: r.get("doc_id"),
                    content: r.get("content"),
                    score: 0.0,
                };
                (chunk.chunk_id.clone(), chunk)
            })
            .collect();

        Ok(chunk_ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect())
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}
