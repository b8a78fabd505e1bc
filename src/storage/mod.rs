//! PostgreSQL-backed storages
//!
//! All four storages (key-value, document status, graph, vector) share one
//! connection pool and are namespaced by a workspace label — the graph name
//! from the configuration — so several corpora can live in one database.

pub mod doc_status;
pub mod graph;
pub mod kv;
pub mod vector;

pub use doc_status::{DocStatus, DocStatusRecord, DocStatusStore};
pub use graph::{GraphEdge, GraphNode, GraphStore};
pub use kv::KvStore;
pub use vector::{ScoredChunk, VectorRecord, VectorStore};

use chrono::Utc;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::Config;
use crate::Result;

/// KV namespace holding the ingestion pipeline status row.
pub const PIPELINE_STATUS_NAMESPACE: &str = "pipeline_status";
/// KV namespace holding full source documents.
pub const FULL_DOCS_NAMESPACE: &str = "full_docs";
/// KV namespace holding chunk records.
pub const TEXT_CHUNKS_NAMESPACE: &str = "text_chunks";
/// KV namespace caching one-shot completion answers.
pub const LLM_CACHE_NAMESPACE: &str = "llm_response_cache";

/// The four Postgres storages behind one pool.
#[derive(Debug, Clone)]
pub struct Storages {
    pool: PgPool,
    pub kv: KvStore,
    pub doc_status: DocStatusStore,
    pub graph: GraphStore,
    pub vector: VectorStore,
}

impl Storages {
    /// Connect to Postgres and hand out the stores.
    ///
    /// Tables are not created here; call [`Storages::initialize`] before use.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(&config.postgres.url())
            .await?;
        Ok(Self::with_pool(pool, &config.graph_name))
    }

    /// Wrap an existing pool (tests use this with their own database).
    pub fn with_pool(pool: PgPool, workspace: &str) -> Self {
        Self {
            kv: KvStore::new(pool.clone(), workspace),
            doc_status: DocStatusStore::new(pool.clone(), workspace),
            graph: GraphStore::new(pool.clone(), workspace),
            vector: VectorStore::new(pool.clone(), workspace),
            pool,
        }
    }

    /// Create all tables idempotently.
    pub async fn initialize(&self) -> Result<()> {
        self.kv.create_table().await?;
        self.doc_status.create_table().await?;
        self.graph.create_tables().await?;
        self.vector.create_table().await?;
        info!("Postgres storages initialized");
        Ok(())
    }

    /// Write the initial pipeline status row if none exists.
    pub async fn initialize_pipeline_status(&self) -> Result<()> {
        if self
            .kv
            .get(PIPELINE_STATUS_NAMESPACE, "status")
            .await?
            .is_none()
        {
            let status = json!({
                "busy": false,
                "job_name": "",
                "docs": 0,
                "history_messages": [],
                "initialized_at": Utc::now().to_rfc3339(),
            });
            self.kv
                .put(PIPELINE_STATUS_NAMESPACE, "status", &status)
                .await?;
        }
        Ok(())
    }

    /// Close the pool. Safe to call after a failed run.
    pub async fn finalize(&self) {
        self.pool.close().await;
        info!("Postgres storages finalized");
    }
}
