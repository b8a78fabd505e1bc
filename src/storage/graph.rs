//! Entity graph store: nodes and weighted undirected edges in Postgres.
//!
//! Edges are stored once with an ordered `(source, target)` key; repeated
//! upserts accumulate weight and occurrence counts, so re-ingesting a
//! document strengthens existing links instead of duplicating them.

use sqlx::{PgPool, Row};
use tracing::debug;

use crate::Result;

const NODES_TABLE: &str = "pgrag_graph_nodes";
const EDGES_TABLE: &str = "pgrag_graph_edges";

/// Entity node.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: String,
    pub occurrences: i32,
    pub chunk_ids: Vec<String>,
}

/// Weighted undirected edge between two entities.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relation: String,
    pub weight: f32,
}

/// Graph store keyed by workspace.
#[derive(Debug, Clone)]
pub struct GraphStore {
    pool: PgPool,
    workspace: String,
}

/// Canonical key for an undirected edge.
pub(crate) fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl GraphStore {
    pub fn new(pool: PgPool, workspace: &str) -> Self {
        Self {
            pool,
            workspace: workspace.to_string(),
        }
    }

    pub(crate) async fn create_tables(&self) -> Result<()> {
        let query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {NODES_TABLE} (
                workspace TEXT NOT NULL,
                name TEXT NOT NULL,
                occurrences INTEGER NOT NULL DEFAULT 0,
                chunk_ids TEXT[] NOT NULL DEFAULT '{{}}',
                created_at TIMESTAMPTZ DEFAULT NOW(),
                updated_at TIMESTAMPTZ DEFAULT NOW(),
                PRIMARY KEY (workspace, name)
            );
            CREATE TABLE IF NOT EXISTS {EDGES_TABLE} (
                workspace TEXT NOT NULL,
                source TEXT NOT NULL,
                target TEXT NOT NULL,
                relation TEXT NOT NULL,
                weight REAL NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ DEFAULT NOW(),
                updated_at TIMESTAMPTZ DEFAULT NOW(),
                PRIMARY KEY (workspace, source, target)
            );
            CREATE INDEX IF NOT EXISTS idx_{EDGES_TABLE}_source
            ON {EDGES_TABLE} (workspace, source);
            CREATE INDEX IF NOT EXISTS idx_{EDGES_TABLE}_target
            ON {EDGES_TABLE} (workspace, target);
            "#
        );
        sqlx::raw_sql(&query).execute(&self.pool).await?;
        debug!("Ensured tables '{NODES_TABLE}', '{EDGES_TABLE}'");
        Ok(())
    }

    /// Record an entity occurrence inside a chunk.
    pub async fn upsert_node(&self, name: &str, chunk_id: &str) -> Result<()> {
        let query = format!(
            r#"
            INSERT INTO {NODES_TABLE} (workspace, name, occurrences, chunk_ids)
            VALUES ($1, $2, 1, ARRAY[$3])
            ON CONFLICT (workspace, name)
            DO UPDATE SET
                occurrences = {NODES_TABLE}.occurrences + 1,
                chunk_ids = (
                    SELECT ARRAY(
                        SELECT DISTINCT unnest({NODES_TABLE}.chunk_ids || ARRAY[$3])
                    )
                ),
                updated_at = NOW()
            "#
        );
        sqlx::query(&query)
            .bind(&self.workspace)
            .bind(name)
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record (or strengthen) an undirected edge between two entities.
    pub async fn upsert_edge(
        &self,
        a: &str,
        b: &str,
        relation: &str,
        weight: f32,
    ) -> Result<()> {
        let (source, target) = ordered_pair(a, b);
        let query = format!(
            r#"
            INSERT INTO {EDGES_TABLE} (workspace, source, target, relation, weight)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (workspace, source, target)
            DO UPDATE SET
                weight = {EDGES_TABLE}.weight + EXCLUDED.weight,
                updated_at = NOW()
            "#
        );
        sqlx::query(&query)
            .bind(&self.workspace)
            .bind(source)
            .bind(target)
            .bind(relation)
            .bind(weight)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn node(&self, name: &str) -> Result<Option<GraphNode>> {
        let query = format!(
            "SELECT name, occurrences, chunk_ids FROM {NODES_TABLE} \
             WHERE workspace = $1 AND name = $2"
        );
        let row = sqlx::query(&query)
            .bind(&self.workspace)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| GraphNode {
            name: r.get("name"),
            occurrences: r.get("occurrences"),
            chunk_ids: r.get("chunk_ids"),
        }))
    }

    /// Nodes matching any of the given names.
    pub async fn nodes_matching(&self, names: &[String]) -> Result<Vec<GraphNode>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT name, occurrences, chunk_ids FROM {NODES_TABLE} \
             WHERE workspace = $1 AND name = ANY($2) \
             ORDER BY occurrences DESC"
        );
        let rows = sqlx::query(&query)
            .bind(&self.workspace)
            .bind(names)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| GraphNode {
                name: r.get("name"),
                occurrences: r.get("occurrences"),
                chunk_ids: r.get("chunk_ids"),
            })
            .collect())
    }

    /// Strongest neighbors of one entity, weight descending.
    pub async fn neighbors(&self, entity: &str, limit: i64) -> Result<Vec<(String, f32)>> {
        let query = format!(
            r#"
            SELECT source, target, weight FROM {EDGES_TABLE}
            WHERE workspace = $1 AND (source = $2 OR target = $2)
            ORDER BY weight DESC
            LIMIT $3
            "#
        );
        let rows = sqlx::query(&query)
            .bind(&self.workspace)
            .bind(entity)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let source: String = r.get("source");
                let target: String = r.get("target");
                let other = if source == entity { target } else { source };
                (other, r.get::<f32, _>("weight"))
            })
            .collect())
    }

    /// Strongest edges touching any of the given entities.
    pub async fn edges_for(&self, entities: &[String], limit: i64) -> Result<Vec<GraphEdge>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            r#"
            SELECT source, target, relation, weight FROM {EDGES_TABLE}
            WHERE workspace = $1 AND (source = ANY($2) OR target = ANY($2))
            ORDER BY weight DESC
            LIMIT $3
            "#
        );
        let rows = sqlx::query(&query)
            .bind(&self.workspace)
            .bind(entities)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| GraphEdge {
                source: r.get("source"),
                target: r.get("target"),
                relation: r.get("relation"),
                weight: r.get("weight"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_pair_is_canonical() {
        assert_eq!(ordered_pair("alice", "bob"), ("alice", "bob"));
        assert_eq!(ordered_pair("bob", "alice"), ("alice", "bob"));
        assert_eq!(ordered_pair("same", "same"), ("same", "same"));
    }
}
