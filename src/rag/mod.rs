//! Graph RAG client over the Postgres storages.
//!
//! Combines chunking, heuristic entity extraction, vector retrieval and the
//! entity graph into the four query modes (naive, local, global, hybrid),
//! with answers generated by the configured completion endpoint.

pub mod chunker;
pub mod entities;

pub use chunker::{approximate_tokens, content_id, Chunk, Chunker};
pub use entities::{EntityExtractor, EntityMention, EntityRelation};

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::embedding::EmbeddingClient;
use crate::llm::{CompletionStream, LlmClient};
use crate::storage::{
    DocStatus, DocStatusRecord, Storages, VectorRecord, FULL_DOCS_NAMESPACE,
    LLM_CACHE_NAMESPACE, TEXT_CHUNKS_NAMESPACE,
};
use crate::{Error, Result};

/// Reply used when retrieval finds nothing to ground an answer on.
pub const NO_CONTEXT_REPLY: &str =
    "Sorry, I'm not able to provide an answer to that question.[no-context]";

/// System prompt wrapping the retrieved knowledge base.
const RAG_SYSTEM_PROMPT: &str = "---Role---

You are a helpful assistant answering questions about the provided knowledge base.

---Goal---

Answer in {language}, using only information from the knowledge base below. \
If the knowledge base does not contain the answer, say so instead of inventing facts.

---Knowledge Base---

{context}
";

/// How many texts go into one embedding request during ingestion.
const EMBED_BATCH_SIZE: usize = 32;

/// Retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Plain vector retrieval over chunks.
    Naive,
    /// Entity-centric: matched graph nodes, their neighbors and chunks.
    Local,
    /// Relation-centric: strongest edges touching the query's entities.
    Global,
    /// Local and global context merged (default).
    Hybrid,
}

/// Parse a mode name, defaulting to hybrid.
pub fn mode_from_str(mode: &str) -> QueryMode {
    match mode.to_lowercase().as_str() {
        "naive" => QueryMode::Naive,
        "local" => QueryMode::Local,
        "global" => QueryMode::Global,
        "hybrid" => QueryMode::Hybrid,
        other => {
            warn!("Unknown query mode '{}', falling back to hybrid", other);
            QueryMode::Hybrid
        }
    }
}

/// Per-query knobs.
#[derive(Debug, Clone)]
pub struct QueryParam {
    pub mode: QueryMode,
    /// Stream the answer instead of returning it whole.
    pub stream: bool,
    /// Return the rendered context without calling the LLM.
    pub only_need_context: bool,
    /// Return the full prompt without calling the LLM.
    pub only_need_prompt: bool,
    /// Retrieval depth per section.
    pub top_k: usize,
    /// Approximate token cap for the rendered context.
    pub max_context_tokens: usize,
}

impl Default for QueryParam {
    fn default() -> Self {
        Self {
            mode: QueryMode::Hybrid,
            stream: false,
            only_need_context: false,
            only_need_prompt: false,
            top_k: 60,
            max_context_tokens: 4000,
        }
    }
}

/// Tuning knobs: answer language and the entity-type hints handed to the
/// extractor.
#[derive(Debug, Clone)]
pub struct AddonParams {
    pub language: String,
    pub entity_types: Vec<String>,
}

impl Default for AddonParams {
    fn default() -> Self {
        Self {
            language: "english".to_string(),
            entity_types: [
                "Person",
                "Category",
                "Location",
                "Company",
                "Organization",
                "date",
                "Award",
                "Benefit",
                "Career",
                "Event",
                "Community",
                "Product",
                "Tips",
                "Technology",
                "platform",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Embedding function handed to the client: the remote client plus the
/// probed dimension and the endpoint's token limit.
#[derive(Debug, Clone)]
pub struct EmbeddingFunc {
    pub dim: usize,
    pub max_token_size: usize,
    pub client: EmbeddingClient,
}

impl EmbeddingFunc {
    /// Embed texts, truncating each to the endpoint's token limit and
    /// batching requests during ingestion.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let max_chars = self.max_token_size.saturating_mul(4);
        let truncated: Vec<String> = texts
            .iter()
            .map(|t| {
                if t.chars().count() > max_chars {
                    t.chars().take(max_chars).collect()
                } else {
                    t.clone()
                }
            })
            .collect();

        let mut vectors = Vec::with_capacity(truncated.len());
        for batch in truncated.chunks(EMBED_BATCH_SIZE) {
            vectors.extend(self.client.embed(batch).await?);
        }
        Ok(vectors)
    }
}

/// An answer: whole text or a fragment stream.
pub enum QueryResponse {
    Text(String),
    Stream(CompletionStream),
}

/// Builder for [`GraphRag`].
#[derive(Debug)]
pub struct GraphRagBuilder {
    working_dir: PathBuf,
    llm: LlmClient,
    embedding: EmbeddingFunc,
    max_parallel_insert: usize,
    addon_params: AddonParams,
    chunker: Chunker,
}

impl GraphRagBuilder {
    pub fn max_parallel_insert(mut self, n: usize) -> Self {
        self.max_parallel_insert = n.max(1);
        self
    }

    pub fn addon_params(mut self, params: AddonParams) -> Self {
        self.addon_params = params;
        self
    }

    pub fn chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn build(self, storages: Storages) -> GraphRag {
        let extractor = EntityExtractor::with_hints(&self.addon_params.entity_types);
        GraphRag {
            working_dir: self.working_dir,
            llm: self.llm,
            embedding: self.embedding,
            storages,
            max_parallel_insert: self.max_parallel_insert,
            addon_params: self.addon_params,
            chunker: self.chunker,
            extractor,
        }
    }
}

/// The RAG client: Postgres-backed storages plus the two remote endpoints.
pub struct GraphRag {
    working_dir: PathBuf,
    llm: LlmClient,
    embedding: EmbeddingFunc,
    storages: Storages,
    max_parallel_insert: usize,
    addon_params: AddonParams,
    chunker: Chunker,
    extractor: EntityExtractor,
}

impl GraphRag {
    pub fn builder(
        working_dir: impl Into<PathBuf>,
        llm: LlmClient,
        embedding: EmbeddingFunc,
    ) -> GraphRagBuilder {
        GraphRagBuilder {
            working_dir: working_dir.into(),
            llm,
            embedding,
            max_parallel_insert: crate::config::DEFAULT_MAX_PARALLEL_INSERT,
            addon_params: AddonParams::default(),
            chunker: Chunker::default(),
        }
    }

    pub fn working_dir(&self) -> &PathBuf {
        &self.working_dir
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding.dim
    }

    /// Create all storage tables.
    pub async fn initialize_storages(&self) -> Result<()> {
        self.storages.initialize().await
    }

    /// Write the initial pipeline status row.
    pub async fn initialize_pipeline_status(&self) -> Result<()> {
        self.storages.initialize_pipeline_status().await
    }

    /// Close the storage pool.
    pub async fn finalize_storages(&self) {
        self.storages.finalize().await;
    }

    /// Ingest one document with a derived id.
    pub async fn insert(&self, text: &str) -> Result<String> {
        self.insert_with(text, None, None, None).await
    }

    /// Ingest several documents with bounded parallelism.
    pub async fn insert_batch(&self, docs: &[String]) -> Result<Vec<String>> {
        stream::iter(docs.iter().map(|d| self.insert(d)))
            .buffer_unordered(self.max_parallel_insert)
            .try_collect()
            .await
    }

    /// Ingest one document: chunk, extract, embed, store.
    ///
    /// Re-inserting an already processed document is a no-op. The document
    /// status row moves pending -> processing -> processed (failed on error).
    pub async fn insert_with(
        &self,
        text: &str,
        id: Option<String>,
        file_path: Option<String>,
        create_time: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::Config("cannot insert an empty document".to_string()));
        }

        let doc_id = id.unwrap_or_else(|| content_id("doc", trimmed));
        if let Some(existing) = self.storages.doc_status.get(&doc_id).await? {
            if existing.status == DocStatus::Processed {
                debug!("Document {} already processed, skipping", doc_id);
                return Ok(doc_id);
            }
        }

        let summary: String = trimmed.chars().take(100).collect();
        self.storages
            .doc_status
            .upsert(&DocStatusRecord {
                doc_id: doc_id.clone(),
                status: DocStatus::Pending,
                content_summary: summary,
                content_length: trimmed.chars().count() as i64,
                chunk_count: 0,
                file_path,
                create_time,
            })
            .await?;
        self.storages
            .doc_status
            .set_status(&doc_id, DocStatus::Processing, None)
            .await?;

        match self.process_document(&doc_id, trimmed, create_time).await {
            Ok(chunk_count) => {
                self.storages
                    .doc_status
                    .set_status(&doc_id, DocStatus::Processed, Some(chunk_count))
                    .await?;
                info!("Ingested document {} ({} chunks)", doc_id, chunk_count);
                Ok(doc_id)
            }
            Err(e) => {
                // Best effort: the original error matters more than this one.
                let _ = self
                    .storages
                    .doc_status
                    .set_status(&doc_id, DocStatus::Failed, None)
                    .await;
                Err(e)
            }
        }
    }

    async fn process_document(
        &self,
        doc_id: &str,
        text: &str,
        create_time: Option<DateTime<Utc>>,
    ) -> Result<i32> {
        self.storages
            .kv
            .put(
                FULL_DOCS_NAMESPACE,
                doc_id,
                &json!({
                    "content": text,
                    "create_time": create_time.map(|t| t.to_rfc3339()),
                }),
            )
            .await?;

        let chunks = self.chunker.chunk(doc_id, text);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedding.embed(&texts).await?;

        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorRecord {
                chunk_id: chunk.id.clone(),
                doc_id: doc_id.to_string(),
                content: chunk.text.clone(),
                embedding,
            })
            .collect();
        self.storages.vector.upsert(&records).await?;

        for chunk in &chunks {
            self.storages
                .kv
                .put(
                    TEXT_CHUNKS_NAMESPACE,
                    &chunk.id,
                    &json!({
                        "doc_id": chunk.doc_id,
                        "order": chunk.order,
                        "content": chunk.text,
                        "tokens": chunk.tokens,
                    }),
                )
                .await?;

            let (mentions, relations) = self.extractor.extract(chunk);
            for mention in &mentions {
                self.storages
                    .graph
                    .upsert_node(&mention.normalized, &mention.chunk_id)
                    .await?;
            }
            for relation in &relations {
                self.storages
                    .graph
                    .upsert_edge(
                        &relation.from,
                        &relation.to,
                        &relation.relation_type,
                        relation.weight,
                    )
                    .await?;
            }
        }

        Ok(chunks.len() as i32)
    }

    /// Answer a question in the requested mode.
    pub async fn query(&self, question: &str, param: QueryParam) -> Result<QueryResponse> {
        debug!("Query mode {:?}: {}", param.mode, question);

        let context = self.gather_context(question, &param).await?;
        let Some(rendered) = render_context(&context, param.max_context_tokens) else {
            return Ok(QueryResponse::Text(NO_CONTEXT_REPLY.to_string()));
        };

        if param.only_need_context {
            return Ok(QueryResponse::Text(rendered));
        }

        let system_prompt = RAG_SYSTEM_PROMPT
            .replace("{language}", &self.addon_params.language)
            .replace("{context}", &rendered);

        if param.only_need_prompt {
            return Ok(QueryResponse::Text(format!(
                "{system_prompt}\n\n---Question---\n\n{question}"
            )));
        }

        if param.stream {
            let stream = self
                .llm
                .complete_stream(question, Some(&system_prompt), &[])
                .await?;
            return Ok(QueryResponse::Stream(stream));
        }

        // Cached one-shot answers, keyed by mode + prompt + question.
        let cache_key = content_id(
            "resp",
            &format!("{:?}|{}|{}", param.mode, system_prompt, question),
        );
        if let Some(cached) = self.storages.kv.get(LLM_CACHE_NAMESPACE, &cache_key).await? {
            if let Some(answer) = cached.get("answer").and_then(|v| v.as_str()) {
                debug!("LLM cache hit for mode {:?}", param.mode);
                return Ok(QueryResponse::Text(answer.to_string()));
            }
        }

        let answer = self
            .llm
            .complete(question, Some(&system_prompt), &[])
            .await?;
        self.storages
            .kv
            .put(
                LLM_CACHE_NAMESPACE,
                &cache_key,
                &json!({ "answer": answer, "model": self.llm.model() }),
            )
            .await?;
        Ok(QueryResponse::Text(answer))
    }

    async fn gather_context(&self, question: &str, param: &QueryParam) -> Result<ContextData> {
        let keywords = self.extractor.extract_keywords(question);
        let mut data = ContextData::default();

        match param.mode {
            QueryMode::Naive => self.gather_vector(question, param.top_k, &mut data).await?,
            QueryMode::Local => self.gather_local(&keywords, param.top_k, &mut data).await?,
            QueryMode::Global => self.gather_global(&keywords, param.top_k, &mut data).await?,
            QueryMode::Hybrid => {
                self.gather_local(&keywords, param.top_k, &mut data).await?;
                self.gather_global(&keywords, param.top_k, &mut data).await?;
            }
        }
        Ok(data)
    }

    async fn gather_vector(&self, question: &str, top_k: usize, data: &mut ContextData) -> Result<()> {
        let query_embedding = self.embedding.client.embed_one(question).await?;
        for chunk in self.storages.vector.top_k(&query_embedding, top_k).await? {
            data.push_source(chunk.chunk_id, chunk.content);
        }
        Ok(())
    }

    async fn gather_local(
        &self,
        keywords: &[String],
        top_k: usize,
        data: &mut ContextData,
    ) -> Result<()> {
        let nodes = self.storages.graph.nodes_matching(keywords).await?;
        let mut chunk_ids = Vec::new();

        for node in &nodes {
            let related = self
                .storages
                .graph
                .neighbors(&node.name, 5)
                .await?
                .into_iter()
                .map(|(name, _)| name)
                .collect();
            data.entities.push(EntityContext {
                name: node.name.clone(),
                occurrences: node.occurrences,
                related,
            });
            for chunk_id in &node.chunk_ids {
                if !chunk_ids.contains(chunk_id) {
                    chunk_ids.push(chunk_id.clone());
                }
            }
        }

        chunk_ids.truncate(top_k);
        for chunk in self.storages.vector.fetch_chunks(&chunk_ids).await? {
            data.push_source(chunk.chunk_id, chunk.content);
        }
        Ok(())
    }

    async fn gather_global(
        &self,
        keywords: &[String],
        top_k: usize,
        data: &mut ContextData,
    ) -> Result<()> {
        let edges = self.storages.graph.edges_for(keywords, top_k as i64).await?;
        let endpoints: Vec<String> = edges
            .iter()
            .flat_map(|e| [e.source.clone(), e.target.clone()])
            .collect();

        for edge in edges {
            data.relations.push(RelationContext {
                source: edge.source,
                target: edge.target,
                relation: edge.relation,
                weight: edge.weight,
            });
        }

        // Supporting chunks come from the edge endpoints' nodes.
        let nodes = self.storages.graph.nodes_matching(&endpoints).await?;
        let mut chunk_ids = Vec::new();
        for node in &nodes {
            for chunk_id in &node.chunk_ids {
                if !chunk_ids.contains(chunk_id) {
                    chunk_ids.push(chunk_id.clone());
                }
            }
        }
        chunk_ids.truncate(top_k);
        for chunk in self.storages.vector.fetch_chunks(&chunk_ids).await? {
            data.push_source(chunk.chunk_id, chunk.content);
        }
        Ok(())
    }
}

/// One entity line of the rendered context.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EntityContext {
    pub name: String,
    pub occurrences: i32,
    pub related: Vec<String>,
}

/// One relationship line of the rendered context.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RelationContext {
    pub source: String,
    pub target: String,
    pub relation: String,
    pub weight: f32,
}

/// One source chunk of the rendered context.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SourceContext {
    pub chunk_id: String,
    pub content: String,
}

/// Everything retrieval produced for one query.
#[derive(Debug, Clone, Default)]
pub(crate) struct ContextData {
    pub entities: Vec<EntityContext>,
    pub relations: Vec<RelationContext>,
    pub sources: Vec<SourceContext>,
}

impl ContextData {
    fn push_source(&mut self, chunk_id: String, content: String) {
        if !self.sources.iter().any(|s| s.chunk_id == chunk_id) {
            self.sources.push(SourceContext { chunk_id, content });
        }
    }

    fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty() && self.sources.is_empty()
    }
}

/// Render retrieval output as the knowledge-base text handed to the LLM,
/// capping the sources section by the approximate token budget.
pub(crate) fn render_context(data: &ContextData, max_tokens: usize) -> Option<String> {
    if data.is_empty() {
        return None;
    }

    let mut out = String::new();

    if !data.entities.is_empty() {
        out.push_str("-----Entities-----\n");
        out.push_str("entity,occurrences,related\n");
        for e in &data.entities {
            out.push_str(&format!(
                "\"{}\",{},\"{}\"\n",
                e.name,
                e.occurrences,
                e.related.join("; ")
            ));
        }
    }

    if !data.relations.is_empty() {
        out.push_str("-----Relationships-----\n");
        out.push_str("source,target,relation,weight\n");
        for r in &data.relations {
            out.push_str(&format!(
                "\"{}\",\"{}\",\"{}\",{:.1}\n",
                r.source, r.target, r.relation, r.weight
            ));
        }
    }

    if !data.sources.is_empty() {
        let mut budget = max_tokens.saturating_sub(approximate_tokens(&out));
        let mut section = String::from("-----Sources-----\n");
        let mut wrote_any = false;
        for s in &data.sources {
            let cost = approximate_tokens(&s.content);
            if wrote_any && cost > budget {
                break;
            }
            section.push_str(&format!("[{}] {}\n", s.chunk_id, s.content));
            budget = budget.saturating_sub(cost);
            wrote_any = true;
        }
        if wrote_any {
            out.push_str(&section);
        }
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_from_str_parses_known_modes() {
        assert_eq!(mode_from_str("naive"), QueryMode::Naive);
        assert_eq!(mode_from_str("LOCAL"), QueryMode::Local);
        assert_eq!(mode_from_str("Global"), QueryMode::Global);
        assert_eq!(mode_from_str("hybrid"), QueryMode::Hybrid);
    }

    #[test]
    fn mode_from_str_defaults_to_hybrid() {
        assert_eq!(mode_from_str("vector"), QueryMode::Hybrid);
        assert_eq!(mode_from_str(""), QueryMode::Hybrid);
    }

    #[test]
    fn query_param_defaults() {
        let param = QueryParam::default();
        assert_eq!(param.mode, QueryMode::Hybrid);
        assert!(!param.stream);
        assert!(!param.only_need_context);
        assert!(!param.only_need_prompt);
        assert_eq!(param.top_k, 60);
    }

    #[test]
    fn addon_params_default_entity_types() {
        let addon = AddonParams::default();
        assert_eq!(addon.language, "english");
        assert!(addon.entity_types.iter().any(|t| t == "Person"));
        assert!(addon.entity_types.iter().any(|t| t == "Technology"));
        assert!(addon.entity_types.iter().any(|t| t == "platform"));
    }

    #[test]
    fn render_context_empty_returns_none() {
        assert!(render_context(&ContextData::default(), 1000).is_none());
    }

    #[test]
    fn render_context_includes_all_sections() {
        let data = ContextData {
            entities: vec![EntityContext {
                name: "alice".to_string(),
                occurrences: 3,
                related: vec!["bob".to_string(), "acme".to_string()],
            }],
            relations: vec![RelationContext {
                source: "alice".to_string(),
                target: "bob".to_string(),
                relation: "co_occurs".to_string(),
                weight: 2.0,
            }],
            sources: vec![SourceContext {
                chunk_id: "chunk-1".to_string(),
                content: "Alice works with Bob.".to_string(),
            }],
        };

        let rendered = render_context(&data, 1000).unwrap();

        assert!(rendered.contains("-----Entities-----"));
        assert!(rendered.contains("\"alice\",3,\"bob; acme\""));
        assert!(rendered.contains("-----Relationships-----"));
        assert!(rendered.contains("\"alice\",\"bob\",\"co_occurs\",2.0"));
        assert!(rendered.contains("-----Sources-----"));
        assert!(rendered.contains("[chunk-1] Alice works with Bob."));
    }

    #[test]
    fn render_context_caps_sources_by_token_budget() {
        let long = "word ".repeat(200);
        let data = ContextData {
            entities: Vec::new(),
            relations: Vec::new(),
            sources: (0..10)
                .map(|i| SourceContext {
                    chunk_id: format!("chunk-{i}"),
                    content: long.clone(),
                })
                .collect(),
        };

        let rendered = render_context(&data, 450).unwrap();

        // First source always makes it in; later ones fall off the budget.
        assert!(rendered.contains("[chunk-0]"));
        assert!(!rendered.contains("[chunk-9]"));
    }

    #[test]
    fn context_data_dedupes_sources_by_chunk_id() {
        let mut data = ContextData::default();
        data.push_source("c1".to_string(), "text".to_string());
        data.push_source("c1".to_string(), "text".to_string());
        data.push_source("c2".to_string(), "other".to_string());

        assert_eq!(data.sources.len(), 2);
    }

    #[test]
    fn system_prompt_template_has_placeholders() {
        assert!(RAG_SYSTEM_PROMPT.contains("{language}"));
        assert!(RAG_SYSTEM_PROMPT.contains("{context}"));
    }
}
