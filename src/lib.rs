//! Graph RAG over PostgreSQL with OpenAI-compatible endpoints.
//!
//! The crate wires four Postgres-backed storages (key-value, document
//! status, entity graph, chunk vectors) to a completion endpoint and an
//! embedding endpoint, and exposes a [`GraphRag`] client with naive,
//! local, global and hybrid query modes. Configuration comes from the
//! environment (plus an optional `.env` file); logs go to stderr and a
//! size-rotated file under the configured log directory.

pub mod config;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod logging;
pub mod rag;
pub mod storage;

pub use config::Config;
pub use embedding::EmbeddingClient;
pub use error::{Error, Result};
pub use llm::{ChatMessage, CompletionStream, LlmClient};
pub use logging::configure_logging;
pub use rag::{
    mode_from_str, AddonParams, EmbeddingFunc, GraphRag, QueryMode, QueryParam, QueryResponse,
    NO_CONTEXT_REPLY,
};
pub use storage::Storages;
