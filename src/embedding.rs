//! OpenAI-compatible embedding client
//!
//! Forwards batches of texts to a remote `/embeddings` endpoint and is used
//! once at startup to probe the embedding dimensionality.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EndpointConfig;
use crate::{Error, Result};

/// Sentence used to probe the embedding dimension.
const PROBE_TEXT: &str = "This is a test sentence.";

/// Embedding client for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl EmbeddingClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::Config("embedding API key is empty".to_string()));
        }

        let http = Client::builder()
            .user_agent("pgrag/0.1.0")
            .build()
            .map_err(|e| Error::Http(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }

    pub fn from_config(config: &EndpointConfig) -> Result<Self> {
        Self::new(&config.base_url, &config.api_key, &config.model)
    }

    /// Embed a batch of texts, preserving input order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Embedding {} texts", texts.len());

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(format!("embedding request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("invalid embedding response: {}", e)))?;

        if parsed.data.len() != texts.len() {
            return Err(Error::EmptyResponse(format!(
                "embedding endpoint returned {} vectors for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }

        // The endpoint may reorder items; restore input order by index.
        let mut data = parsed.data;
        data.sort_by_key(|item| item.index);
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }

    /// Embed one text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(std::slice::from_ref(&text.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmptyResponse("embedding".to_string()))
    }

    /// Probe the embedding dimensionality with a fixed test sentence.
    pub async fn probe_dimension(&self) -> Result<usize> {
        let embedding = self.embed_one(PROBE_TEXT).await?;
        if embedding.is_empty() {
            return Err(Error::EmptyResponse("embedding dimension probe".to_string()));
        }
        Ok(embedding.len())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}
