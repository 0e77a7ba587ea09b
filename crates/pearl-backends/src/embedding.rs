//! Embedding providers: deterministic `text -> fixed-dimension vector`.
//!
//! Two variants behind one trait, the same "one trait, several structs" shape the
//! chat backends use. `embed_batch(&[])` returns `[]` without a network call for
//! either variant.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError>;
    fn dimensions(&self) -> usize;
}

/// Local provider: exposes only a single-item endpoint; batches are parallel
/// single-item calls via `join_all`.
pub struct LocalEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    dimensions: usize,
}

impl LocalEmbeddingProvider {
    pub fn new(base_url: impl Into<String>, dimensions: usize, client: reqwest::Client) -> Self {
        LocalEmbeddingProvider {
            client,
            base_url: base_url.into(),
            dimensions,
        }
    }
}

#[derive(Serialize)]
struct LocalEmbedRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct LocalEmbedResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let resp = self
            .client
            .post(format!("{}/embed", self.base_url))
            .json(&LocalEmbedRequest { input: text })
            .send()
            .await?
            .error_for_status()?;
        let body: LocalEmbedResponse = resp.json().await?;
        Ok(body.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let futures = texts.iter().map(|t| self.embed(t));
        join_all(futures).await.into_iter().collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Remote provider: a native batch endpoint. Results are reordered by the
/// returned `index` field when the provider supplies one, since a batch API may
/// return results out of request order.
pub struct RemoteEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl RemoteEmbeddingProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        client: reqwest::Client,
    ) -> Self {
        RemoteEmbeddingProvider {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
        }
    }
}

#[derive(Serialize)]
struct RemoteEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct RemoteEmbedDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Deserialize)]
struct RemoteEmbedResponse {
    data: Vec<RemoteEmbedDatum>,
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let mut results = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        results
            .pop()
            .ok_or_else(|| BackendError::Validation("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&RemoteEmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?
            .error_for_status()?;
        let body: RemoteEmbedResponse = resp.json().await?;
        let mut ordered: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        for (i, datum) in body.data.into_iter().enumerate() {
            let idx = datum.index.unwrap_or(i);
            if idx < ordered.len() {
                ordered[idx] = Some(datum.embedding);
            }
        }
        ordered
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.ok_or_else(|| {
                BackendError::Validation(format!("missing embedding result at index {i}"))
            }))
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
