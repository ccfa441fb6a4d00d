use crate::client::GoogleApiClient;
use crate::config::VertexConfig;
use crate::traits::Embedder;
use crate::UpstreamServiceError;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 768;

const BACKEND: &str = "vertex-embeddings";

/// Vertex AI text embedding model called through its `:predict` method.
pub struct VertexEmbedder {
    client: GoogleApiClient,
    config: VertexConfig,
    batch_size: usize,
    dimensions: usize,
}

impl VertexEmbedder {
    pub fn new(client: GoogleApiClient, config: VertexConfig, batch_size: usize) -> Self {
        Self {
            client,
            config,
            batch_size: batch_size.max(1),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamServiceError> {
        let url = self.config.predict_url(&self.config.embedding_model)?;
        let instances = texts
            .iter()
            .map(|text| json!({ "content": text }))
            .collect::<Vec<_>>();

        let response = self
            .client
            .post_json(BACKEND, url, &json!({ "instances": instances }))
            .await?;

        let vectors = parse_embeddings(&response)?;
        if vectors.len() != texts.len() {
            return Err(UpstreamServiceError::malformed(
                BACKEND,
                format!("{} embeddings for {} texts", vectors.len(), texts.len()),
            ));
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for VertexEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamServiceError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(batch_size = batch.len(), "embedding batch");
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }
}

fn parse_embeddings(response: &Value) -> Result<Vec<Vec<f32>>, UpstreamServiceError> {
    let predictions = response
        .pointer("/predictions")
        .and_then(Value::as_array)
        .ok_or_else(|| UpstreamServiceError::malformed(BACKEND, "response has no predictions"))?;

    predictions
        .iter()
        .map(|prediction| {
            prediction
                .pointer("/embeddings/values")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_f64)
                        .map(|value| value as f32)
                        .collect::<Vec<_>>()
                })
                .ok_or_else(|| {
                    UpstreamServiceError::malformed(BACKEND, "prediction has no embedding values")
                })
        })
        .collect()
}
