use crate::client::{send_with_retry, RetryPolicy};
use crate::models::{Chunk, ScoredChunk};
use crate::traits::VectorIndex;
use crate::UpstreamServiceError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

const BACKEND: &str = "qdrant";

/// Self-hosted alternative to Vector Search; chunk bodies travel in the
/// point payload.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    retry: RetryPolicy,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, UpstreamServiceError> {
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::builder().timeout(timeout).build()?,
            retry,
            vector_size,
        })
    }

    /// Creates the collection with cosine distance when it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), UpstreamServiceError> {
        let url = format!("{}/collections/{}", self.endpoint, self.collection);
        match send_with_retry(&self.retry, BACKEND, || self.client.get(&url).send()).await {
            Ok(_) => return Ok(()),
            Err(UpstreamServiceError::BackendResponse { status: 404, .. }) => {}
            Err(error) => return Err(error),
        }

        let body = json!({
            "vectors": { "size": self.vector_size, "distance": "Cosine" }
        });
        send_with_retry(&self.retry, BACKEND, || self.client.put(&url).json(&body).send()).await?;
        info!(collection = %self.collection, size = self.vector_size, "qdrant collection created");
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn upsert_chunks(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), UpstreamServiceError> {
        if chunks.len() != embeddings.len() {
            return Err(UpstreamServiceError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let points = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                if embedding.len() != self.vector_size {
                    return Err(UpstreamServiceError::Request(format!(
                        "embedding dimension {} != {}",
                        embedding.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": chunk.chunk_index,
                    "vector": embedding,
                    "payload": serde_json::to_value(chunk)?,
                }))
            })
            .collect::<Result<Vec<_>, UpstreamServiceError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.endpoint, self.collection
        );
        let body = json!({ "points": points });
        send_with_retry(&self.retry, BACKEND, || self.client.put(&url).json(&body).send()).await?;

        Ok(())
    }

    async fn find_neighbors(
        &self,
        query_vector: &[f32],
        top_k: usize,
        distance_threshold: f64,
    ) -> Result<Vec<ScoredChunk>, UpstreamServiceError> {
        if query_vector.len() != self.vector_size {
            return Err(UpstreamServiceError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        let url = format!(
            "{}/collections/{}/points/search",
            self.endpoint, self.collection
        );
        let body = json!({
            "vector": query_vector,
            "limit": top_k,
            "score_threshold": distance_threshold,
            "with_payload": true,
        });
        let response =
            send_with_retry(&self.retry, BACKEND, || self.client.post(&url).json(&body).send())
                .await?;

        let parsed: Value = response.json().await?;
        parse_hits(&parsed)
    }
}

fn parse_hits(parsed: &Value) -> Result<Vec<ScoredChunk>, UpstreamServiceError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    hits.into_iter()
        .map(|hit| {
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            let payload = hit
                .get("payload")
                .cloned()
                .ok_or_else(|| UpstreamServiceError::malformed(BACKEND, "hit has no payload"))?;
            Ok(ScoredChunk {
                score,
                chunk: serde_json::from_value(payload)?,
            })
        })
        .collect()
}
