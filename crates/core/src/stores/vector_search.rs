use crate::client::GoogleApiClient;
use crate::config::{VectorSearchConfig, VertexConfig};
use crate::models::{Chunk, ScoredChunk};
use crate::traits::VectorIndex;
use crate::UpstreamServiceError;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

const INDEX_BACKEND: &str = "vertex-vector-search";
const STORAGE_BACKEND: &str = "cloud-storage";
const DOCUMENT_PREFIX: &str = "documents";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedIndex {
    /// Base URL that serves `findNeighbors` for the endpoint.
    pub query_endpoint: String,
    pub deployed_index_id: String,
}

/// Vertex AI Vector Search for vectors plus Cloud Storage for chunk bodies.
///
/// The index only knows datapoint ids; the chunk text and metadata live in
/// `gs://{bucket}/documents/{chunk_id}`.
pub struct VectorSearchStore {
    client: GoogleApiClient,
    vertex: VertexConfig,
    config: VectorSearchConfig,
    deployment: OnceCell<DeployedIndex>,
}

impl VectorSearchStore {
    pub fn new(client: GoogleApiClient, vertex: VertexConfig, config: VectorSearchConfig) -> Self {
        Self {
            client,
            vertex,
            config,
            deployment: OnceCell::new(),
        }
    }

    fn api_url(&self, resource: &str) -> Result<Url, UpstreamServiceError> {
        let base = Url::parse(&self.vertex.api_endpoint)?;
        Ok(base.join(&format!("{}/{resource}", self.vertex.location_path()))?)
    }

    fn object_url(&self, name: &str) -> Result<Url, UpstreamServiceError> {
        let mut url = Url::parse(&self.config.storage_endpoint)?;
        url.path_segments_mut()
            .map_err(|_| UpstreamServiceError::Request("storage endpoint cannot be a base".into()))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", self.config.bucket.as_str(), "o", name]);
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }

    fn upload_url(&self, name: &str) -> Result<Url, UpstreamServiceError> {
        let mut url = Url::parse(&self.config.storage_endpoint)?;
        url.path_segments_mut()
            .map_err(|_| UpstreamServiceError::Request("storage endpoint cannot be a base".into()))?
            .pop_if_empty()
            .extend(["upload", "storage", "v1", "b", self.config.bucket.as_str(), "o"]);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", name);
        Ok(url)
    }

    /// Looks up the public query domain and deployed index id once.
    pub async fn deployment(&self) -> Result<&DeployedIndex, UpstreamServiceError> {
        self.deployment
            .get_or_try_init(|| async {
                let url = self.api_url(&format!(
                    "indexEndpoints/{}",
                    self.config.index_endpoint_id
                ))?;
                let endpoint = self.client.get_json(INDEX_BACKEND, url).await?;
                let deployed = parse_deployment(
                    &endpoint,
                    &self.config.index_id,
                    &self.vertex.api_endpoint,
                )?;
                info!(
                    query_endpoint = %deployed.query_endpoint,
                    deployed_index_id = %deployed.deployed_index_id,
                    "resolved vector search deployment"
                );
                Ok::<_, UpstreamServiceError>(deployed)
            })
            .await
    }

    async fn read_chunk(&self, chunk_id: &str) -> Result<Chunk, UpstreamServiceError> {
        let url = self.object_url(&document_name(chunk_id))?;
        let bytes = self.client.get_bytes(STORAGE_BACKEND, url).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn document_name(chunk_id: &str) -> String {
    format!("{DOCUMENT_PREFIX}/{chunk_id}")
}

#[async_trait]
impl VectorIndex for VectorSearchStore {
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
        if chunks.is_empty() {
            return Ok(());
        }

        for chunk in chunks {
            let url = self.upload_url(&document_name(&chunk.chunk_id))?;
            self.client
                .upload(STORAGE_BACKEND, url, "application/json", serde_json::to_vec(chunk)?)
                .await?;
        }
        debug!(count = chunks.len(), bucket = %self.config.bucket, "chunk bodies stored");

        let datapoints = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                json!({
                    "datapointId": chunk.chunk_id,
                    "featureVector": embedding,
                })
            })
            .collect::<Vec<_>>();

        let url = self.api_url(&format!("indexes/{}:upsertDatapoints", self.config.index_id))?;
        self.client
            .post_json(INDEX_BACKEND, url, &json!({ "datapoints": datapoints }))
            .await?;

        info!(count = chunks.len(), index_id = %self.config.index_id, "datapoints upserted");
        Ok(())
    }

    async fn find_neighbors(
        &self,
        query_vector: &[f32],
        top_k: usize,
        distance_threshold: f64,
    ) -> Result<Vec<ScoredChunk>, UpstreamServiceError> {
        let deployment = self.deployment().await?;

        let base = Url::parse(&deployment.query_endpoint)?;
        let url = base.join(&format!(
            "{}/indexEndpoints/{}:findNeighbors",
            self.vertex.location_path(),
            self.config.index_endpoint_id
        ))?;

        let response = self
            .client
            .post_json(
                INDEX_BACKEND,
                url,
                &json!({
                    "deployedIndexId": deployment.deployed_index_id,
                    "queries": [{
                        "datapoint": {
                            "datapointId": "query",
                            "featureVector": query_vector,
                        },
                        "neighborCount": top_k,
                    }],
                    "returnFullDatapoint": false,
                }),
            )
            .await?;

        let neighbors = parse_neighbors(&response)?;
        let mut hits = Vec::new();
        for (chunk_id, distance) in neighbors
            .into_iter()
            .filter(|(_, distance)| *distance >= distance_threshold)
            .take(top_k)
        {
            match self.read_chunk(&chunk_id).await {
                Ok(chunk) => hits.push(ScoredChunk {
                    score: distance,
                    chunk,
                }),
                Err(error) => {
                    warn!(chunk_id = %chunk_id, %error, "neighbor has no readable chunk body");
                    return Err(error);
                }
            }
        }

        Ok(hits)
    }
}

fn parse_deployment(
    endpoint: &Value,
    index_id: &str,
    fallback_endpoint: &str,
) -> Result<DeployedIndex, UpstreamServiceError> {
    let deployed = endpoint
        .pointer("/deployedIndexes")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let index_suffix = format!("/indexes/{index_id}");
    let chosen = deployed
        .iter()
        .find(|item| {
            item.pointer("/index")
                .and_then(Value::as_str)
                .is_some_and(|name| name.ends_with(&index_suffix))
        })
        .or_else(|| deployed.first())
        .and_then(|item| item.pointer("/id").and_then(Value::as_str))
        .ok_or_else(|| {
            UpstreamServiceError::malformed(INDEX_BACKEND, "index endpoint has no deployed index")
        })?;

    let query_endpoint = endpoint
        .pointer("/publicEndpointDomainName")
        .and_then(Value::as_str)
        .filter(|domain| !domain.is_empty())
        .map(|domain| format!("https://{domain}"))
        .unwrap_or_else(|| fallback_endpoint.to_string());

    Ok(DeployedIndex {
        query_endpoint,
        deployed_index_id: chosen.to_string(),
    })
}

fn parse_neighbors(response: &Value) -> Result<Vec<(String, f64)>, UpstreamServiceError> {
    let neighbors = match response.pointer("/nearestNeighbors/0/neighbors") {
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(UpstreamServiceError::malformed(
                INDEX_BACKEND,
                "neighbors is not an array",
            ))
        }
        None => return Ok(Vec::new()),
    };

    Ok(neighbors
        .iter()
        .filter_map(|neighbor| {
            let id = neighbor
                .pointer("/datapoint/datapointId")
                .and_then(Value::as_str)?;
            let distance = neighbor
                .pointer("/distance")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            Some((id.to_string(), distance))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AccessTokenSource, RetryPolicy};
    use crate::testing::StubServer;
    use std::time::Duration;

    fn store(endpoint: String) -> VectorSearchStore {
        let client = GoogleApiClient::new(
            AccessTokenSource::Static("token".to_string()),
            Duration::from_secs(5),
            RetryPolicy::default(),
        )
        .unwrap();
        let mut vertex = VertexConfig::new("demo", "us-central1");
        vertex.api_endpoint = endpoint.clone();
        let mut config = VectorSearchConfig::new("354891567120515072", "7646923051275124736", "gs://demo-me-bucket-3");
        config.storage_endpoint = endpoint;
        VectorSearchStore::new(client, vertex, config)
    }

    fn chunk(id: &str, source: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            source: source.to_string(),
            title: Some("NEFT".to_string()),
            chunk_index: 0,
            overlap_chars: 0,
            text: "NEFT settles in half-hourly batches.".to_string(),
        }
    }

    #[test]
    fn deployment_prefers_the_configured_index() {
        let endpoint = json!({
            "publicEndpointDomainName": "1234.us-central1-567.vdb.vertexai.goog",
            "deployedIndexes": [
                { "id": "other", "index": "projects/1/locations/us-central1/indexes/999" },
                { "id": "cymbal_deployed", "index": "projects/1/locations/us-central1/indexes/42" },
            ]
        });

        let deployed = parse_deployment(&endpoint, "42", "https://fallback").unwrap();
        assert_eq!(deployed.deployed_index_id, "cymbal_deployed");
        assert_eq!(
            deployed.query_endpoint,
            "https://1234.us-central1-567.vdb.vertexai.goog"
        );
    }

    #[test]
    fn endpoint_without_deployments_is_malformed() {
        let error = parse_deployment(&json!({}), "42", "https://fallback").unwrap_err();
        assert!(matches!(error, UpstreamServiceError::MalformedResponse { .. }));
    }

    #[test]
    fn object_names_are_percent_encoded() {
        let store = store("https://storage.example".to_string());
        let url = store.object_url("documents/abc").unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.example/storage/v1/b/demo-me-bucket-3/o/documents%2Fabc?alt=media"
        );
    }

    #[tokio::test]
    async fn neighbors_below_threshold_are_dropped() {
        let server = StubServer::start(vec![
            (
                200,
                json!({ "deployedIndexes": [{ "id": "cymbal_deployed" }] }).to_string(),
            ),
            (
                200,
                json!({
                    "nearestNeighbors": [{
                        "id": "query",
                        "neighbors": [
                            { "datapoint": { "datapointId": "c1" }, "distance": 0.82 },
                            { "datapoint": { "datapointId": "c2" }, "distance": 0.41 },
                        ]
                    }]
                })
                .to_string(),
            ),
            (
                200,
                serde_json::to_string(&chunk("c1", "https://example.com/neft")).unwrap(),
            ),
        ])
        .await;
        let store = store(server.url(""));

        let hits = store.find_neighbors(&[0.1, 0.2], 5, 0.6).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.chunk_id, "c1");
        assert!((hits[0].score - 0.82).abs() < f64::EPSILON);

        let requests = server.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].starts_with(
            "GET /v1/projects/demo/locations/us-central1/indexEndpoints/7646923051275124736 "
        ));
        assert!(requests[1].contains(":findNeighbors"));
        assert!(requests[1].contains("\"deployedIndexId\":\"cymbal_deployed\""));
        assert!(requests[2].starts_with("GET /storage/v1/b/demo-me-bucket-3/o/documents%2Fc1?alt=media"));
    }

    #[tokio::test]
    async fn upsert_writes_bodies_then_datapoints() {
        let server = StubServer::start(vec![
            (200, "{}".to_string()),
            (200, "{}".to_string()),
        ])
        .await;
        let store = store(server.url(""));

        store
            .upsert_chunks(&[chunk("c1", "https://example.com/neft")], &[vec![0.5, 0.5]])
            .await
            .unwrap();

        let requests = server.requests();
        assert!(requests[0].starts_with(
            "POST /upload/storage/v1/b/demo-me-bucket-3/o?uploadType=media&name=documents%2Fc1"
        ));
        assert!(requests[1].starts_with(
            "POST /v1/projects/demo/locations/us-central1/indexes/354891567120515072:upsertDatapoints"
        ));
        assert!(requests[1].contains("\"datapointId\":\"c1\""));
    }

    #[tokio::test]
    async fn mismatched_embeddings_are_rejected() {
        let store = store("http://127.0.0.1:9".to_string());
        let error = store
            .upsert_chunks(&[chunk("c1", "https://example.com/neft")], &[])
            .await
            .unwrap_err();
        assert!(matches!(error, UpstreamServiceError::Request(_)));
    }
}
