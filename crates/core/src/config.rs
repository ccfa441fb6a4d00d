use crate::client::{AccessTokenSource, RetryPolicy};
use crate::error::UpstreamServiceError;
use crate::models::{IngestionOptions, RetrievalOptions, SamplingParameters};
use std::time::Duration;
use url::Url;

/// Everything the service needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub vertex: VertexConfig,
    pub index: IndexConfig,
    pub http: HttpConfig,
    pub ingestion: IngestionOptions,
    pub retrieval: RetrievalOptions,
    pub sampling: SamplingParameters,
}

#[derive(Debug, Clone)]
pub struct VertexConfig {
    pub project_id: String,
    pub region: String,
    /// Base URL of the regional Vertex AI API.
    pub api_endpoint: String,
    pub text_model: String,
    pub embedding_model: String,
}

impl VertexConfig {
    pub fn new(project_id: impl Into<String>, region: impl Into<String>) -> Self {
        let region = region.into();
        Self {
            project_id: project_id.into(),
            api_endpoint: format!("https://{region}-aiplatform.googleapis.com"),
            region,
            text_model: "text-bison@002".to_string(),
            embedding_model: "textembedding-gecko@003".to_string(),
        }
    }

    pub fn location_path(&self) -> String {
        format!(
            "v1/projects/{}/locations/{}",
            self.project_id, self.region
        )
    }

    /// `:predict` URL of a Google-published model.
    pub fn predict_url(&self, model: &str) -> Result<Url, UpstreamServiceError> {
        let base = Url::parse(&self.api_endpoint)?;
        Ok(base.join(&format!(
            "{}/publishers/google/models/{model}:predict",
            self.location_path()
        ))?)
    }
}

#[derive(Debug, Clone)]
pub enum IndexConfig {
    VectorSearch(VectorSearchConfig),
    Qdrant { url: String, collection: String },
}

#[derive(Debug, Clone)]
pub struct VectorSearchConfig {
    pub index_id: String,
    pub index_endpoint_id: String,
    /// Bucket holding one JSON blob per indexed chunk.
    pub bucket: String,
    pub storage_endpoint: String,
}

impl VectorSearchConfig {
    pub fn new(
        index_id: impl Into<String>,
        index_endpoint_id: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            index_id: index_id.into(),
            index_endpoint_id: index_endpoint_id.into(),
            bucket: normalize_bucket_name(&bucket.into()),
            storage_endpoint: "https://storage.googleapis.com".to_string(),
        }
    }
}

/// Accepts either a bare bucket name or a `gs://bucket/...` URI.
pub fn normalize_bucket_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = trimmed.strip_prefix("gs://").unwrap_or(trimmed);
    without_scheme
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub access_token: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

impl HttpConfig {
    pub fn token_source(&self) -> AccessTokenSource {
        match &self.access_token {
            Some(token) if !token.trim().is_empty() => AccessTokenSource::Static(token.clone()),
            _ => AccessTokenSource::MetadataServer,
        }
    }
}
