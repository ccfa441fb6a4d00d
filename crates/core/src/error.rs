use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("fetching {url} returned {status}")]
    PageStatus { url: String, status: u16 },

    #[error("page had no readable text: {0}")]
    EmptyPage(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("indexing failed: {0}")]
    Upstream(#[from] UpstreamServiceError),
}

/// Failure of a hosted collaborator: text model, embedding model, vector
/// index or blob storage.
#[derive(Debug, Error)]
pub enum UpstreamServiceError {
    #[error("invalid response from {backend}: {status} {details}")]
    BackendResponse {
        backend: String,
        status: u16,
        details: String,
    },

    #[error("malformed response from {backend}: {details}")]
    MalformedResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("access token unavailable: {0}")]
    Auth(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl UpstreamServiceError {
    pub fn backend_response(backend: &str, status: u16, details: impl Into<String>) -> Self {
        Self::BackendResponse {
            backend: backend.to_string(),
            status,
            details: details.into(),
        }
    }

    pub fn malformed(backend: &str, details: impl Into<String>) -> Self {
        Self::MalformedResponse {
            backend: backend.to_string(),
            details: details.into(),
        }
    }

    /// Transport failures, throttling and server-side errors are worth
    /// another attempt; everything else will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BackendResponse { status, .. } => *status == 429 || *status >= 500,
            Self::Http(error) => error.is_timeout() || error.is_connect() || error.is_request(),
            _ => false,
        }
    }
}

/// Caller-side mistakes in an inbound webhook payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BadRequestError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("unsupported request shape: {0}")]
    UnsupportedShape(String),

    #[error("query is empty")]
    EmptyQuery,
}

/// Errors surfaced by a full question-answering round trip.
#[derive(Debug, Error)]
pub enum QaError {
    #[error(transparent)]
    BadRequest(#[from] BadRequestError),

    #[error(transparent)]
    Upstream(#[from] UpstreamServiceError),
}
