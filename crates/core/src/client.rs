//! Authenticated JSON client shared by every hosted Google Cloud collaborator.

use crate::error::UpstreamServiceError;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Bounded retry with linear backoff for transient upstream failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Where bearer tokens come from.
#[derive(Debug, Clone)]
pub enum AccessTokenSource {
    /// A token handed in through configuration.
    Static(String),
    /// The GCE / Cloud Run metadata server of the running instance.
    MetadataServer,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

#[derive(Debug, Clone)]
pub struct GoogleApiClient {
    http: Client,
    token_source: AccessTokenSource,
    retry: RetryPolicy,
}

impl GoogleApiClient {
    pub fn new(
        token_source: AccessTokenSource,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, UpstreamServiceError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            token_source,
            retry,
        })
    }

    pub async fn access_token(&self) -> Result<String, UpstreamServiceError> {
        match &self.token_source {
            AccessTokenSource::Static(token) => Ok(token.clone()),
            AccessTokenSource::MetadataServer => {
                let response = self
                    .http
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|error| UpstreamServiceError::Auth(error.to_string()))?;

                if !response.status().is_success() {
                    return Err(UpstreamServiceError::Auth(format!(
                        "metadata server returned {}",
                        response.status()
                    )));
                }

                let token: MetadataToken = response
                    .json()
                    .await
                    .map_err(|error| UpstreamServiceError::Auth(error.to_string()))?;
                Ok(token.access_token)
            }
        }
    }

    pub async fn post_json(
        &self,
        backend: &str,
        url: Url,
        body: &Value,
    ) -> Result<Value, UpstreamServiceError> {
        let response = self
            .send_with_retry(backend, |http| http.post(url.clone()).json(body))
            .await?;
        Ok(response.json().await?)
    }

    pub async fn get_json(&self, backend: &str, url: Url) -> Result<Value, UpstreamServiceError> {
        let response = self
            .send_with_retry(backend, |http| http.get(url.clone()))
            .await?;
        Ok(response.json().await?)
    }

    pub async fn get_bytes(&self, backend: &str, url: Url) -> Result<Vec<u8>, UpstreamServiceError> {
        let response = self
            .send_with_retry(backend, |http| http.get(url.clone()))
            .await?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn upload(
        &self,
        backend: &str,
        url: Url,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<(), UpstreamServiceError> {
        self.send_with_retry(backend, |http| {
            http.post(url.clone())
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(bytes.clone())
        })
        .await?;
        Ok(())
    }

    async fn send_with_retry<F>(
        &self,
        backend: &str,
        build: F,
    ) -> Result<Response, UpstreamServiceError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let (this, build) = (self, &build);
        send_with_retry(&self.retry, backend, move || async move {
            let token = this.access_token().await?;
            Ok::<_, UpstreamServiceError>(build(&this.http).bearer_auth(token).send().await?)
        })
        .await
    }
}

/// Runs `send` until it yields a success status, retrying transient failures
/// under `retry`. Non-success statuses become `BackendResponse` errors.
pub(crate) async fn send_with_retry<F, Fut, E>(
    retry: &RetryPolicy,
    backend: &str,
    send: F,
) -> Result<Response, UpstreamServiceError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Response, E>>,
    E: Into<UpstreamServiceError>,
{
    let mut attempt = 0u32;

    loop {
        let result = match send().await {
            Ok(response) if response.status().is_success() => Ok(response),
            Ok(response) => {
                let status = response.status().as_u16();
                let details = response.text().await.unwrap_or_default();
                Err(UpstreamServiceError::backend_response(
                    backend,
                    status,
                    truncate(&details, 512),
                ))
            }
            Err(error) => Err(error.into()),
        };

        match result {
            Ok(response) => {
                if attempt > 0 {
                    info!(backend, attempt = attempt + 1, "request succeeded after retry");
                }
                return Ok(response);
            }
            Err(error) if error.is_retryable() && attempt < retry.max_retries => {
                attempt += 1;
                let backoff = retry.backoff * attempt;
                warn!(
                    backend,
                    attempt,
                    max_retries = retry.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(error) => {
                error!(backend, attempt = attempt + 1, error = %error, "request failed permanently");
                return Err(error);
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubServer;
    use serde_json::json;

    fn client(max_retries: u32) -> GoogleApiClient {
        GoogleApiClient::new(
            AccessTokenSource::Static("test-token".to_string()),
            Duration::from_secs(5),
            RetryPolicy {
                max_retries,
                backoff: Duration::from_millis(1),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let server = StubServer::start(vec![
            (503, "busy".to_string()),
            (200, json!({"ok": true}).to_string()),
        ])
        .await;

        let url = Url::parse(&server.url("/v1/thing")).unwrap();
        let value = client(2).post_json("stub", url, &json!({"a": 1})).await.unwrap();

        assert_eq!(value["ok"], true);
        assert_eq!(server.requests().len(), 2);
        assert!(server.requests()[0].contains("authorization: Bearer test-token")
            || server.requests()[0].contains("Authorization: Bearer test-token"));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = StubServer::start(vec![(403, "denied".to_string())]).await;

        let url = Url::parse(&server.url("/v1/thing")).unwrap();
        let error = client(2).get_json("stub", url).await.unwrap_err();

        assert!(matches!(
            error,
            UpstreamServiceError::BackendResponse { status: 403, .. }
        ));
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let server = StubServer::start(vec![
            (500, "a".to_string()),
            (500, "b".to_string()),
            (500, "c".to_string()),
        ])
        .await;

        let url = Url::parse(&server.url("/v1/thing")).unwrap();
        let error = client(1).get_json("stub", url).await.unwrap_err();

        assert!(error.is_retryable());
        assert_eq!(server.requests().len(), 2);
    }

    #[test]
    fn long_details_are_truncated() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
