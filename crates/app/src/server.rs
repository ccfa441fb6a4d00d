use axum::body::Bytes;
use axum::extract::{RawQuery, Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE,
};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cymbal_rag_core::webhook::parse_tenure_request;
use cymbal_rag_core::{
    number_of_days, resolve_query, BadRequestError, QaEnvelope, QaError, QuestionAnswering,
    TenureEnvelope, UpstreamServiceError,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

pub struct AppState<P> {
    pub qa: Arc<P>,
}

impl<P> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            qa: Arc::clone(&self.qa),
        }
    }
}

/// First `query` value of a raw query string. Anything unparseable is
/// simply absent.
fn query_param(raw: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(raw?.as_bytes())
        .find(|(key, _)| key == "query")
        .map(|(_, value)| value.into_owned())
}

pub fn router<P>(qa: Arc<P>) -> Router
where
    P: QuestionAnswering + Send + Sync + 'static,
{
    Router::new()
        .route(
            "/qa_over_website",
            get(qa_over_website::<P>).post(qa_over_website::<P>),
        )
        .route("/validate_fd_tenure", post(validate_fd_tenure))
        .route("/healthz", get(healthz))
        .with_state(AppState { qa })
        .layer(middleware::from_fn(cors))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER))
        .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuid))
}

pub async fn serve(addr: SocketAddr, app: Router) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "webhook server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("webhook server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => error!(%error, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

/// Preflight requests are answered here; every other response gets the
/// allow-origin header on the way out.
async fn cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return (
            StatusCode::NO_CONTENT,
            [
                (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                (ACCESS_CONTROL_ALLOW_METHODS, "GET"),
                (ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
                (ACCESS_CONTROL_MAX_AGE, "3600"),
            ],
        )
            .into_response();
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

async fn qa_over_website<P>(
    State(state): State<AppState<P>>,
    RawQuery(raw_query): RawQuery,
    body: Bytes,
) -> Result<Json<QaEnvelope>, ApiError>
where
    P: QuestionAnswering + Send + Sync + 'static,
{
    let body = (!body.is_empty()).then_some(&body[..]);
    let param = query_param(raw_query.as_deref());
    let question = resolve_query(body, param.as_deref())?;
    info!(query = %question, "answering question");

    let answer = state.qa.answer(&question).await?;
    let envelope = QaEnvelope::from_answer(&answer).map_err(UpstreamServiceError::from)?;
    Ok(Json(envelope))
}

async fn validate_fd_tenure(body: Bytes) -> Result<Json<TenureEnvelope>, ApiError> {
    let tenure = parse_tenure_request(&body)?;
    let days = number_of_days(&tenure);
    info!(tenure = %tenure, days, "tenure validated");
    Ok(Json(TenureEnvelope::new(days)))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(BadRequestError),
    Upstream(UpstreamServiceError),
}

impl From<BadRequestError> for ApiError {
    fn from(error: BadRequestError) -> Self {
        Self::BadRequest(error)
    }
}

impl From<UpstreamServiceError> for ApiError {
    fn from(error: UpstreamServiceError) -> Self {
        Self::Upstream(error)
    }
}

impl From<QaError> for ApiError {
    fn from(error: QaError) -> Self {
        match error {
            QaError::BadRequest(error) => Self::BadRequest(error),
            QaError::Upstream(error) => Self::Upstream(error),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(error) => {
                warn!(%error, "rejecting request");
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": error.to_string() })),
                )
                    .into_response()
            }
            Self::Upstream(error) => {
                error!(%error, retryable = error.is_retryable(), "upstream service failed");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "error": "upstream service unavailable" })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use cymbal_rag_core::{FormattedAnswer, RetrievedReference, DEFAULT_QUESTION};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct FakeQa {
        questions: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl QuestionAnswering for FakeQa {
        async fn answer(&self, question: &str) -> Result<FormattedAnswer, QaError> {
            self.questions.lock().unwrap().push(question.to_string());
            if self.fail {
                return Err(UpstreamServiceError::backend_response(
                    "vertex-text",
                    503,
                    "secret project detail",
                )
                .into());
            }
            Ok(FormattedAnswer {
                answer: format!("answer to {question}"),
                references: vec![RetrievedReference {
                    id: None,
                    matching_score: Some(0.82),
                    document_source: Some("https://cymbal.example/neft".to_string()),
                    document_name: Some("NEFT".to_string()),
                    page_content: "NEFT settles in batches.".to_string(),
                }],
            })
        }
    }

    async fn call(app: Router, request: HttpRequest<Body>) -> (StatusCode, Response<Body>) {
        let response = app.oneshot(request).await.unwrap();
        (response.status(), response)
    }

    async fn json_body(response: Response<Body>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, body: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn preflight_gets_cors_headers_and_no_body() {
        let app = router(Arc::new(FakeQa::default()));
        let request = HttpRequest::builder()
            .method("OPTIONS")
            .uri("/qa_over_website")
            .body(Body::empty())
            .unwrap();

        let (status, response) = call(app, request).await;

        assert_eq!(status, StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], "GET");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
        assert_eq!(headers[ACCESS_CONTROL_MAX_AGE], "3600");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn empty_body_falls_back_to_the_default_question() {
        let qa = Arc::new(FakeQa::default());
        let app = router(Arc::clone(&qa));

        let (status, response) = call(app, post("/qa_over_website", "{}")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let body = json_body(response).await;
        let texts = &body["fulfillment_response"]["messages"][0]["text"]["text"];
        assert_eq!(texts[0], format!("answer to {DEFAULT_QUESTION}"));
        let references: Value = serde_json::from_str(texts[1].as_str().unwrap()).unwrap();
        assert_eq!(references[0]["document_name"], "NEFT");
        assert!(references[0].get("id").is_none());
        assert_eq!(qa.questions.lock().unwrap().as_slice(), [DEFAULT_QUESTION]);
    }

    #[tokio::test]
    async fn get_reads_the_query_parameter() {
        let qa = Arc::new(FakeQa::default());
        let app = router(Arc::clone(&qa));
        let request = HttpRequest::builder()
            .method("GET")
            .uri("/qa_over_website?query=What%20is%20NEFT%3F")
            .body(Body::empty())
            .unwrap();

        let (status, _) = call(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(qa.questions.lock().unwrap().as_slice(), ["What is NEFT?"]);
    }

    #[tokio::test]
    async fn repeated_query_parameter_does_not_reject_the_body_query() {
        let qa = Arc::new(FakeQa::default());
        let app = router(Arc::clone(&qa));

        let (status, _) = call(
            app,
            post("/qa_over_website?query=a&query=b", r#"{"query":"What is NEFT?"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(qa.questions.lock().unwrap().as_slice(), ["What is NEFT?"]);
    }

    #[tokio::test]
    async fn first_query_parameter_wins_without_a_body_query() {
        let qa = Arc::new(FakeQa::default());
        let app = router(Arc::clone(&qa));

        let (status, _) = call(
            app,
            post("/qa_over_website?query=first&query=second&flag", r#"{"text":"ignored"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(qa.questions.lock().unwrap().as_slice(), ["first"]);
    }

    #[test]
    fn query_param_reads_the_first_value() {
        assert_eq!(query_param(Some("a=1&query=UPI%20limits&query=x")).as_deref(), Some("UPI limits"));
        assert_eq!(query_param(Some("query")).as_deref(), Some(""));
        assert_eq!(query_param(Some("other=1")), None);
        assert_eq!(query_param(None), None);
    }

    #[tokio::test]
    async fn non_object_body_is_a_bad_request() {
        let app = router(Arc::new(FakeQa::default()));

        let (status, response) = call(app, post("/qa_over_website", "[\"NEFT\"]")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("expected a JSON object"));
    }

    #[tokio::test]
    async fn upstream_failure_hides_details() {
        let app = router(Arc::new(FakeQa {
            fail: true,
            ..FakeQa::default()
        }));

        let (status, response) =
            call(app, post("/qa_over_website", r#"{"query":"What is NEFT?"}"#)).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let body = json_body(response).await;
        assert_eq!(body, json!({ "error": "upstream service unavailable" }));
    }

    #[tokio::test]
    async fn tenure_is_converted_to_days() {
        let app = router(Arc::new(FakeQa::default()));
        let body = r#"{"sessionInfo":{"parameters":{"fd_tenure":"1 year 6 month 10 day"}}}"#;

        let (status, response) = call(app, post("/validate_fd_tenure", body)).await;

        assert_eq!(status, StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["sessionInfo"]["parameters"]["number_of_days"], 555);
        assert_eq!(body["fulfillment_response"]["messages"][0]["text"]["text"], json!([]));
    }

    #[tokio::test]
    async fn tenure_without_field_names_it() {
        let app = router(Arc::new(FakeQa::default()));

        let (status, response) =
            call(app, post("/validate_fd_tenure", r#"{"sessionInfo":{"parameters":{}}}"#)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(
            body["error"],
            "missing required field: sessionInfo.parameters.fd_tenure"
        );
    }

    #[tokio::test]
    async fn health_check_and_request_id() {
        let app = router(Arc::new(FakeQa::default()));
        let request = HttpRequest::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();

        let (status, response) = call(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }
}
