//! Request and response shapes of the conversational-agent webhooks.

use crate::models::{FormattedAnswer, DEFAULT_QUESTION};
use crate::BadRequestError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const FD_TENURE_FIELD: &str = "sessionInfo.parameters.fd_tenure";

#[derive(Debug, Deserialize)]
struct QueryParameters {
    query: String,
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    parameters: QueryParameters,
}

/// Body shapes that can carry a question, in the order they are tried.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QueryPayload {
    Query {
        query: String,
    },
    Text {
        text: String,
    },
    Session {
        #[serde(rename = "sessionInfo")]
        session_info: SessionQuery,
    },
    Unrecognized(Map<String, Value>),
}

/// Picks the question for a QA request.
///
/// Precedence: body `query`, the `query` URL parameter, body `text`, body
/// `sessionInfo.parameters.query`, then [`DEFAULT_QUESTION`]. Empty and
/// non-JSON bodies count as absent; JSON that is not an object is rejected.
pub fn resolve_query(body: Option<&[u8]>, param: Option<&str>) -> Result<String, BadRequestError> {
    let payload = parse_payload(body)?;

    if let Some(QueryPayload::Query { query }) = &payload {
        return Ok(query.clone());
    }
    if let Some(param) = param {
        return Ok(param.to_string());
    }

    let question = match payload {
        Some(QueryPayload::Text { text }) => text,
        Some(QueryPayload::Session { session_info }) => session_info.parameters.query,
        _ => DEFAULT_QUESTION.to_string(),
    };
    Ok(question)
}

fn parse_payload(body: Option<&[u8]>) -> Result<Option<QueryPayload>, BadRequestError> {
    let Some(value) = body
        .filter(|bytes| !bytes.iter().all(u8::is_ascii_whitespace))
        .and_then(|bytes| serde_json::from_slice::<Value>(bytes).ok())
    else {
        return Ok(None);
    };

    let Value::Object(object) = &value else {
        return Err(BadRequestError::UnsupportedShape(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    };
    if object.get("query").is_some_and(|query| !query.is_string()) {
        return Err(BadRequestError::UnsupportedShape(
            "query must be a string".to_string(),
        ));
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|error| BadRequestError::UnsupportedShape(error.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Reads `sessionInfo.parameters.fd_tenure` out of a tenure request body.
pub fn parse_tenure_request(body: &[u8]) -> Result<String, BadRequestError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| BadRequestError::MissingField(FD_TENURE_FIELD.to_string()))?;

    value
        .pointer("/sessionInfo/parameters/fd_tenure")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BadRequestError::MissingField(FD_TENURE_FIELD.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextMessage {
    pub text: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMessage {
    pub text: TextMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FulfillmentResponse {
    pub messages: Vec<ResponseMessage>,
}

impl FulfillmentResponse {
    pub fn texts(text: Vec<String>) -> Self {
        Self {
            messages: vec![ResponseMessage {
                text: TextMessage { text },
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QaEnvelope {
    pub fulfillment_response: FulfillmentResponse,
}

impl QaEnvelope {
    /// Answer first, then the references as a JSON string.
    pub fn from_answer(answer: &FormattedAnswer) -> Result<Self, serde_json::Error> {
        let references = serde_json::to_string(&answer.references)?;
        Ok(Self {
            fulfillment_response: FulfillmentResponse::texts(vec![
                answer.answer.clone(),
                references,
            ]),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenureParameters {
    pub number_of_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenureSessionInfo {
    pub parameters: TenureParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenureEnvelope {
    pub fulfillment_response: FulfillmentResponse,
    #[serde(rename = "sessionInfo")]
    pub session_info: TenureSessionInfo,
}

impl TenureEnvelope {
    pub fn new(number_of_days: u64) -> Self {
        Self {
            fulfillment_response: FulfillmentResponse::texts(Vec::new()),
            session_info: TenureSessionInfo {
                parameters: TenureParameters { number_of_days },
            },
        }
    }
}
