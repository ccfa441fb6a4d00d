use crate::client::GoogleApiClient;
use crate::config::VertexConfig;
use crate::models::SamplingParameters;
use crate::traits::TextGenerator;
use crate::UpstreamServiceError;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

const BACKEND: &str = "vertex-text";

/// A Vertex AI text model (PaLM family) reached through `:predict`.
pub struct VertexTextModel {
    client: GoogleApiClient,
    config: VertexConfig,
    model: String,
}

impl VertexTextModel {
    pub fn new(client: GoogleApiClient, config: VertexConfig) -> Self {
        let model = config.text_model.clone();
        Self {
            client,
            config,
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for VertexTextModel {
    async fn generate(
        &self,
        prompt: &str,
        parameters: &SamplingParameters,
    ) -> Result<String, UpstreamServiceError> {
        let url = self.config.predict_url(&self.model)?;
        debug!(model = %self.model, prompt_chars = prompt.len(), "calling text model");

        let response = self
            .client
            .post_json(
                BACKEND,
                url,
                &json!({
                    "instances": [{ "prompt": prompt }],
                    "parameters": parameters,
                }),
            )
            .await?;

        parse_prediction(&response)
    }
}

fn parse_prediction(response: &Value) -> Result<String, UpstreamServiceError> {
    let prediction = response
        .pointer("/predictions/0")
        .ok_or_else(|| UpstreamServiceError::malformed(BACKEND, "response has no predictions"))?;

    let blocked = prediction
        .pointer("/safetyAttributes/blocked")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if blocked {
        warn!("text model response was blocked by safety filters");
    }

    prediction
        .pointer("/content")
        .and_then(Value::as_str)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| UpstreamServiceError::malformed(BACKEND, "prediction has no content"))
}
