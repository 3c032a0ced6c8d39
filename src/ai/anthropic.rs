use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::RouteDocument;

use super::{ModelFailure, ModelFailureKind, RouteModel};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

const SYSTEM_PROMPT: &str = "You are a motorcycle touring route planner. You turn free-text \
     ride notes into a concrete multi-day itinerary and answer with exactly one GeoJSON \
     FeatureCollection, no prose and no code fences.";

/// Anthropic Messages API client producing route documents.
///
/// One request per generation; retry policy and deadlines are the
/// coordinator's concern.
pub struct AnthropicRoutePlanner {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicRoutePlanner {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client somewhere else (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

fn transport_failure(err: &reqwest::Error) -> ModelFailure {
    if err.is_timeout() {
        ModelFailure::new(ModelFailureKind::Timeout, "the model did not answer in time")
    } else {
        ModelFailure::new(ModelFailureKind::Network, "could not reach the model service")
    }
}

/// Models occasionally wrap the answer in a markdown fence despite the
/// instructions; unwrap it before parsing.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[async_trait]
impl RouteModel for AnthropicRoutePlanner {
    async fn generate(
        &self,
        prompt: &str,
        progress: mpsc::Sender<u8>,
        cancel: CancellationToken,
    ) -> Result<RouteDocument, ModelFailure> {
        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: SYSTEM_PROMPT,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        let _ = progress.send(10).await;

        let send = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ModelFailure::cancelled()),
            resp = send => resp.map_err(|e| transport_failure(&e))?,
        };

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let mut failure =
                ModelFailure::new(ModelFailureKind::RateLimited, "the model service is busy");
            if let Some(seconds) = retry_after {
                failure = failure.with_retry_hint(seconds);
            }
            return Err(failure);
        }
        if !status.is_success() {
            tracing::warn!(status = %status, "model request rejected");
            return Err(ModelFailure::new(
                ModelFailureKind::ModelError,
                "the model service rejected the request",
            ));
        }

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(ModelFailure::cancelled()),
            body = response.text() => body.map_err(|e| transport_failure(&e))?,
        };

        let _ = progress.send(80).await;

        let parsed: AnthropicResponse = serde_json::from_str(&body).map_err(|_| {
            ModelFailure::new(
                ModelFailureKind::ModelError,
                "the model service answered with an unexpected payload",
            )
        })?;

        let text = parsed
            .content
            .iter()
            .find_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text.as_str()),
                AnthropicContentBlock::Other => None,
            })
            .ok_or_else(|| {
                ModelFailure::new(
                    ModelFailureKind::InvalidOutput,
                    "the model answered without a route",
                )
            })?;

        if cancel.is_cancelled() {
            return Err(ModelFailure::cancelled());
        }

        let document = RouteDocument::from_json_str(strip_code_fence(text)).map_err(|e| {
            tracing::debug!(error = %e, "model output failed to parse");
            ModelFailure::new(
                ModelFailureKind::InvalidOutput,
                "the model did not produce a readable route",
            )
        })?;

        let _ = progress.send(95).await;
        Ok(document)
    }
}
