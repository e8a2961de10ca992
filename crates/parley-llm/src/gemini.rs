//! Google Gemini gateway over the `generateContent` REST endpoint.
//!
//! The conversation is sent as `contents`, each turn in the
//! `{role, parts: [{text}]}` shape. The API key travels in the
//! `x-goog-api-key` header, never in the URL.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use parley_core::errors::{FailureCause, GatewayError};
use parley_core::gateway::{validate_conversation, ModelGateway};
use parley_core::turn::Turn;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// Configuration for [`GeminiGateway`].
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub model: String,
    pub api_key: SecretString,
    /// Override for tests and proxies.
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            model: DEFAULT_MODEL.to_owned(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_owned(),
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: &'a [Turn],
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    /// Thought summaries are not part of the reply.
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Finish reasons that mean the provider withheld the reply.
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

/// Pull the reply text out of a response, classifying empty or blocked replies.
fn extract_text(response: GenerateContentResponse) -> Result<String, FailureCause> {
    let block_reason = response.prompt_feedback.and_then(|f| f.block_reason);

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(match block_reason {
            Some(reason) => FailureCause::Blocked(reason),
            None => FailureCause::MalformedResponse("response has no candidates".into()),
        });
    };

    let text: String = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter(|p| !p.thought)
        .filter_map(|p| p.text)
        .collect();

    if !text.is_empty() {
        return Ok(text);
    }

    match candidate.finish_reason {
        Some(reason) if BLOCKING_FINISH_REASONS.contains(&reason.as_str()) => {
            Err(FailureCause::Blocked(reason))
        }
        Some(reason) => Err(FailureCause::MalformedResponse(format!(
            "candidate has no text (finish reason {reason})"
        ))),
        None => Err(FailureCause::MalformedResponse(
            "candidate has no text".into(),
        )),
    }
}

fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

pub struct GeminiGateway {
    client: Client,
    config: GeminiConfig,
}

impl GeminiGateway {
    pub fn new(config: GeminiConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(config, client))
    }

    /// Create a gateway with a shared HTTP client.
    pub fn with_client(config: GeminiConfig, client: Client) -> Self {
        Self { client, config }
    }

    fn map_send_error(&self, e: reqwest::Error) -> FailureCause {
        if e.is_timeout() {
            FailureCause::Timeout(self.config.request_timeout)
        } else {
            FailureCause::Network(e.to_string())
        }
    }

    async fn send(&self, conversation: &[Turn]) -> Result<String, FailureCause> {
        let body = GenerateContentRequest {
            contents: conversation,
        };

        let resp = self
            .client
            .post(self.config.endpoint())
            .header("x-goog-api-key", self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(resp.headers().get(RETRY_AFTER));
            let body = resp.text().await.unwrap_or_default();
            return Err(match FailureCause::from_status(status.as_u16(), body) {
                FailureCause::RateLimited { .. } => FailureCause::RateLimited { retry_after },
                other => other,
            });
        }

        let parsed: GenerateContentResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                FailureCause::Timeout(self.config.request_timeout)
            } else {
                FailureCause::MalformedResponse(e.to_string())
            }
        })?;

        extract_text(parsed)
    }
}

#[async_trait]
impl ModelGateway for GeminiGateway {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(
        skip(self, conversation),
        fields(model = %self.config.model, turns = conversation.len())
    )]
    async fn generate(&self, conversation: &[Turn]) -> Result<String, GatewayError> {
        validate_conversation(conversation)?;
        let reply = self.send(conversation).await?;
        debug!(reply_len = reply.len(), "generation complete");
        Ok(reply)
    }
}
