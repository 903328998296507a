//! Generative-text API client
//!
//! Builds the `generateContent` request for a user prompt and extracts the
//! first candidate's text from the response. The response envelope is matched
//! against its known shapes instead of being probed field by field.

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::upstream::{ApiKey, Method, UpstreamClient, UpstreamFailure, UpstreamRequest};

/// Base URL for the generative-text API
pub const DEFAULT_GENERATION_URL: &str = "https://generativelanguage.googleapis.com";

/// Model used when none is configured
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Sampling temperature sent with every request
const TEMPERATURE: f64 = 0.7;

/// Output token limit sent with every request
const MAX_OUTPUT_TOKENS: u32 = 1024;

/// Upstream name used in logs and errors
const UPSTREAM_NAME: &str = "generation";

/// Errors that can occur when generating text
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Retries were exhausted
    #[error(transparent)]
    Upstream(#[from] UpstreamFailure),

    /// The body was not JSON or matched no known envelope
    #[error("generation upstream returned an unreadable body: {0}")]
    Unreadable(#[from] serde_json::Error),

    /// The upstream reported an error inside a 2xx response
    #[error("generation upstream error {code}: {message}")]
    Rejected { code: i64, message: String },

    /// No candidate carried any text (e.g. the prompt was blocked)
    #[error(
        "generation upstream returned no candidate text (reason: {})",
        .reason.as_deref().unwrap_or("unspecified")
    )]
    Empty { reason: Option<String> },
}

/// Text produced by the upstream together with the body it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReply {
    /// First candidate's concatenated text parts
    pub text: String,
    /// Upstream body, verbatim
    pub raw_body: String,
}

/// Location and credentials of the generative-text API
#[derive(Debug, Clone)]
pub struct GenerationEndpoint {
    base_url: String,
    model: String,
    api_key: ApiKey,
}

impl GenerationEndpoint {
    /// Creates an endpoint using [`DEFAULT_MODEL`]
    pub fn new(base_url: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            base_url: base_url.into(),
            model: DEFAULT_MODEL.to_string(),
            api_key,
        }
    }

    /// Overrides the model name
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Builds the upstream request for a user prompt
    pub fn request(&self, prompt: &str) -> UpstreamRequest {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );

        UpstreamRequest {
            upstream: UPSTREAM_NAME,
            method: Method::Post,
            url,
            query: Vec::new(),
            credential: Some(("key", self.api_key.clone())),
            body: Some(json!({
                "contents": [{ "parts": [{ "text": insight_prompt(prompt) }] }],
                "generationConfig": {
                    "temperature": TEMPERATURE,
                    "maxOutputTokens": MAX_OUTPUT_TOKENS,
                },
            })),
        }
    }
}

/// Wraps a user prompt in instructions asking for a single JSON object
pub fn insight_prompt(prompt: &str) -> String {
    format!(
        "You are an analyst explaining blockchain and digital-asset topics.\n\
         Respond with one JSON object and nothing else, using the keys \
         \"summary\" (string), \"keyPoints\" (array of strings), \
         \"risks\" (array of strings) and \"outlook\" (string).\n\n\
         Topic: {}",
        prompt
    )
}

/// Known shapes of a `generateContent` response body
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GenerationEnvelope {
    /// `{ "error": { "code", "message" } }`
    Error { error: ErrorBody },
    /// `{ "candidates": [...] }`
    Candidates { candidates: Vec<Candidate> },
    /// Any other object, typically `{ "promptFeedback": { "blockReason" } }`
    Blocked {
        #[serde(rename = "promptFeedback")]
        prompt_feedback: Option<PromptFeedback>,
    },
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

/// Extracts the first candidate's text from a response body
pub fn extract_text(body: &str) -> Result<String, GenerationError> {
    let envelope: GenerationEnvelope = serde_json::from_str(body)?;

    match envelope {
        GenerationEnvelope::Error { error } => Err(GenerationError::Rejected {
            code: error.code,
            message: error.message,
        }),
        GenerationEnvelope::Candidates { candidates } => {
            let first = candidates
                .into_iter()
                .next()
                .ok_or(GenerationError::Empty { reason: None })?;
            let text: String = first
                .content
                .map(|content| {
                    content
                        .parts
                        .into_iter()
                        .filter_map(|part| part.text)
                        .collect()
                })
                .unwrap_or_default();

            if text.trim().is_empty() {
                Err(GenerationError::Empty {
                    reason: first.finish_reason,
                })
            } else {
                Ok(text)
            }
        }
        GenerationEnvelope::Blocked { prompt_feedback } => Err(GenerationError::Empty {
            reason: prompt_feedback.and_then(|feedback| feedback.block_reason),
        }),
    }
}

/// Client for the generative-text API
#[derive(Debug, Clone)]
pub struct GenerationClient {
    upstream: UpstreamClient,
    endpoint: GenerationEndpoint,
}

impl GenerationClient {
    pub fn new(upstream: UpstreamClient, endpoint: GenerationEndpoint) -> Self {
        Self { upstream, endpoint }
    }

    /// Sends a prompt and returns the generated text
    ///
    /// # Returns
    /// * `Ok(GenerationReply)` - generated text plus the raw body
    /// * `Err(GenerationError)` - retries exhausted; a body without usable text
    ///   uses up an attempt
    pub async fn generate(&self, prompt: &str) -> Result<GenerationReply, GenerationError> {
        let request = self.endpoint.request(prompt);
        let reply = self
            .upstream
            .fetch_parsed(&request, |raw_body| {
                extract_text(raw_body).map(|text| GenerationReply {
                    text,
                    raw_body: raw_body.to_string(),
                })
            })
            .await?;
        debug!(chars = reply.text.len(), "generation upstream returned text");

        Ok(reply)
    }
}

/// Parses a raw upstream body for echoing back to callers
///
/// Returns the JSON value when the body is JSON, otherwise the body as a string.
pub fn raw_body_value(raw_body: &str) -> Value {
    serde_json::from_str(raw_body).unwrap_or_else(|_| Value::String(raw_body.to_string()))
}
