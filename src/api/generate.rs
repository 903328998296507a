//! Generation endpoint

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{AppState, Phase};
use crate::data::generation::raw_body_value;
use crate::error::{ApiError, ApiResult};
use crate::sanitize::sanitize;

/// Request body for `POST /api/generate`
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
}

/// Response body for `POST /api/generate`
///
/// `insights` is `null` when the upstream text held no valid JSON object; the
/// raw text and body are included so the caller can still show something.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub insights: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
}

/// POST /api/generate
pub async fn generate_insights(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<Json<GenerateResponse>> {
    let prompt = request.prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".to_string()));
    }
    let client = state
        .generation
        .as_ref()
        .ok_or(ApiError::NotConfigured("generation"))?;

    debug!(phase = %Phase::Fetching, "generating insights");
    let reply = client.generate(prompt).await?;
    let parsed = sanitize(&reply.text);
    debug!(phase = %Phase::Responding, structured = parsed.structured.is_some());

    let response = match parsed.structured {
        Some(insights) => GenerateResponse {
            insights: Some(insights),
            raw_text: None,
            raw_response: None,
        },
        None => {
            warn!("generated text held no JSON object, returning raw text");
            GenerateResponse {
                insights: None,
                raw_text: Some(parsed.raw_text),
                raw_response: Some(raw_body_value(&reply.raw_body)),
            }
        }
    };

    Ok(Json(response))
}
