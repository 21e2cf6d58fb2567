//! Speech synthesis without the LLM

use std::time::Duration;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct TtsResponse {
    pub audio_url: String,
}

pub async fn synthesize(
    State(state): State<AppState>,
    Json(req): Json<TtsRequest>,
) -> Result<Json<TtsResponse>, ApiError> {
    info!("TTS request: {} chars", req.text.chars().count());

    let timeout = Duration::from_secs(state.request_timeout_secs);
    let file = tokio::time::timeout(timeout, state.chat.speak(&req.text))
        .await
        .map_err(|_| ApiError::internal("Request timeout"))??;

    Ok(Json(TtsResponse {
        audio_url: format!("/audio/{}", file),
    }))
}
