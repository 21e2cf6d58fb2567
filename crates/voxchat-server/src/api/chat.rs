//! Text chat with a spoken reply

use std::time::Duration;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::error;
use voxchat_core::Error;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub llm_response: String,
    pub audio_url: Option<String>,
    pub error: Option<String>,
}

pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.text.trim().is_empty() {
        return Err(ApiError::bad_request("text must not be empty"));
    }

    let timeout = Duration::from_secs(state.request_timeout_secs);
    let result = tokio::time::timeout(timeout, state.chat.reply(&req.text))
        .await
        .map_err(|_| ApiError::internal("Request timeout"))?;

    match result {
        Ok(reply) => Ok(Json(ChatResponse {
            llm_response: reply.llm_response,
            audio_url: reply.audio_file.map(|file| format!("/audio/{}", file)),
            error: reply.error,
        })),
        Err(err @ (Error::ModelNotLoaded(_) | Error::InvalidInput(_) | Error::Inference(_))) => {
            Err(err.into())
        }
        Err(err) => {
            error!("Error processing chat request: {}", err);
            Ok(Json(ChatResponse {
                llm_response: "An error occurred.".to_string(),
                audio_url: None,
                error: Some(err.to_string()),
            }))
        }
    }
}
