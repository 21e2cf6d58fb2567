//! Liveness and model status

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Backend is running!" }))
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub llm_loaded: bool,
    pub voice_loaded: bool,
    pub voice_model_dir: Option<String>,
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let voice = state.chat.voice();
    Json(StatusResponse {
        llm_loaded: state.chat.llm().is_loaded().await,
        voice_loaded: voice.is_loaded().await,
        voice_model_dir: voice
            .current_model_dir()
            .await
            .map(|dir| dir.display().to_string()),
    })
}
