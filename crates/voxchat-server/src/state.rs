//! Shared application state

use std::sync::Arc;

use voxchat_core::{Settings, VoiceChat};

#[derive(Clone)]
pub struct AppState {
    /// LLM, voice model and output locations
    pub chat: Arc<VoiceChat>,
    /// Request timeout for generation routes (seconds)
    pub request_timeout_secs: u64,
}

impl AppState {
    pub fn new(chat: VoiceChat, settings: &Settings) -> Self {
        Self {
            chat: Arc::new(chat),
            request_timeout_secs: settings.request_timeout_secs,
        }
    }
}
