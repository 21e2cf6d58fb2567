//! Text in, spoken reply out.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::llm::LlmService;
use crate::tts::VoiceService;

/// Outcome of one chat turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub llm_response: String,
    /// File name under the output directory
    pub audio_file: Option<String>,
    pub error: Option<String>,
}

pub struct VoiceChat {
    llm: Arc<LlmService>,
    voice: Arc<VoiceService>,
    output_dir: PathBuf,
    voice_model_dir: PathBuf,
}

fn audio_file_name() -> String {
    format!("response_{}.wav", Uuid::new_v4())
}

impl VoiceChat {
    pub fn new(llm: Arc<LlmService>, voice: Arc<VoiceService>, settings: &Settings) -> Self {
        Self {
            llm,
            voice,
            output_dir: settings.output_dir.clone(),
            voice_model_dir: settings.default_voice_model_dir.clone(),
        }
    }

    pub fn llm(&self) -> &Arc<LlmService> {
        &self.llm
    }

    pub fn voice(&self) -> &Arc<VoiceService> {
        &self.voice
    }

    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    /// Generate a reply and speak it.
    ///
    /// Synthesis failures other than a missing voice model still return the
    /// text, with `error` set and no audio.
    pub async fn reply(&self, text: &str) -> Result<ChatReply> {
        info!("Received chat request: {}", text);

        let llm_response = self.llm.generate(text).await?;
        if llm_response.is_empty() {
            return Err(Error::Inference("LLM failed to generate response".to_string()));
        }

        let file_name = audio_file_name();
        let path = self.output_dir.join(&file_name);
        match self
            .voice
            .synthesize(&llm_response, &path, &self.voice_model_dir)
            .await
        {
            Ok(()) => {
                info!("Voice synthesized: {}", file_name);
                Ok(ChatReply {
                    llm_response,
                    audio_file: Some(file_name),
                    error: None,
                })
            }
            Err(err @ Error::ModelNotLoaded(_)) => Err(err),
            Err(err) => {
                error!("Voice synthesis failed: {}", err);
                Ok(ChatReply {
                    llm_response,
                    audio_file: None,
                    error: Some("Voice synthesis failed".to_string()),
                })
            }
        }
    }

    /// Speak `text` without the LLM. Returns the file name.
    pub async fn speak(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            warn!("Rejected empty synthesis request");
            return Err(Error::InvalidInput("text must not be empty".to_string()));
        }

        let file_name = audio_file_name();
        let path = self.output_dir.join(&file_name);
        self.voice
            .synthesize(text, &path, &self.voice_model_dir)
            .await?;
        Ok(file_name)
    }
}
