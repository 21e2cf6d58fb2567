//! Voxchat Core - local LLM replies spoken by a local TTS model
//!
//! This crate owns the two process-wide model handles and the straight-line
//! path that connects them:
//!
//! - [`LlmService`]: a GGUF checkpoint served through llama.cpp
//! - [`VoiceService`]: a Style-Bert-VITS2 voice held by an external worker
//! - [`VoiceChat`]: generate a reply, synthesize it, write a WAV file
//!
//! # Example
//!
//! ```ignore
//! use voxchat_core::{Settings, LlmService, VoiceService, VoiceChat};
//!
//! let settings = Settings::from_env();
//! let llm = Arc::new(LlmService::llama_cpp(&settings));
//! llm.load().await?;
//! let voice = Arc::new(VoiceService::sbv2_worker(&settings));
//! voice.load(&settings.default_voice_model_dir).await?;
//!
//! let chat = VoiceChat::new(llm, voice, &settings);
//! let reply = chat.reply("こんにちは").await?;
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod tts;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::Settings;
pub use error::{Error, Result};
pub use llm::{Completion, LlmService, SamplingParams, TextGenerator};
pub use pipeline::{ChatReply, VoiceChat};
pub use prompt::{Conversation, PromptTemplate, Role, Turn};
pub use tts::{
    LoadOptions, Speech, SpeechSynthesizer, SynthesisParams, VoiceBackend, VoiceModelFiles,
    VoiceService,
};
