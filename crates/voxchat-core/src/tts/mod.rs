//! Text-to-speech: voice model discovery, the synthesizer seam, the
//! Style-Bert-VITS2 worker bridge and the process-wide voice handle.

mod files;
mod service;
mod worker;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use files::VoiceModelFiles;
pub use service::VoiceService;
pub use worker::Sbv2WorkerBackend;

/// Per-utterance synthesis controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisParams {
    /// Language of the text (`JP`, `EN`, `ZH`)
    #[serde(default = "default_language")]
    pub language: String,

    /// Speaker index for multi-speaker models
    #[serde(default)]
    pub speaker_id: u32,

    /// Style name from the model's style vectors
    #[serde(default = "default_style")]
    pub style: String,

    /// Strength of the style vector
    #[serde(default = "default_style_weight")]
    pub style_weight: f32,

    /// Stochastic duration predictor ratio
    #[serde(default = "default_sdp_ratio")]
    pub sdp_ratio: f32,

    #[serde(default = "default_noise")]
    pub noise: f32,

    #[serde(default = "default_noise_w")]
    pub noise_w: f32,

    /// Length scale (above 1.0 speaks slower)
    #[serde(default = "default_length")]
    pub length: f32,
}

fn default_language() -> String {
    "JP".to_string()
}
fn default_style() -> String {
    "Neutral".to_string()
}
fn default_style_weight() -> f32 {
    0.7
}
fn default_sdp_ratio() -> f32 {
    0.2
}
fn default_noise() -> f32 {
    0.6
}
fn default_noise_w() -> f32 {
    0.8
}
fn default_length() -> f32 {
    1.0
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            language: default_language(),
            speaker_id: 0,
            style: default_style(),
            style_weight: default_style_weight(),
            sdp_ratio: default_sdp_ratio(),
            noise: default_noise(),
            noise_w: default_noise_w(),
            length: default_length(),
        }
    }
}

/// Options applied when a voice model is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// `auto`, `cuda` or `cpu`
    pub device: String,
    pub bert_model: String,
}

impl LoadOptions {
    pub fn from_settings(settings: &crate::Settings) -> Self {
        Self {
            device: settings.tts_device.clone(),
            bert_model: settings.bert_model.clone(),
        }
    }
}

/// Mono audio produced by a synthesizer.
#[derive(Debug, Clone)]
pub struct Speech {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Speech {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f32 / self.sample_rate as f32
        }
    }
}

/// A loaded voice model. Calls block.
pub trait SpeechSynthesizer: Send + Sync {
    /// Device the model runs on (`cuda`, `cpu`, ...)
    fn device(&self) -> &str;

    /// False once the backing runtime is gone and the voice must be reloaded.
    fn is_alive(&self) -> bool {
        true
    }

    fn infer(&self, text: &str, params: &SynthesisParams) -> Result<Speech>;
}

/// Turns a voice model directory into a synthesizer.
pub trait VoiceBackend: Send + Sync {
    fn load(
        &self,
        files: &VoiceModelFiles,
        options: &LoadOptions,
    ) -> Result<Box<dyn SpeechSynthesizer>>;
}
