//! Configuration for the voxchat services
//!
//! Every field has a default; `Settings::from_env` overlays environment
//! variables (and a `.env` file when present) on top of those defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the GGUF checkpoint
    #[serde(default = "default_llm_model_path")]
    pub llm_model_path: PathBuf,

    /// Layers to offload to the GPU. Negative offloads every layer.
    #[serde(default = "default_n_gpu_layers")]
    pub n_gpu_layers: i32,

    /// Context window in tokens
    #[serde(default = "default_n_ctx")]
    pub n_ctx: u32,

    /// Inference threads. `None` lets llama.cpp decide.
    #[serde(default)]
    pub n_threads: Option<u32>,

    /// Forward llama.cpp logs to tracing
    #[serde(default)]
    pub llm_verbose: bool,

    /// Token budget for one server reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Voice model used when a request does not name one
    #[serde(default = "default_voice_model_dir")]
    pub default_voice_model_dir: PathBuf,

    /// Where synthesized WAV files are written and served from
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// BERT feature model the voice worker loads before the voice itself
    #[serde(default = "default_bert_model")]
    pub bert_model: String,

    /// `auto`, `cuda` or `cpu`
    #[serde(default = "default_tts_device")]
    pub tts_device: String,

    /// Command line of the Style-Bert-VITS2 worker
    #[serde(default = "default_tts_worker")]
    pub tts_worker: Vec<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_model_path: default_llm_model_path(),
            n_gpu_layers: default_n_gpu_layers(),
            n_ctx: default_n_ctx(),
            n_threads: None,
            llm_verbose: false,
            max_tokens: default_max_tokens(),
            default_voice_model_dir: default_voice_model_dir(),
            output_dir: default_output_dir(),
            bert_model: default_bert_model(),
            tts_device: default_tts_device(),
            tts_worker: default_tts_worker(),
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Settings {
    /// Load settings from the process environment, reading `.env` first.
    pub fn from_env() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                warn!("Ignoring unreadable .env file: {}", err);
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            llm_model_path: get("LLM_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.llm_model_path),
            n_gpu_layers: parse_or("N_GPU_LAYERS", get("N_GPU_LAYERS"), defaults.n_gpu_layers),
            n_ctx: parse_or("N_CTX", get("N_CTX"), defaults.n_ctx),
            n_threads: get("N_THREADS").and_then(|raw| parse_some("N_THREADS", &raw)),
            llm_verbose: get("LLM_VERBOSE")
                .map(|raw| parse_bool("LLM_VERBOSE", &raw, defaults.llm_verbose))
                .unwrap_or(defaults.llm_verbose),
            max_tokens: parse_or("LLM_MAX_TOKENS", get("LLM_MAX_TOKENS"), defaults.max_tokens),
            default_voice_model_dir: get("DEFAULT_VOICE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.default_voice_model_dir),
            output_dir: get("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            bert_model: get("TTS_BERT_MODEL").unwrap_or(defaults.bert_model),
            tts_device: get("TTS_DEVICE")
                .map(|d| d.to_lowercase())
                .unwrap_or(defaults.tts_device),
            tts_worker: get("TTS_WORKER")
                .map(|cmd| cmd.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.tts_worker),
            host: get("VOXCHAT_HOST").unwrap_or(defaults.host),
            port: parse_or("VOXCHAT_PORT", get("VOXCHAT_PORT"), defaults.port),
            cors_origins: get("CORS_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
            request_timeout_secs: parse_or(
                "REQUEST_TIMEOUT_SECS",
                get("REQUEST_TIMEOUT_SECS"),
                defaults.request_timeout_secs,
            ),
        }
    }

    /// Address the HTTP server binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(raw) => parse_some(key, &raw).unwrap_or(default),
        None => default,
    }
}

fn parse_some<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Invalid {}='{}', using default", key, raw);
            None
        }
    }
}

fn parse_bool(key: &str, raw: &str, default: bool) -> bool {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!("Invalid {}='{}', using default", key, raw);
            default
        }
    }
}

fn default_llm_model_path() -> PathBuf {
    PathBuf::from("/app/models/model.gguf")
}

fn default_n_gpu_layers() -> i32 {
    -1
}

fn default_n_ctx() -> u32 {
    2048
}

fn default_max_tokens() -> usize {
    512
}

fn default_voice_model_dir() -> PathBuf {
    PathBuf::from("/app/models/voice")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/app/output")
}

fn default_bert_model() -> String {
    "ku-nlp/deberta-v2-large-japanese-char-wwm".to_string()
}

fn default_tts_device() -> String {
    "auto".to_string()
}

fn default_tts_worker() -> Vec<String> {
    vec!["sbv2-worker".to_string()]
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}

fn default_request_timeout_secs() -> u64 {
    300
}
