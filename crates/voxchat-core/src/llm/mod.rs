//! Text generation: the generator seam, llama.cpp backend and the
//! process-wide model handle.

mod llama;
mod service;
pub mod stream;

use std::sync::atomic::AtomicBool;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use llama::{LlamaConfig, LlamaCppGenerator};
pub use service::{GeneratorLoader, LlmService};

/// Sampling controls for one completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Upper bound on generated tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Temperature for sampling (0.0 = greedy)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Top-p (nucleus) sampling threshold
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Top-k sampling (0 = disabled)
    #[serde(default = "default_top_k")]
    pub top_k: i32,

    /// Min-p threshold relative to the most likely token (0.0 = disabled)
    #[serde(default = "default_min_p")]
    pub min_p: f32,

    /// Penalty applied to recently generated tokens (1.0 = disabled)
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,

    /// How many recent tokens the repeat penalty looks at
    #[serde(default = "default_repeat_last_n")]
    pub repeat_last_n: i32,

    #[serde(default = "default_seed")]
    pub seed: u32,

    /// Generation ends before this text appears
    #[serde(default)]
    pub stop: Option<String>,
}

fn default_max_tokens() -> usize {
    512
}
fn default_temperature() -> f32 {
    0.8
}
fn default_top_p() -> f32 {
    0.95
}
fn default_top_k() -> i32 {
    40
}
fn default_min_p() -> f32 {
    0.05
}
fn default_repeat_penalty() -> f32 {
    1.1
}
fn default_repeat_last_n() -> i32 {
    64
}
fn default_seed() -> u32 {
    0xFFFF_FFFF
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            min_p: default_min_p(),
            repeat_penalty: default_repeat_penalty(),
            repeat_last_n: default_repeat_last_n(),
            seed: default_seed(),
            stop: None,
        }
    }
}

/// Output of a single completion.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Everything emitted before the stop condition, untrimmed
    pub text: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub elapsed: Duration,
}

impl Completion {
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if self.completion_tokens == 0 || secs == 0.0 {
            0.0
        } else {
            self.completion_tokens as f64 / secs
        }
    }
}

/// A loaded language model able to continue a prompt.
///
/// Implementations block; callers run them on the blocking pool.
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Continue `prompt`, passing each visible piece of text to `on_text`.
    ///
    /// Generation ends early, returning what was produced so far, once
    /// `cancel` is set.
    fn complete(
        &self,
        prompt: &str,
        params: &SamplingParams,
        cancel: &AtomicBool,
        on_text: &mut dyn FnMut(&str),
    ) -> Result<Completion>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_defaults_match_llama_cpp_python() {
        let params = SamplingParams::default();
        assert_eq!(params.top_k, 40);
        assert_eq!(params.top_p, 0.95);
        assert_eq!(params.min_p, 0.05);
        assert_eq!(params.repeat_penalty, 1.1);
        assert_eq!(params.repeat_last_n, 64);
        assert!(params.stop.is_none());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let params: SamplingParams =
            serde_json::from_str(r#"{"max_tokens": 200, "temperature": 0.0}"#).unwrap();
        assert_eq!(params.max_tokens, 200);
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.repeat_penalty, 1.1);
    }
}
