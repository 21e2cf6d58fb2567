//! llama.cpp backend for GGUF checkpoints.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::{send_logs_to_tracing, LogOptions};
use tracing::{debug, info};

use super::stream::{StopScanner, Utf8Accumulator};
use super::{Completion, SamplingParams, TextGenerator};
use crate::config::Settings;
use crate::error::{Error, Result};

const MIN_BATCH_TOKENS: usize = 512;

/// Load-time options for a llama.cpp model.
#[derive(Debug, Clone)]
pub struct LlamaConfig {
    pub model_path: PathBuf,
    /// Negative offloads every layer
    pub n_gpu_layers: i32,
    pub n_ctx: u32,
    pub n_threads: Option<u32>,
    pub verbose: bool,
}

impl From<&Settings> for LlamaConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            model_path: settings.llm_model_path.clone(),
            n_gpu_layers: settings.n_gpu_layers,
            n_ctx: settings.n_ctx,
            n_threads: settings.n_threads,
            verbose: settings.llm_verbose,
        }
    }
}

impl LlamaConfig {
    fn gpu_layers(&self) -> u32 {
        if self.n_gpu_layers < 0 {
            i32::MAX as u32
        } else {
            self.n_gpu_layers as u32
        }
    }
}

/// A GGUF model resident in memory. Each completion gets a fresh context.
pub struct LlamaCppGenerator {
    backend: LlamaBackend,
    model: LlamaModel,
    config: LlamaConfig,
    name: String,
}

impl LlamaCppGenerator {
    pub fn load(config: &LlamaConfig) -> Result<Self> {
        if !config.model_path.is_file() {
            return Err(Error::ModelLoad(format!(
                "model file not found: {}",
                config.model_path.display()
            )));
        }

        send_logs_to_tracing(LogOptions::default().with_logs_enabled(config.verbose));

        let backend = LlamaBackend::init()
            .map_err(|e| Error::ModelLoad(format!("llama.cpp backend init failed: {}", e)))?;

        let model_params = LlamaModelParams::default().with_n_gpu_layers(config.gpu_layers());
        let model = LlamaModel::load_from_file(&backend, &config.model_path, &model_params)
            .map_err(|e| Error::ModelLoad(format!("{}: {}", config.model_path.display(), e)))?;

        let name = config
            .model_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "llama".to_string());

        info!(
            "Loaded {} ({} GPU layers requested, context {})",
            name, config.n_gpu_layers, config.n_ctx
        );

        Ok(Self {
            backend,
            model,
            config: config.clone(),
            name,
        })
    }

    fn context_params(&self) -> LlamaContextParams {
        let mut params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(self.config.n_ctx))
            .with_n_batch(self.config.n_ctx);
        if let Some(threads) = self.config.n_threads {
            let threads = i32::try_from(threads).unwrap_or(i32::MAX);
            params = params.with_n_threads(threads).with_n_threads_batch(threads);
        }
        params
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Penalties,
    Greedy,
    TopK,
    TopP,
    MinP,
    Temp,
    Dist,
}

/// Repeat penalty first, then truncation, temperature and the final draw.
fn sampler_stages(params: &SamplingParams) -> Vec<Stage> {
    let mut stages = vec![Stage::Penalties];
    if params.temperature <= 0.0 {
        stages.push(Stage::Greedy);
        return stages;
    }
    if params.top_k > 0 {
        stages.push(Stage::TopK);
    }
    stages.push(Stage::TopP);
    if params.min_p > 0.0 {
        stages.push(Stage::MinP);
    }
    stages.extend([Stage::Temp, Stage::Dist]);
    stages
}

fn build_sampler(params: &SamplingParams) -> LlamaSampler {
    let chain = sampler_stages(params)
        .into_iter()
        .map(|stage| match stage {
            Stage::Penalties => {
                LlamaSampler::penalties(params.repeat_last_n, params.repeat_penalty, 0.0, 0.0)
            }
            Stage::Greedy => LlamaSampler::greedy(),
            Stage::TopK => LlamaSampler::top_k(params.top_k),
            Stage::TopP => LlamaSampler::top_p(params.top_p, 1),
            Stage::MinP => LlamaSampler::min_p(params.min_p, 1),
            Stage::Temp => LlamaSampler::temp(params.temperature),
            Stage::Dist => LlamaSampler::dist(params.seed),
        })
        .collect::<Vec<_>>();
    LlamaSampler::chain_simple(chain)
}

impl TextGenerator for LlamaCppGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(
        &self,
        prompt: &str,
        params: &SamplingParams,
        cancel: &AtomicBool,
        on_text: &mut dyn FnMut(&str),
    ) -> Result<Completion> {
        let started = Instant::now();

        let mut ctx = self
            .model
            .new_context(&self.backend, self.context_params())
            .map_err(|e| Error::Inference(format!("Failed to create context: {}", e)))?;

        let tokens = self
            .model
            .str_to_token(prompt, AddBos::Always)
            .map_err(|e| Error::Inference(format!("Tokenization failed: {}", e)))?;

        let n_ctx = ctx.n_ctx() as usize;
        if tokens.len() >= n_ctx {
            return Err(Error::InvalidInput(format!(
                "prompt is {} tokens but the context holds {}",
                tokens.len(),
                n_ctx
            )));
        }

        let prompt_tokens = tokens.len();
        let mut batch = LlamaBatch::new(prompt_tokens.max(MIN_BATCH_TOKENS), 1);
        let last_index = prompt_tokens as i32 - 1;
        for (pos, token) in (0_i32..).zip(tokens.into_iter()) {
            batch
                .add(token, pos, &[0], pos == last_index)
                .map_err(|e| Error::Inference(format!("Failed to queue prompt: {}", e)))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| Error::Inference(format!("Prompt decode failed: {}", e)))?;

        let mut sampler = build_sampler(params);
        let mut utf8 = Utf8Accumulator::default();
        let mut scanner = StopScanner::new(params.stop.as_deref());
        let mut text = String::new();
        let mut completion_tokens = 0usize;
        let mut n_cur = batch.n_tokens();

        while completion_tokens < params.max_tokens && (n_cur as usize) < n_ctx {
            if cancel.load(Ordering::SeqCst) {
                debug!("Completion cancelled after {} tokens", completion_tokens);
                break;
            }
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            if self.model.is_eog_token(token) {
                break;
            }
            completion_tokens += 1;

            let bytes = self
                .model
                .token_to_bytes(token, Special::Tokenize)
                .map_err(|e| Error::Inference(format!("Detokenization failed: {}", e)))?;
            let visible = scanner.push(&utf8.push(&bytes));
            if !visible.is_empty() {
                on_text(&visible);
                text.push_str(&visible);
            }
            if scanner.is_stopped() {
                break;
            }

            batch.clear();
            batch
                .add(token, n_cur, &[0], true)
                .map_err(|e| Error::Inference(format!("Failed to queue token: {}", e)))?;
            n_cur += 1;
            ctx.decode(&mut batch)
                .map_err(|e| Error::Inference(format!("Decode failed: {}", e)))?;
        }

        let tail = scanner.finish();
        if !tail.is_empty() {
            on_text(&tail);
            text.push_str(&tail);
        }

        debug!(
            "Completion: {} prompt tokens, {} generated",
            prompt_tokens, completion_tokens
        );

        Ok(Completion {
            text,
            prompt_tokens,
            completion_tokens,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_gpu_layers_offload_everything() {
        let mut config = LlamaConfig::from(&Settings::default());
        assert_eq!(config.gpu_layers(), i32::MAX as u32);

        config.n_gpu_layers = 12;
        assert_eq!(config.gpu_layers(), 12);
    }

    #[test]
    fn missing_model_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = LlamaConfig {
            model_path: dir.path().join("absent.gguf"),
            n_gpu_layers: 0,
            n_ctx: 512,
            n_threads: None,
            verbose: false,
        };
        assert!(matches!(
            LlamaCppGenerator::load(&config),
            Err(Error::ModelLoad(_))
        ));
    }

    #[test]
    fn default_sampling_penalises_repeats_and_truncates() {
        use Stage::*;
        assert_eq!(
            sampler_stages(&SamplingParams::default()),
            vec![Penalties, TopK, TopP, MinP, Temp, Dist]
        );

        let greedy = SamplingParams {
            temperature: 0.0,
            ..SamplingParams::default()
        };
        assert_eq!(sampler_stages(&greedy), vec![Penalties, Greedy]);

        let loose = SamplingParams {
            top_k: 0,
            min_p: 0.0,
            ..SamplingParams::default()
        };
        assert_eq!(sampler_stages(&loose), vec![Penalties, TopP, Temp, Dist]);
    }
}
