//! Process-wide LLM handle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use super::llama::{LlamaConfig, LlamaCppGenerator};
use super::{Completion, SamplingParams, TextGenerator};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::prompt::PromptTemplate;

/// Builds the generator on the blocking pool.
pub type GeneratorLoader = Arc<dyn Fn() -> Result<Arc<dyn TextGenerator>> + Send + Sync>;

/// Holds at most one loaded generator for the life of the process.
pub struct LlmService {
    source: PathBuf,
    loader: GeneratorLoader,
    model: RwLock<Option<Arc<dyn TextGenerator>>>,
    /// One completion at a time, held by the blocking task itself
    busy: Arc<Mutex<()>>,
    template: PromptTemplate,
    params: SamplingParams,
}

impl LlmService {
    pub fn new(source: impl Into<PathBuf>, loader: GeneratorLoader, params: SamplingParams) -> Self {
        let template = PromptTemplate::default();
        let params = SamplingParams {
            stop: params.stop.or_else(|| Some(template.stop_sequence())),
            ..params
        };
        Self {
            source: source.into(),
            loader,
            model: RwLock::new(None),
            busy: Arc::new(Mutex::new(())),
            template,
            params,
        }
    }

    /// Service backed by llama.cpp, configured from settings.
    pub fn llama_cpp(settings: &Settings) -> Self {
        let config = LlamaConfig::from(settings);
        info!(
            "GPU Layers: {}, Context: {}, Threads: {}",
            config.n_gpu_layers,
            config.n_ctx,
            config
                .n_threads
                .map(|t| t.to_string())
                .unwrap_or_else(|| "auto".to_string())
        );

        let params = SamplingParams {
            max_tokens: settings.max_tokens,
            ..SamplingParams::default()
        };
        let source = config.model_path.clone();
        let loader: GeneratorLoader = Arc::new(move || {
            let generator = LlamaCppGenerator::load(&config)?;
            Ok(Arc::new(generator) as Arc<dyn TextGenerator>)
        });

        Self::new(source, loader, params)
    }

    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    pub async fn is_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }

    /// Load the model once. Later calls are no-ops while it stays loaded.
    pub async fn load(&self) -> Result<()> {
        let mut slot = self.model.write().await;
        if slot.is_some() {
            info!("LLM model is already loaded.");
            return Ok(());
        }

        info!("Loading LLM model from: {}", self.source.display());
        let started = Instant::now();
        let loader = self.loader.clone();

        let loaded = tokio::task::spawn_blocking(move || loader())
            .await
            .map_err(|e| Error::ModelLoad(format!("LLM load task failed: {}", e)))
            .and_then(|r| r);

        match loaded {
            Ok(generator) => {
                *slot = Some(generator);
                info!(
                    "LLM model loaded successfully in {:.2} seconds.",
                    started.elapsed().as_secs_f64()
                );
                Ok(())
            }
            Err(err) => {
                *slot = None;
                error!("Failed to load LLM model: {}", err);
                Err(match err {
                    Error::ModelLoad(msg) => Error::ModelLoad(msg),
                    other => Error::ModelLoad(other.to_string()),
                })
            }
        }
    }

    async fn loaded(&self) -> Result<Arc<dyn TextGenerator>> {
        self.model.read().await.clone().ok_or_else(|| {
            error!("LLM model is not loaded.");
            Error::ModelNotLoaded("LLM model is not available".to_string())
        })
    }

    /// Run a completion on the blocking pool, streaming pieces to `on_text`.
    ///
    /// Dropping the returned future stops generation at the next token and
    /// silences `on_text`. The next completion waits until the blocking task
    /// has actually finished.
    pub async fn complete<F>(
        &self,
        prompt: String,
        params: SamplingParams,
        on_text: F,
    ) -> Result<Completion>
    where
        F: FnMut(&str) + Send + 'static,
    {
        let generator = self.loaded().await?;
        let busy = self.busy.clone().lock_owned().await;
        let cancel = CancelOnDrop::default();
        let flag = cancel.0.clone();

        let mut on_text = on_text;
        tokio::task::spawn_blocking(move || {
            let _busy = busy;
            let mut emit = |piece: &str| {
                if !flag.load(Ordering::SeqCst) {
                    on_text(piece);
                }
            };
            let completion = generator.complete(&prompt, &params, &flag, &mut emit);
            if flag.load(Ordering::SeqCst) {
                warn!("LLM generation cancelled by caller");
            }
            completion
        })
        .await
        .map_err(|e| Error::Inference(format!("LLM generation task failed: {}", e)))?
    }

    /// Stream a completion of a prebuilt prompt with the service's sampling.
    pub async fn stream<F>(&self, prompt: String, on_text: F) -> Result<Completion>
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.complete(prompt, self.params.clone(), on_text).await
    }

    /// Reply to a single message without history. Returns trimmed text.
    pub async fn generate(&self, input: &str) -> Result<String> {
        let preview: String = input.chars().take(50).collect();
        info!("Generating LLM response for prompt (first 50 chars): {}...", preview);

        let prompt = self.template.single_turn(input);
        let completion = self
            .complete(prompt, self.params.clone(), |_| {})
            .await
            .map_err(|err| match err {
                Error::ModelNotLoaded(_) => err,
                other => {
                    error!("Error during LLM inference: {}", other);
                    Error::Inference(format!("LLM inference failed: {}", other))
                }
            })?;

        info!(
            "LLM inference completed in {:.2} seconds ({:.1} tok/s).",
            completion.elapsed.as_secs_f64(),
            completion.tokens_per_second()
        );

        let text = completion.text.trim().to_string();
        if text.is_empty() {
            warn!("LLM returned an empty response");
        } else {
            let preview: String = text.chars().take(50).collect();
            info!("LLM response (first 50 chars): {}...", preview);
        }
        Ok(text)
    }
}

/// Raises the flag when the awaiting future goes away.
#[derive(Default)]
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl LlmService {
    /// Service wrapping an already constructed generator.
    pub fn preloaded(generator: Arc<dyn TextGenerator>, params: SamplingParams) -> Self {
        let ready = generator.clone();
        let loader: GeneratorLoader = Arc::new(move || Ok(ready.clone()));
        let mut service = Self::new(generator.name().to_string(), loader, params);
        service.model = RwLock::new(Some(generator));
        service
    }
}
