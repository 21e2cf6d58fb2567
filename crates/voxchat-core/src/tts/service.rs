//! Process-wide voice model handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::{LoadOptions, Sbv2WorkerBackend, SpeechSynthesizer, SynthesisParams, VoiceBackend, VoiceModelFiles};
use crate::audio;
use crate::config::Settings;
use crate::error::{Error, Result};

#[derive(Default)]
struct LoadedVoice {
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    model_dir: Option<PathBuf>,
}

impl LoadedVoice {
    fn is_live_for(&self, dir: &Path) -> bool {
        self.model_dir.as_deref() == Some(dir)
            && self.synthesizer.as_ref().is_some_and(|s| s.is_alive())
    }
}

/// Holds at most one voice model and the directory it came from.
pub struct VoiceService {
    backend: Arc<dyn VoiceBackend>,
    options: LoadOptions,
    state: Mutex<LoadedVoice>,
}

impl VoiceService {
    pub fn new(backend: Arc<dyn VoiceBackend>, options: LoadOptions) -> Self {
        Self {
            backend,
            options,
            state: Mutex::new(LoadedVoice::default()),
        }
    }

    /// Service backed by the Style-Bert-VITS2 worker command from settings.
    pub fn sbv2_worker(settings: &Settings) -> Self {
        let backend = Sbv2WorkerBackend::new(settings.tts_worker.clone());
        Self::new(Arc::new(backend), LoadOptions::from_settings(settings))
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.lock().await.synthesizer.is_some()
    }

    pub async fn current_model_dir(&self) -> Option<PathBuf> {
        self.state.lock().await.model_dir.clone()
    }

    /// Load the voice in `dir`. A no-op when that directory is already loaded.
    pub async fn load(&self, dir: &Path) -> Result<()> {
        let mut state = self.state.lock().await;
        self.load_locked(&mut state, dir).await
    }

    async fn load_locked(&self, state: &mut LoadedVoice, dir: &Path) -> Result<()> {
        if state.is_live_for(dir) {
            info!("TTS model from {} is already loaded.", dir.display());
            return Ok(());
        }

        // Release the previous worker before starting another.
        state.synthesizer = None;
        state.model_dir = None;

        info!("Loading TTS model from: {}", dir.display());
        let started = Instant::now();
        let backend = self.backend.clone();
        let options = self.options.clone();
        let target = dir.to_path_buf();

        let loaded = tokio::task::spawn_blocking(move || {
            let files = VoiceModelFiles::discover(&target)?;
            info!("Model path: {}", files.model_path.display());
            info!("Config path: {}", files.config_path.display());
            if let Some(style) = &files.style_vec_path {
                info!("Style vector path: {}", style.display());
            }
            backend.load(&files, &options)
        })
        .await
        .map_err(|e| Error::ModelLoad(format!("TTS load task failed: {}", e)))
        .and_then(|r| r);

        match loaded {
            Ok(synthesizer) => {
                state.synthesizer = Some(Arc::from(synthesizer));
                state.model_dir = Some(dir.to_path_buf());
                info!(
                    "TTS model loaded successfully in {:.2} seconds.",
                    started.elapsed().as_secs_f64()
                );
                Ok(())
            }
            Err(err) => {
                error!("Failed to load TTS model: {}", err);
                Err(err)
            }
        }
    }

    /// Synthesize `text` with default parameters into `output_path`.
    pub async fn synthesize(&self, text: &str, output_path: &Path, model_dir: &Path) -> Result<()> {
        self.synthesize_with(text, output_path, model_dir, &SynthesisParams::default())
            .await
    }

    /// Synthesize `text` into a WAV file, reloading when `model_dir` differs
    /// from the loaded voice.
    pub async fn synthesize_with(
        &self,
        text: &str,
        output_path: &Path,
        model_dir: &Path,
        params: &SynthesisParams,
    ) -> Result<()> {
        let synthesizer = {
            let mut state = self.state.lock().await;
            if !state.is_live_for(model_dir) {
                warn!(
                    "TTS model not loaded, stopped, or model directory changed. Attempting to load from {}",
                    model_dir.display()
                );
                if let Err(err) = self.load_locked(&mut state, model_dir).await {
                    return Err(Error::ModelNotLoaded(format!(
                        "TTS model could not be loaded: {}",
                        err
                    )));
                }
            }
            state
                .synthesizer
                .clone()
                .ok_or_else(|| Error::ModelNotLoaded("TTS model is not available".to_string()))?
        };

        let compute_type = if synthesizer.device() == "cuda" {
            "fp16"
        } else {
            "fp32"
        };
        let preview: String = text.chars().take(50).collect();
        info!(
            "Synthesizing on {} ({}): {}...",
            synthesizer.device(),
            compute_type,
            preview
        );

        let started = Instant::now();
        let text = text.to_string();
        let params = params.clone();
        let path = output_path.to_path_buf();
        let worker = synthesizer.clone();

        let synthesized = tokio::task::spawn_blocking(move || -> Result<f32> {
            let speech = worker.infer(&text, &params)?;
            audio::write_wav(&path, &speech.samples, speech.sample_rate)?;
            Ok(speech.duration_secs())
        })
        .await
        .map_err(|e| Error::Inference(format!("TTS task failed: {}", e)))?;

        let duration = match synthesized {
            Ok(duration) => duration,
            Err(err) => {
                if !synthesizer.is_alive() {
                    self.forget(&synthesizer).await;
                }
                return Err(err);
            }
        };

        info!(
            "Saved {:.2}s of audio to {} in {:.2} seconds.",
            duration,
            output_path.display(),
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

impl VoiceService {
    /// Drop a synthesizer whose runtime died so the next request reloads it.
    async fn forget(&self, dead: &Arc<dyn SpeechSynthesizer>) {
        let mut state = self.state.lock().await;
        let current = state
            .synthesizer
            .as_ref()
            .is_some_and(|loaded| Arc::ptr_eq(loaded, dead));
        if current {
            warn!("TTS worker is gone; the voice will be reloaded on next use");
            state.synthesizer = None;
            state.model_dir = None;
        }
    }
}
