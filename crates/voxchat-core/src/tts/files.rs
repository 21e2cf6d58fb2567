//! Locating the files that make up a Style-Bert-VITS2 voice.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Error, Result};

const CONFIG_FILE: &str = "config.json";
const STYLE_VECTORS_FILE: &str = "style_vectors.npy";

/// Checkpoint, config and optional style embeddings of one voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceModelFiles {
    pub model_path: PathBuf,
    pub config_path: PathBuf,
    pub style_vec_path: Option<PathBuf>,
}

impl VoiceModelFiles {
    /// Inspect `dir`. The first `*.safetensors` (by name) is the checkpoint.
    pub fn discover(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::ModelFilesNotFound(format!("cannot read {}: {}", dir.display(), e))
        })?;

        let mut checkpoints: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .map(|ext| ext == "safetensors")
                        .unwrap_or(false)
            })
            .collect();
        checkpoints.sort();

        let model_path = checkpoints.into_iter().next().ok_or_else(|| {
            Error::ModelFilesNotFound(format!("No .safetensors model found in {}", dir.display()))
        })?;

        let config_path = dir.join(CONFIG_FILE);
        if !config_path.is_file() {
            return Err(Error::ModelFilesNotFound(format!(
                "{} not found in {}",
                CONFIG_FILE,
                dir.display()
            )));
        }

        let style_vec_path = dir.join(STYLE_VECTORS_FILE);
        let style_vec_path = if style_vec_path.is_file() {
            Some(style_vec_path)
        } else {
            warn!(
                "{} not found in {}. Using default style if applicable.",
                STYLE_VECTORS_FILE,
                dir.display()
            );
            None
        };

        Ok(Self {
            model_path,
            config_path,
            style_vec_path,
        })
    }
}
