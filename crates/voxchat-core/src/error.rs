//! Error types shared by the core services.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A model singleton is not resident
    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    /// Voice model directory is missing a required file
    #[error("Model files not found: {0}")]
    ModelFilesNotFound(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// TTS worker process or protocol failure
    #[error("TTS worker error: {0}")]
    Worker(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Self {
        Error::Audio(err.to_string())
    }
}
