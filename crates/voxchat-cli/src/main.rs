//! Voxchat CLI - talk to a local GGUF model in the terminal and synthesize speech
//!
//! Examples:
//!   voxchat chat --model ./models/model.gguf
//!   voxchat chat --speak --voice-model-dir ./models/voice
//!   voxchat speak --model-dir ./models/voice --output-path out.wav --text "こんにちは"

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;

/// Voxchat - local LLM chat with a synthesized voice
#[derive(Parser)]
#[command(
    name = "voxchat",
    about = "Local LLM chat with a synthesized voice",
    version = env!("CARGO_PKG_VERSION"),
    arg_required_else_help = true,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Show logs, including llama.cpp's own output
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Interactive chat with streaming replies
    ///
    /// Keeps a sliding window of the conversation sized from the context
    /// length. Type 'exit' or 'quit' to leave.
    Chat {
        /// GGUF model file
        #[arg(long, env = "LLM_MODEL_PATH", default_value = "/app/models/model.gguf")]
        model: PathBuf,

        /// Layers offloaded to the GPU (-1 for all)
        #[arg(long, default_value = "-1", allow_negative_numbers = true, env = "N_GPU_LAYERS")]
        n_gpu_layers: i32,

        /// Context size in tokens
        #[arg(long, default_value = "2048", env = "N_CTX")]
        n_ctx: u32,

        /// CPU threads (default: chosen by llama.cpp)
        #[arg(long, env = "N_THREADS")]
        n_threads: Option<u32>,

        /// System prompt placed before the conversation
        #[arg(long, default_value = commands::chat::DEFAULT_SYSTEM_PROMPT)]
        system: String,

        /// Maximum tokens per reply
        #[arg(long, default_value = "200")]
        max_tokens: usize,

        /// Also synthesize each reply to a WAV file
        #[arg(long)]
        speak: bool,

        /// Voice model directory used with --speak
        #[arg(long, env = "DEFAULT_VOICE_MODEL_DIR", default_value = "/app/models/voice")]
        voice_model_dir: PathBuf,

        /// Directory for synthesized replies
        #[arg(long, env = "OUTPUT_DIR", default_value = "/app/output")]
        output_dir: PathBuf,
    },

    /// Synthesize one utterance to a WAV file
    Speak {
        /// Directory holding the .safetensors checkpoint, config.json and style_vectors.npy
        #[arg(long)]
        model_dir: PathBuf,

        /// Where to write the WAV file
        #[arg(long)]
        output_path: PathBuf,

        /// Text to synthesize
        #[arg(long)]
        text: String,

        /// Language of the text (JP, EN, ZH)
        #[arg(long, default_value = "JP")]
        language: String,

        /// Speaker ID for multi-speaker models
        #[arg(long, default_value = "0")]
        speaker_id: u32,

        /// Style name from the style vectors
        #[arg(long, default_value = "Neutral")]
        style: String,

        /// Strength of the style vector
        #[arg(long, default_value = "0.7")]
        style_weight: f32,

        /// Stochastic duration predictor ratio
        #[arg(long, default_value = "0.2")]
        sdp_ratio: f32,

        #[arg(long, default_value = "0.6")]
        noise: f32,

        #[arg(long, default_value = "0.8")]
        noise_w: f32,

        /// Length scale (above 1.0 speaks slower)
        #[arg(long, default_value = "1.0")]
        length: f32,

        /// Run on the CPU even if a GPU is available
        #[arg(long)]
        cpu: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "voxchat=debug,voxchat_core=debug,llama_cpp_2=info".into()),
            )
            .init();
    }

    match cli.command {
        Commands::Chat {
            model,
            n_gpu_layers,
            n_ctx,
            n_threads,
            system,
            max_tokens,
            speak,
            voice_model_dir,
            output_dir,
        } => {
            commands::chat::execute(commands::chat::ChatArgs {
                model,
                n_gpu_layers,
                n_ctx,
                n_threads,
                verbose: cli.verbose,
                system,
                max_tokens,
                speak,
                voice_model_dir,
                output_dir,
            })
            .await
        }

        Commands::Speak {
            model_dir,
            output_path,
            text,
            language,
            speaker_id,
            style,
            style_weight,
            sdp_ratio,
            noise,
            noise_w,
            length,
            cpu,
        } => {
            commands::speak::execute(commands::speak::SpeakArgs {
                model_dir,
                output_path,
                text,
                params: voxchat_core::SynthesisParams {
                    language,
                    speaker_id,
                    style,
                    style_weight,
                    sdp_ratio,
                    noise,
                    noise_w,
                    length,
                },
                cpu,
            })
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_defaults() {
        let cli = Cli::try_parse_from(["voxchat", "chat", "--model", "m.gguf"]).unwrap();
        match cli.command {
            Commands::Chat {
                n_ctx,
                max_tokens,
                speak,
                ..
            } => {
                assert_eq!(n_ctx, 2048);
                assert_eq!(max_tokens, 200);
                assert!(!speak);
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn negative_gpu_layers_parse() {
        let cli = Cli::try_parse_from(["voxchat", "chat", "--n-gpu-layers", "-1"]).unwrap();
        assert!(matches!(cli.command, Commands::Chat { n_gpu_layers: -1, .. }));
    }

    #[test]
    fn speak_requires_model_dir() {
        assert!(Cli::try_parse_from(["voxchat", "speak", "--text", "x", "--output-path", "o.wav"]).is_err());

        let cli = Cli::try_parse_from([
            "voxchat",
            "speak",
            "--model-dir",
            "voice",
            "--output-path",
            "o.wav",
            "--text",
            "こんにちは",
            "--cpu",
        ])
        .unwrap();
        match cli.command {
            Commands::Speak {
                language,
                style_weight,
                cpu,
                ..
            } => {
                assert_eq!(language, "JP");
                assert_eq!(style_weight, 0.7);
                assert!(cpu);
            }
            _ => panic!("expected speak"),
        }
    }
}
