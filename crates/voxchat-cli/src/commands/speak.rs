//! One-shot speech synthesis

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use voxchat_core::{Settings, SynthesisParams, VoiceService};

pub struct SpeakArgs {
    pub model_dir: PathBuf,
    pub output_path: PathBuf,
    pub text: String,
    pub params: SynthesisParams,
    pub cpu: bool,
}

fn settings_for(args: &SpeakArgs, base: Settings) -> Settings {
    Settings {
        default_voice_model_dir: args.model_dir.clone(),
        tts_device: if args.cpu {
            "cpu".to_string()
        } else {
            base.tts_device.clone()
        },
        ..base
    }
}

async fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

pub async fn execute(args: SpeakArgs) -> anyhow::Result<ExitCode> {
    let settings = settings_for(&args, Settings::from_env());
    println!("Using device: {}", settings.tts_device);
    println!("Loading model from: {}", args.model_dir.display());

    let voice = VoiceService::sbv2_worker(&settings);
    if let Err(e) = voice.load(&args.model_dir).await {
        println!("Error loading model: {}", e);
        return Ok(ExitCode::FAILURE);
    }
    println!("Model loaded successfully.");

    ensure_parent_dir(&args.output_path).await?;

    println!("Synthesizing text: \"{}\"", args.text);
    match voice
        .synthesize_with(&args.text, &args.output_path, &args.model_dir, &args.params)
        .await
    {
        Ok(()) => {
            println!("Audio saved to {}", args.output_path.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("Error during synthesis or saving: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
