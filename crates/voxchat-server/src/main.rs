//! Voxchat Server - HTTP API that answers chat messages with a synthesized voice

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod error;
mod state;

use state::AppState;
use voxchat_core::{LlmService, Settings, VoiceChat, VoiceService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxchat_server=info,voxchat_core=info,llama_cpp_2=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Voxchat Server");

    let settings = Settings::from_env();
    info!("LLM model: {}", settings.llm_model_path.display());
    info!("Voice model directory: {}", settings.default_voice_model_dir.display());

    tokio::fs::create_dir_all(&settings.output_dir).await?;
    info!("Output directory: {}", settings.output_dir.display());

    let llm = Arc::new(LlmService::llama_cpp(&settings));
    let voice = Arc::new(VoiceService::sbv2_worker(&settings));

    // A model that fails to load leaves the server up; requests report 503.
    info!("Loading models...");
    if let Err(e) = llm.load().await {
        error!(
            "Fatal error during LLM model loading: {}. Application might not function correctly.",
            e
        );
    }
    if let Err(e) = voice.load(&settings.default_voice_model_dir).await {
        error!(
            "Fatal error during Voice model loading: {}. Application might not function correctly.",
            e
        );
    }
    info!("Model loading process finished.");

    let state = AppState::new(VoiceChat::new(llm, voice, &settings), &settings);

    // Build router
    let app = api::create_router(state.clone(), &settings.cors_origins);

    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(state));

    info!("Server ready. Press Ctrl+C to stop.");
    server.await?;

    Ok(())
}

/// Wait for shutdown signal, then release the models
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        },
    }
    drop(state);
}
