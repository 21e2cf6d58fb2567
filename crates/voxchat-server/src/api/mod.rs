//! API routes and handlers

mod chat;
mod health;
mod tts;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;

/// Create the main API router
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    let audio_dir = ServeDir::new(state.chat.output_dir());

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health_check))
        .route("/status", get(health::status))
        .route("/chat", post(chat::chat))
        .route("/tts", post(tts::synthesize))
        // Generated replies
        .nest_service("/audio", audio_dir)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request());

    // A literal `*` cannot be combined with credentials, so echo the caller.
    if origins.iter().any(|origin| origin.trim() == "*") {
        warn!("CORS_ORIGINS contains '*': every origin is allowed with credentials");
        return layer.allow_origin(AllowOrigin::mirror_request());
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use voxchat_core::testing::{voice_dir, FakeVoiceBackend, ScriptedGenerator};
    use voxchat_core::{
        LlmService, LoadOptions, SamplingParams, Settings, TextGenerator, VoiceChat, VoiceService,
    };

    const ORIGINS: [&str; 2] = ["http://localhost:5173", "http://127.0.0.1:5173"];

    fn settings(root: &Path) -> Settings {
        let settings = Settings {
            output_dir: root.join("output"),
            default_voice_model_dir: voice_dir(root, "voice"),
            ..Settings::default()
        };
        std::fs::create_dir_all(&settings.output_dir).unwrap();
        settings
    }

    fn app_with(settings: &Settings, llm: LlmService, voice: Arc<FakeVoiceBackend>) -> Router {
        let voice = VoiceService::new(
            voice,
            LoadOptions {
                device: "cpu".to_string(),
                bert_model: "bert".to_string(),
            },
        );
        let chat = VoiceChat::new(Arc::new(llm), Arc::new(voice), settings);
        let origins: Vec<String> = ORIGINS.iter().map(|o| o.to_string()).collect();
        create_router(AppState::new(chat, settings), &origins)
    }

    fn app(settings: &Settings, reply: &str) -> Router {
        let llm = LlmService::preloaded(ScriptedGenerator::new(reply), SamplingParams::default());
        app_with(settings, llm, FakeVoiceBackend::new())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn root_reports_running() {
        let root = tempfile::tempdir().unwrap();
        let response = app(&settings(root.path()), "x")
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"message": "Backend is running!"})
        );
    }

    #[tokio::test]
    async fn chat_returns_playable_audio_url() {
        let root = tempfile::tempdir().unwrap();
        let app = app(&settings(root.path()), "ふん、来てやったわよ。");

        let response = app
            .clone()
            .oneshot(post_json("/chat", serde_json::json!({"text": "やあ"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["llm_response"], "ふん、来てやったわよ。");
        assert!(body["error"].is_null());
        let url = body["audio_url"].as_str().unwrap().to_string();
        assert!(url.starts_with("/audio/response_") && url.ends_with(".wav"));

        let audio = app
            .oneshot(Request::builder().uri(&url).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(audio.status(), StatusCode::OK);
        let bytes = audio.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..4], b"RIFF");
    }

    #[tokio::test]
    async fn chat_rejects_empty_text() {
        let root = tempfile::tempdir().unwrap();
        let response = app(&settings(root.path()), "x")
            .oneshot(post_json("/chat", serde_json::json!({"text": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_without_llm_is_unavailable() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        let loader: voxchat_core::llm::GeneratorLoader =
            Arc::new(|| Ok(ScriptedGenerator::new("x") as Arc<dyn TextGenerator>));
        let llm = LlmService::new("model.gguf", loader, SamplingParams::default());

        let response = app_with(&settings, llm, FakeVoiceBackend::new())
            .oneshot(post_json("/chat", serde_json::json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = json_body(response).await;
        assert_eq!(body["detail"], "LLM model is not available");
        assert_eq!(body["error"]["code"], "503");
    }

    #[tokio::test]
    async fn chat_reports_synthesis_failure_in_body() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        let llm = LlmService::preloaded(ScriptedGenerator::new("はい"), SamplingParams::default());

        let response = app_with(&settings, llm, FakeVoiceBackend::failing())
            .oneshot(post_json("/chat", serde_json::json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["llm_response"], "はい");
        assert_eq!(body["error"], "Voice synthesis failed");
        assert!(body["audio_url"].is_null());
    }

    #[tokio::test]
    async fn empty_generation_is_a_server_error() {
        let root = tempfile::tempdir().unwrap();
        let response = app(&settings(root.path()), " ")
            .oneshot(post_json("/chat", serde_json::json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await["detail"],
            "LLM failed to generate response"
        );
    }

    #[tokio::test]
    async fn tts_returns_audio_url() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        let response = app(&settings, "x")
            .oneshot(post_json("/tts", serde_json::json!({"text": "おはよう"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let url = body["audio_url"].as_str().unwrap();
        let file = url.trim_start_matches("/audio/");
        assert!(settings.output_dir.join(file).is_file());
    }

    #[tokio::test]
    async fn status_reflects_loaded_models() {
        let root = tempfile::tempdir().unwrap();
        let response = app(&settings(root.path()), "x")
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = json_body(response).await;
        assert_eq!(body["llm_loaded"], true);
        assert_eq!(body["voice_loaded"], false);
        assert!(body["voice_model_dir"].is_null());
    }

    #[tokio::test]
    async fn cors_allows_dev_frontend_with_credentials() {
        let root = tempfile::tempdir().unwrap();
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/chat")
            .header(header::ORIGIN, "http://localhost:5173")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();

        let response = app(&settings(root.path()), "x").oneshot(request).await.unwrap();
        let headers = response.headers();
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5173"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[tokio::test]
    async fn cors_ignores_unknown_origins() {
        let root = tempfile::tempdir().unwrap();
        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://evil.example")
            .body(Body::empty())
            .unwrap();

        let response = app(&settings(root.path()), "x").oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn wildcard_origin_echoes_caller() {
        let app: Router = Router::new()
            .route("/health", get(|| async { "ok" }))
            .layer(cors_layer(&["*".to_string()]));
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/health")
            .header(header::ORIGIN, "http://192.168.1.20:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let headers = response.headers();
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://192.168.1.20:3000"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    fn impatient(root: &Path) -> Settings {
        Settings {
            request_timeout_secs: 1,
            ..settings(root)
        }
    }

    #[tokio::test]
    async fn slow_chat_times_out() {
        let root = tempfile::tempdir().unwrap();
        let settings = impatient(root.path());
        let generator = ScriptedGenerator::slow("a b c d e f g h i j ", Duration::from_millis(300));
        let llm = LlmService::preloaded(generator, SamplingParams::default());

        let response = app_with(&settings, llm, FakeVoiceBackend::new())
            .oneshot(post_json("/chat", serde_json::json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["detail"], "Request timeout");
    }

    #[tokio::test]
    async fn slow_tts_times_out() {
        let root = tempfile::tempdir().unwrap();
        let settings = impatient(root.path());
        let llm = LlmService::preloaded(ScriptedGenerator::new("x"), SamplingParams::default());

        let response = app_with(
            &settings,
            llm,
            FakeVoiceBackend::slow(Duration::from_millis(1500)),
        )
        .oneshot(post_json("/tts", serde_json::json!({"text": "おはよう"})))
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["detail"], "Request timeout");
    }
}
