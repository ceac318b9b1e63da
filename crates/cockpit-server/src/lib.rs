//! Cockpit token server library logic.
//!
//! Serves the browser cockpit: LiveKit access tokens on `/token`, runtime
//! settings on `/config.js`, and static files for everything else. Dotfiles
//! and TOML files are never served from the static directory: they hold the
//! LiveKit signing secret.

pub mod api;
pub mod config;

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use cockpit_voice::VoiceService;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// LiveKit token signing and endpoint.
    pub voice_service: Arc<VoiceService>,
    /// Ready Player Me subdomain handed to the browser.
    pub avatar_subdomain: String,
    /// Directory served as the static fallback.
    pub static_dir: String,
}

impl AppState {
    pub fn from_config(config: &config::Config) -> Self {
        Self {
            voice_service: Arc::new(VoiceService::new(config.livekit.clone())),
            avatar_subdomain: config.avatar.subdomain.clone(),
            static_dir: config.static_files.dir.clone(),
        }
    }
}

/// Health check handler.
///
/// Returns `200 OK` with server status and version.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// True for request paths that must not reach the static directory: any
/// segment starting with `.` (`.env`, `.git/`), and configuration files.
pub fn is_private_path(path: &str) -> bool {
    let lowered = path.to_ascii_lowercase();
    let hidden_segment = lowered
        .split('/')
        .any(|segment| segment.starts_with('.') || segment.starts_with("%2e"));
    hidden_segment || lowered.ends_with(".toml") || lowered.ends_with("%2etoml")
}

async fn refuse_private_files(request: Request, next: Next) -> Response {
    if is_private_path(request.uri().path()) {
        tracing::debug!(path = %request.uri().path(), "refused private static path");
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    if !std::path::Path::new(&state.static_dir).is_dir() {
        tracing::warn!(path = %state.static_dir, "static directory not found; only API routes will answer");
    }
    if !state.voice_service.has_credentials() {
        tracing::warn!("LIVEKIT_API_KEY or LIVEKIT_API_SECRET missing; /token will fail");
    }

    Router::new()
        .route("/health", get(health))
        .route("/config.js", get(api::config_js_handler))
        .route("/token", get(api::token_handler))
        .fallback_service(ServeDir::new(&state.static_dir))
        .layer(middleware::from_fn(refuse_private_files))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
