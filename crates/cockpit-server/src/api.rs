//! API handlers for the cockpit token server.

use crate::AppState;
use axum::{
    extract::{rejection::QueryRejection, Extension, Json, Query},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use cockpit_voice::{AccessGrant, VoiceError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Room used when `/token` is called without one.
pub const DEFAULT_ROOM: &str = "default-room";

/// Query parameters of `GET /token`.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub room: Option<String>,
    pub identity: Option<String>,
}

/// Response body for a successful token request.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Signed LiveKit access token.
    pub token: String,
    /// LiveKit endpoint the browser connects to.
    pub url: String,
    /// Room the token grants access to.
    pub room: String,
}

/// Runtime settings the browser cockpit reads from `/config.js`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientConfig<'a> {
    rpm_subdomain: &'a str,
    livekit_url: &'a str,
}

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<VoiceError> for ApiError {
    fn from(e: VoiceError) -> Self {
        match e {
            VoiceError::MissingCredentials => ApiError::InternalServerError(e.to_string()),
            other => ApiError::InternalServerError(format!("failed to create token: {}", other)),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Identity for callers that did not pick one: the current time in
/// milliseconds plus a random suffix, so two requests in the same
/// millisecond still differ.
pub fn default_identity() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "participant-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Handler for `GET /token`.
///
/// Mints a join/publish/subscribe grant for `room` (default
/// `default-room`) and `identity` (generated when absent). Missing signing
/// credentials fail the request before the query is looked at.
pub async fn token_handler(
    Extension(state): Extension<Arc<AppState>>,
    query: Result<Query<TokenQuery>, QueryRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    if !state.voice_service.has_credentials() {
        tracing::error!("cannot issue access tokens: {}", VoiceError::MissingCredentials);
        return Err(VoiceError::MissingCredentials.into());
    }
    let Query(query) = query.map_err(ApiError::from)?;

    let room = non_blank(query.room).unwrap_or_else(|| DEFAULT_ROOM.to_string());
    let identity = non_blank(query.identity).unwrap_or_else(default_identity);

    let grant = AccessGrant::new(room.as_str(), identity.as_str());
    let token = state
        .voice_service
        .generate_join_token(&grant)
        .map_err(|e| {
            tracing::error!(room = %room, "failed to issue access token: {}", e);
            ApiError::from(e)
        })?;

    tracing::info!(room = %room, identity = %identity, "issued access token");

    Ok(Json(TokenResponse {
        token,
        url: state.voice_service.get_url().to_string(),
        room,
    }))
}

/// Renders the `/config.js` body.
pub fn render_config_js(rpm_subdomain: &str, livekit_url: &str) -> Result<String, serde_json::Error> {
    let config = serde_json::to_string(&ClientConfig {
        rpm_subdomain,
        livekit_url,
    })?;
    Ok(format!("window.COCKPIT_CONFIG = {};", config))
}

/// Handler for `GET /config.js`.
pub async fn config_js_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let body = render_config_js(&state.avatar_subdomain, state.voice_service.get_url())
        .map_err(|e| ApiError::InternalServerError(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, "public, max-age=300"),
        ],
        body,
    )
        .into_response())
}
