use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use cockpit_server::{app, AppState};
use cockpit_voice::{LiveKitConfig, VoiceService};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

const LIVEKIT_URL: &str = "wss://lk.example.com";
const API_KEY: &str = "test-key";
const API_SECRET: &str = "test-secret-that-is-long-enough";

#[derive(serde::Deserialize)]
struct Claims {
    sub: String,
    video: VideoClaims,
}

#[derive(serde::Deserialize)]
struct VideoClaims {
    room: String,
    #[serde(rename = "roomJoin")]
    room_join: bool,
    #[serde(rename = "canPublish")]
    can_publish: bool,
    #[serde(rename = "canSubscribe")]
    can_subscribe: bool,
}

fn decode_claims(token: &str) -> Claims {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    let validation = Validation::new(Algorithm::HS256);
    let key = DecodingKey::from_secret(API_SECRET.as_bytes());
    decode::<Claims>(token, &key, &validation)
        .expect("Failed to decode token")
        .claims
}

fn state(api_key: &str, api_secret: &str, static_dir: &str) -> AppState {
    AppState {
        voice_service: Arc::new(VoiceService::new(LiveKitConfig::new(
            LIVEKIT_URL,
            api_key,
            api_secret,
        ))),
        avatar_subdomain: "demo".to_string(),
        static_dir: static_dir.to_string(),
    }
}

fn test_app() -> Router {
    app(state(API_KEY, API_SECRET, "."))
}

async fn get(app: Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body.to_vec())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let (status, _, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn token_for_room_and_identity() {
    let (status, json) = get_json(test_app(), "/token?room=test-room&identity=alice").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["room"], "test-room");
    assert_eq!(json["url"], LIVEKIT_URL);

    let token = json["token"].as_str().unwrap();
    assert!(!token.is_empty());
    let claims = decode_claims(token);
    assert_eq!(claims.sub, "alice");
    assert_eq!(claims.video.room, "test-room");
    assert!(claims.video.room_join);
    assert!(claims.video.can_publish);
    assert!(claims.video.can_subscribe);
}

#[tokio::test]
async fn token_defaults_room_and_identity() {
    let (status, json) = get_json(test_app(), "/token").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["room"], "default-room");
    let claims = decode_claims(json["token"].as_str().unwrap());
    assert!(claims.sub.starts_with("participant-"));
    assert_eq!(claims.video.room, "default-room");
}

#[tokio::test]
async fn blank_query_values_fall_back_to_defaults() {
    let (_, json) = get_json(test_app(), "/token?room=&identity=").await;
    assert_eq!(json["room"], "default-room");
    let claims = decode_claims(json["token"].as_str().unwrap());
    assert!(claims.sub.starts_with("participant-"));
}

#[tokio::test]
async fn default_identities_do_not_collide() {
    let mut identities = std::collections::HashSet::new();
    for _ in 0..20 {
        let (_, json) = get_json(test_app(), "/token?room=lobby").await;
        let claims = decode_claims(json["token"].as_str().unwrap());
        assert!(identities.insert(claims.sub));
    }
}

#[tokio::test]
async fn missing_credentials_is_a_server_error() {
    for (key, secret) in [("", ""), (API_KEY, ""), ("", API_SECRET)] {
        let app = app(state(key, secret, "."));
        let (status, json) = get_json(app, "/token?room=test-room&identity=alice").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "Missing LIVEKIT_API_KEY or LIVEKIT_API_SECRET");
        assert!(json.get("token").is_none());
    }
}

#[tokio::test]
async fn config_js_exposes_client_settings() {
    let (status, headers, body) = get(test_app(), "/config.js").await;

    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("application/javascript"));
    assert!(headers[header::CACHE_CONTROL]
        .to_str()
        .unwrap()
        .contains("public"));

    let body = String::from_utf8(body).unwrap();
    let json = body
        .strip_prefix("window.COCKPIT_CONFIG = ")
        .and_then(|rest| rest.strip_suffix(';'))
        .expect("unexpected config.js body");
    let config: Value = serde_json::from_str(json).unwrap();
    assert_eq!(config["rpmSubdomain"], "demo");
    assert_eq!(config["livekitUrl"], LIVEKIT_URL);
}

#[tokio::test]
async fn config_js_works_without_credentials() {
    let (status, _, _) = get(app(state("", "", ".")), "/config.js").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_check_returns_ok() {
    let (status, json) = get_json(test_app(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn other_paths_serve_static_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>cockpit</h1>").unwrap();
    let static_dir = dir.path().to_str().unwrap();

    let (status, _, body) = get(app(state(API_KEY, API_SECRET, static_dir)), "/index.html").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"<h1>cockpit</h1>");

    let (status, _, _) = get(app(state(API_KEY, API_SECRET, static_dir)), "/missing.js").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dotfiles_and_config_files_are_not_served() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".env"), "LIVEKIT_API_SECRET=topsecret").unwrap();
    std::fs::write(
        dir.path().join("cockpit.toml"),
        "[livekit]\napi_secret = \"filesecret\"",
    )
    .unwrap();
    std::fs::create_dir(dir.path().join(".git")).unwrap();
    std::fs::write(dir.path().join(".git").join("config"), "[core]").unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>cockpit</h1>").unwrap();
    let static_dir = dir.path().to_str().unwrap();

    for path in ["/.env", "/cockpit.toml", "/.git/config", "/%2eenv"] {
        let (status, _, body) = get(app(state(API_KEY, API_SECRET, static_dir)), path).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} was served", path);
        assert!(!String::from_utf8_lossy(&body).contains("secret"));
    }

    let (status, _, _) = get(app(state(API_KEY, API_SECRET, static_dir)), "/index.html").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn malformed_query_is_a_json_error() {
    let (status, json) = get_json(test_app(), "/token?room=a&room=b").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("room"));
    assert!(json.get("token").is_none());
}

#[tokio::test]
async fn missing_credentials_win_over_a_malformed_query() {
    let (status, json) = get_json(app(state("", "", ".")), "/token?room=a&room=b").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "Missing LIVEKIT_API_KEY or LIVEKIT_API_SECRET");
}
