use cockpit_voice::{AccessGrant, LiveKitConfig, VoiceError, VoiceService};
use std::env;

const DEFAULT_URL: &str = "http://localhost:7880";
const DEFAULT_KEY: &str = "devkey";
const DEFAULT_SECRET: &str = "secret";

#[derive(serde::Deserialize)]
struct Claims {
    sub: String,
    name: String,
    exp: u64,
    nbf: u64,
    video: VideoClaims,
}

#[derive(serde::Deserialize)]
struct VideoClaims {
    room: String,
    #[serde(rename = "canPublish")]
    can_publish: bool,
    #[serde(rename = "canSubscribe")]
    can_subscribe: bool,
    #[serde(rename = "roomJoin")]
    room_join: bool,
}

fn decode_claims(token: &str, secret: &str) -> Claims {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    let validation = Validation::new(Algorithm::HS256);
    let key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Claims>(token, &key, &validation)
        .expect("Failed to decode token")
        .claims
}

#[tokio::test]
async fn test_generate_join_token() {
    let config = LiveKitConfig::new(DEFAULT_URL, DEFAULT_KEY, DEFAULT_SECRET);
    let service = VoiceService::new(config);

    let token = service
        .generate_join_token(&AccessGrant::new("test-room", "user-123").with_name("Test User"))
        .expect("Failed to generate token");

    assert!(!token.is_empty());
}

#[tokio::test]
async fn test_token_permissions() {
    let config = LiveKitConfig::new(DEFAULT_URL, DEFAULT_KEY, DEFAULT_SECRET);
    let service = VoiceService::new(config);

    let token = service
        .generate_join_token(&AccessGrant::new("perm-room", "user-perm"))
        .expect("Failed to generate token");

    let claims = decode_claims(&token, DEFAULT_SECRET);
    assert_eq!(claims.sub, "user-perm");
    assert_eq!(claims.name, "user-perm", "name falls back to identity");
    assert_eq!(claims.video.room, "perm-room");
    assert!(claims.video.can_publish, "canPublish should be true");
    assert!(claims.video.can_subscribe, "canSubscribe should be true");
    assert!(claims.video.room_join, "roomJoin should be true");
}

#[tokio::test]
async fn test_token_expiry_follows_configured_ttl() {
    let mut config = LiveKitConfig::new(DEFAULT_URL, DEFAULT_KEY, DEFAULT_SECRET);
    config.token_ttl_seconds = 120;
    let service = VoiceService::new(config);

    let token = service
        .generate_join_token(&AccessGrant::new("ttl-room", "ttl-user"))
        .expect("Failed to generate token");

    let claims = decode_claims(&token, DEFAULT_SECRET);
    let lifetime = claims.exp - claims.nbf;
    assert!(
        (115..=125).contains(&lifetime),
        "token lifetime should be ~120s, was {}",
        lifetime
    );
}

#[test]
fn test_missing_credentials_refuse_to_sign() {
    let service = VoiceService::new(LiveKitConfig::new(DEFAULT_URL, DEFAULT_KEY, ""));
    let err = service
        .generate_join_token(&AccessGrant::new("room", "user"))
        .unwrap_err();
    assert!(matches!(err, VoiceError::MissingCredentials));

    let service = VoiceService::new(LiveKitConfig::default());
    assert!(!service.has_credentials());
}

#[tokio::test]
async fn test_ensure_room() {
    let url = env::var("LIVEKIT_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());

    let config = LiveKitConfig::new(&url, DEFAULT_KEY, DEFAULT_SECRET);
    let service = VoiceService::new(config);

    match service.ensure_room("test-integration-room").await {
        Ok(()) => {
            let exists = service
                .room_exists("test-integration-room")
                .await
                .unwrap_or(false);
            assert!(exists, "room should exist after ensure_room");
        }
        Err(e) => {
            // Allow the test to pass without a LiveKit sidecar.
            println!("Skipping room test: LiveKit server not reachable: {}", e);
        }
    }
}

#[test]
fn test_livekit_config_toml() {
    let toml_str = r#"
        url = "wss://cockpit.livekit.cloud"
        api_key = "key"
        api_secret = "secret"
        token_ttl_seconds = 600
    "#;

    let config: LiveKitConfig = toml::from_str(toml_str).expect("parse TOML");
    assert_eq!(config.url, "wss://cockpit.livekit.cloud");
    assert_eq!(config.token_ttl_seconds, 600);
    assert!(config.has_credentials());
}

#[test]
fn test_livekit_config_defaults() {
    let config: LiveKitConfig = toml::from_str("").expect("parse TOML");
    assert_eq!(config.url, "ws://localhost:7880");
    assert_eq!(config.token_ttl_seconds, 3600);
    assert!(!config.has_credentials());
}

#[test]
fn test_livekit_config_serialization_skips_secret() {
    let config = LiveKitConfig::new(DEFAULT_URL, DEFAULT_KEY, DEFAULT_SECRET);
    let json = serde_json::to_value(&config).expect("serialize");
    assert_eq!(json["api_key"], DEFAULT_KEY);
    assert!(json.get("api_secret").is_none());
}
