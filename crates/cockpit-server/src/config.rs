//! Server configuration loading from file and environment variables.

use cockpit_voice::LiveKitConfig;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// LiveKit endpoint and signing credentials.
    #[serde(default)]
    pub livekit: LiveKitConfig,

    /// Avatar provider settings handed to the browser.
    #[serde(default)]
    pub avatar: AvatarConfig,

    /// Static file serving.
    #[serde(default, rename = "static")]
    pub static_files: StaticConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvatarConfig {
    /// Ready Player Me subdomain the avatar creator loads from.
    #[serde(default = "default_subdomain")]
    pub subdomain: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    /// Directory served for every path without its own route.
    #[serde(default = "default_static_dir")]
    pub dir: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "cockpit_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    3000
}

fn default_subdomain() -> String {
    "demo".to_string()
}

fn default_static_dir() -> String {
    ".".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            subdomain: default_subdomain(),
        }
    }
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            dir: default_static_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override holds an unusable value.
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `HOST`, `PORT` override `server.host` / `server.port`
/// - `LIVEKIT_URL`, `LIVEKIT_API_KEY`, `LIVEKIT_API_SECRET` override `livekit.*`
/// - `LIVEKIT_TOKEN_TTL_SECONDS` overrides `livekit.token_ttl_seconds`
/// - `READY_PLAYER_ME_SUBDOMAIN` overrides `avatar.subdomain`
/// - `COCKPIT_STATIC_DIR` overrides `static.dir`
/// - `COCKPIT_LOG_LEVEL` overrides `logging.level`
/// - `COCKPIT_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if `PORT` or `LIVEKIT_TOKEN_TTL_SECONDS` is not a number.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Same as [`load_config`] with an injectable variable source.
pub fn load_config_with<F>(path: Option<&str>, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    let env = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(host) = env("HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        } else {
            tracing::warn!(value = %host, "ignoring unparseable HOST");
        }
    }
    if let Some(port) = env("PORT") {
        config.server.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            name: "PORT",
            value: port.clone(),
        })?;
    }
    if let Some(url) = env("LIVEKIT_URL") {
        config.livekit.url = url;
    }
    if let Some(key) = env("LIVEKIT_API_KEY") {
        config.livekit.api_key = key;
    }
    if let Some(secret) = env("LIVEKIT_API_SECRET") {
        config.livekit.api_secret = secret;
    }
    if let Some(ttl) = env("LIVEKIT_TOKEN_TTL_SECONDS") {
        config.livekit.token_ttl_seconds =
            ttl.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: "LIVEKIT_TOKEN_TTL_SECONDS",
                value: ttl.clone(),
            })?;
    }
    if let Some(subdomain) = env("READY_PLAYER_ME_SUBDOMAIN") {
        config.avatar.subdomain = subdomain;
    }
    if let Some(dir) = env("COCKPIT_STATIC_DIR") {
        config.static_files.dir = dir;
    }
    if let Some(level) = env("COCKPIT_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("COCKPIT_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}
