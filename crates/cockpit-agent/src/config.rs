//! Agent worker configuration, read from the process environment.
//!
//! Required:
//! - `LIVEKIT_URL`: LiveKit endpoint (`http(s)://` or `ws(s)://`)
//! - `GOOGLE_REALTIME_MODEL`: Gemini Live model id (e.g. `gemini-2.0-flash-exp`)
//!
//! Optional:
//! - `LIVEKIT_API_KEY` / `LIVEKIT_API_SECRET`
//! - `LIVEKIT_AGENT_CONCURRENCY` (default 1, floor 1)
//! - `GOOGLE_GEMINI_VOICE` (default `Puck`)
//! - `GOOGLE_API_KEY`, falling back to `GOOGLE_GENAI_API_KEY`
//! - `GOOGLE_SESSION_INSTRUCTIONS`, `AGENT_INSTRUCTIONS`, `AGENT_GREETING`
//! - `COCKPIT_ROOM_POLL_SECS` (default 5)
//! - `COCKPIT_LOG_LEVEL` (default `info`), `COCKPIT_LOG_JSON`

use crate::error::AgentError;
use cockpit_voice::{normalize_ws_url, LiveKitConfig};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_AGENT_PROMPT: &str = "You are a proactive home cockpit assistant. Keep replies concise, speak clearly, and mention follow-up actions when helpful.";
pub const DEFAULT_SESSION_GREETING: &str =
    "Hello! I am ready to assist you with voice and avatar control.";
pub const DEFAULT_SESSION_INSTRUCTIONS: &str = "You are the spoken persona of a Ready Player Me avatar. Respond with warmth and stay action oriented.";
pub const DEFAULT_GOOGLE_VOICE: &str = "Puck";
pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_ROOM_POLL_SECS: u64 = 5;

/// Immutable per-process settings for every conversational session.
#[derive(Clone)]
pub struct SessionConfig {
    /// Realtime model identifier.
    pub model: String,
    /// Prebuilt voice the model speaks with.
    pub voice: String,
    /// Realtime API credential. Its absence only fails jobs, not start-up.
    pub api_key: Option<String>,
    /// Instructions configured on the realtime model itself.
    pub session_instructions: String,
    /// Instructions of the assistant persona the session starts with.
    pub agent_instructions: String,
    /// Spoken once the session is up.
    pub greeting: String,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("session_instructions", &self.session_instructions)
            .field("agent_instructions", &self.agent_instructions)
            .field("greeting", &self.greeting)
            .finish()
    }
}

/// How the worker reaches LiveKit and how many jobs it runs at once.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Websocket form of `LIVEKIT_URL`.
    pub ws_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub concurrency: usize,
    pub room_poll_interval: Duration,
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("ws_url", &self.ws_url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("concurrency", &self.concurrency)
            .field("room_poll_interval", &self.room_poll_interval)
            .finish()
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "cockpit_agent=debug,info").
    pub level: String,
    /// Whether to output logs in JSON format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(level) = non_empty(&lookup, "COCKPIT_LOG_LEVEL") {
            config.level = level;
        }
        if let Some(json) = non_empty(&lookup, "COCKPIT_LOG_JSON") {
            config.json = json == "true" || json == "1";
        }
        config
    }
}

/// Everything the agent worker reads at start-up.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub worker: WorkerConfig,
    pub session: SessionConfig,
}

impl AgentConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Fails when `LIVEKIT_URL` or `GOOGLE_REALTIME_MODEL` is missing, or when
    /// `LIVEKIT_URL` is not an http(s)/ws(s) endpoint.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_lookup(env_lookup)
    }

    /// Same as [`AgentConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_url = non_empty(&lookup, "LIVEKIT_URL").ok_or(AgentError::MissingEnv("LIVEKIT_URL"))?;
        let ws_url = normalize_ws_url(&raw_url)?;

        let model = non_empty(&lookup, "GOOGLE_REALTIME_MODEL")
            .ok_or(AgentError::MissingEnv("GOOGLE_REALTIME_MODEL"))?;

        let room_poll_secs = match non_empty(&lookup, "COCKPIT_ROOM_POLL_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                AgentError::Config(format!("COCKPIT_ROOM_POLL_SECS is not a number: {}", raw))
            })?,
            None => DEFAULT_ROOM_POLL_SECS,
        };

        let worker = WorkerConfig {
            ws_url,
            api_key: non_empty(&lookup, "LIVEKIT_API_KEY").unwrap_or_default(),
            api_secret: non_empty(&lookup, "LIVEKIT_API_SECRET").unwrap_or_default(),
            concurrency: parse_concurrency(lookup("LIVEKIT_AGENT_CONCURRENCY").as_deref()),
            room_poll_interval: Duration::from_secs(room_poll_secs.max(1)),
        };

        let session = SessionConfig {
            model,
            voice: non_empty(&lookup, "GOOGLE_GEMINI_VOICE")
                .unwrap_or_else(|| DEFAULT_GOOGLE_VOICE.to_string()),
            api_key: non_empty(&lookup, "GOOGLE_API_KEY")
                .or_else(|| non_empty(&lookup, "GOOGLE_GENAI_API_KEY")),
            session_instructions: non_empty(&lookup, "GOOGLE_SESSION_INSTRUCTIONS")
                .unwrap_or_else(|| DEFAULT_SESSION_INSTRUCTIONS.to_string()),
            agent_instructions: non_empty(&lookup, "AGENT_INSTRUCTIONS")
                .unwrap_or_else(|| DEFAULT_AGENT_PROMPT.to_string()),
            greeting: non_empty(&lookup, "AGENT_GREETING")
                .unwrap_or_else(|| DEFAULT_SESSION_GREETING.to_string()),
        };

        Ok(Self { worker, session })
    }

    /// LiveKit settings for the room service client.
    pub fn livekit(&self) -> LiveKitConfig {
        LiveKitConfig::new(
            &self.worker.ws_url,
            &self.worker.api_key,
            &self.worker.api_secret,
        )
    }
}

/// Parses the worker concurrency limit from its leading integer, so `"3abc"`
/// reads as 3. Anything without a positive leading integer yields the
/// default of one job at a time.
pub fn parse_concurrency(raw: Option<&str>) -> usize {
    raw.and_then(leading_integer)
        .filter(|value| *value >= 1)
        .and_then(|value| usize::try_from(value).ok())
        .unwrap_or(DEFAULT_CONCURRENCY)
}

fn leading_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let sign_len = usize::from(trimmed.starts_with(&['+', '-'][..]));
    let digits = trimmed[sign_len..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len() - sign_len);
    if digits == 0 {
        return None;
    }
    trimmed[..sign_len + digits].parse().ok()
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn missing_livekit_url_is_fatal() {
        let err = AgentConfig::from_lookup(lookup_from(&[(
            "GOOGLE_REALTIME_MODEL",
            "gemini-2.0-flash-exp",
        )]))
        .unwrap_err();
        assert!(matches!(err, AgentError::MissingEnv("LIVEKIT_URL")));
        assert_eq!(err.to_string(), "LIVEKIT_URL is required");
    }

    #[test]
    fn missing_model_is_fatal() {
        let err = AgentConfig::from_lookup(lookup_from(&[("LIVEKIT_URL", "wss://lk.example.com")]))
            .unwrap_err();
        assert!(matches!(err, AgentError::MissingEnv("GOOGLE_REALTIME_MODEL")));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let err = AgentConfig::from_lookup(lookup_from(&[
            ("LIVEKIT_URL", "   "),
            ("GOOGLE_REALTIME_MODEL", "gemini-2.0-flash-exp"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AgentError::MissingEnv("LIVEKIT_URL")));
    }

    #[test]
    fn invalid_url_scheme_is_fatal() {
        let err = AgentConfig::from_lookup(lookup_from(&[
            ("LIVEKIT_URL", "ftp://lk.example.com"),
            ("GOOGLE_REALTIME_MODEL", "gemini-2.0-flash-exp"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("ftp://lk.example.com"));
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let config = AgentConfig::from_lookup(lookup_from(&[
            ("LIVEKIT_URL", "https://lk.example.com"),
            ("GOOGLE_REALTIME_MODEL", "gemini-2.0-flash-exp"),
        ]))
        .unwrap();

        assert_eq!(config.worker.ws_url, "wss://lk.example.com");
        assert_eq!(config.worker.concurrency, 1);
        assert_eq!(config.worker.room_poll_interval, Duration::from_secs(5));
        assert_eq!(config.session.voice, "Puck");
        assert_eq!(config.session.api_key, None);
        assert_eq!(config.session.greeting, DEFAULT_SESSION_GREETING);
        assert_eq!(config.session.agent_instructions, DEFAULT_AGENT_PROMPT);
        assert_eq!(config.session.session_instructions, DEFAULT_SESSION_INSTRUCTIONS);
    }

    #[test]
    fn genai_key_is_a_fallback() {
        let config = AgentConfig::from_lookup(lookup_from(&[
            ("LIVEKIT_URL", "ws://localhost:7880"),
            ("GOOGLE_REALTIME_MODEL", "gemini-2.0-flash-exp"),
            ("GOOGLE_GENAI_API_KEY", "genai-key"),
        ]))
        .unwrap();
        assert_eq!(config.session.api_key.as_deref(), Some("genai-key"));

        let config = AgentConfig::from_lookup(lookup_from(&[
            ("LIVEKIT_URL", "ws://localhost:7880"),
            ("GOOGLE_REALTIME_MODEL", "gemini-2.0-flash-exp"),
            ("GOOGLE_API_KEY", "primary"),
            ("GOOGLE_GENAI_API_KEY", "genai-key"),
        ]))
        .unwrap();
        assert_eq!(config.session.api_key.as_deref(), Some("primary"));
    }

    #[test]
    fn concurrency_has_a_floor_of_one() {
        assert_eq!(parse_concurrency(None), 1);
        assert_eq!(parse_concurrency(Some("4")), 4);
        assert_eq!(parse_concurrency(Some(" 2 ")), 2);
        assert_eq!(parse_concurrency(Some("0")), 1);
        assert_eq!(parse_concurrency(Some("-3")), 1);
        assert_eq!(parse_concurrency(Some("many")), 1);
    }

    #[test]
    fn concurrency_reads_the_leading_integer() {
        assert_eq!(parse_concurrency(Some("3abc")), 3);
        assert_eq!(parse_concurrency(Some("+2")), 2);
        assert_eq!(parse_concurrency(Some("2.5")), 2);
        assert_eq!(parse_concurrency(Some("-")), 1);
        assert_eq!(parse_concurrency(Some("")), 1);
        assert_eq!(parse_concurrency(Some("99999999999999999999")), 1);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = AgentConfig::from_lookup(lookup_from(&[
            ("LIVEKIT_URL", "ws://localhost:7880"),
            ("LIVEKIT_API_SECRET", "lk-secret"),
            ("GOOGLE_REALTIME_MODEL", "gemini-2.0-flash-exp"),
            ("GOOGLE_API_KEY", "google-secret"),
        ]))
        .unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("lk-secret"));
        assert!(!rendered.contains("google-secret"));
    }

    #[test]
    fn logging_overrides() {
        let logging = LoggingConfig::from_lookup(lookup_from(&[
            ("COCKPIT_LOG_LEVEL", "debug"),
            ("COCKPIT_LOG_JSON", "1"),
        ]));
        assert_eq!(logging.level, "debug");
        assert!(logging.json);
    }
}
