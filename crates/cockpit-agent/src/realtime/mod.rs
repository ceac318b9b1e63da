//! Realtime conversational model seam.
//!
//! A [`RealtimeModel`] is the configured-but-unconnected client a job builds
//! from [`SessionConfig`]. Starting a session opens a [`RealtimeChannel`]
//! through a [`RealtimeConnector`]: commands go in, events come out, and the
//! provider task owns the wire connection.

pub mod gemini;

use crate::config::SessionConfig;
use crate::error::AgentError;
use crate::vad::AudioFrame;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default capacity for the command and event channels of one connection.
pub const REALTIME_CHANNEL_CAPACITY: usize = 128;

/// Who decides that the user finished a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnDetection {
    /// The model's own server-side activity detection.
    #[default]
    RealtimeModel,
    /// Local VAD transitions are forwarded as explicit activity signals.
    Vad,
}

#[derive(Clone)]
pub struct RealtimeOptions {
    pub model: String,
    pub voice: String,
    pub api_key: Option<String>,
    pub instructions: String,
    pub turn_detection: TurnDetection,
    /// Ask the provider for input and output transcripts.
    pub transcription_enabled: bool,
}

impl fmt::Debug for RealtimeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeOptions")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("instructions", &self.instructions)
            .field("turn_detection", &self.turn_detection)
            .field("transcription_enabled", &self.transcription_enabled)
            .finish()
    }
}

impl From<&SessionConfig> for RealtimeOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            model: config.model.clone(),
            voice: config.voice.clone(),
            api_key: config.api_key.clone(),
            instructions: config.session_instructions.clone(),
            turn_detection: TurnDetection::default(),
            transcription_enabled: false,
        }
    }
}

/// Sent from the session to the provider task.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeCommand {
    Audio(AudioFrame),
    ActivityStart,
    ActivityEnd,
    /// Have the model speak `text` to the room.
    Say(String),
    Close,
}

/// Sent from the provider task to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    /// A chunk of model speech to play to the room.
    Audio(AudioFrame),
    InputTranscription { text: String, is_final: bool },
    OutputTranscription { text: String },
    TurnComplete,
    Interrupted,
    Error { message: String, recoverable: bool },
    /// The connection is gone; no further events follow.
    Closed { reason: String },
}

/// Both ends of one live model connection, as seen by the session.
#[derive(Debug)]
pub struct RealtimeChannel {
    pub commands: mpsc::Sender<RealtimeCommand>,
    pub events: mpsc::Receiver<RealtimeEvent>,
}

#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    fn provider(&self) -> &str;

    async fn connect(&self, options: &RealtimeOptions) -> Result<RealtimeChannel, AgentError>;
}

/// Realtime client configured for one job; connects when a session starts.
#[derive(Clone)]
pub struct RealtimeModel {
    connector: Arc<dyn RealtimeConnector>,
    options: RealtimeOptions,
}

impl fmt::Debug for RealtimeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeModel")
            .field("provider", &self.connector.provider())
            .field("options", &self.options)
            .finish()
    }
}

impl RealtimeModel {
    pub fn new(connector: Arc<dyn RealtimeConnector>, options: RealtimeOptions) -> Self {
        Self { connector, options }
    }

    pub fn options(&self) -> &RealtimeOptions {
        &self.options
    }

    /// Opens a connection. Persona instructions, when non-empty, replace the
    /// model's own instructions for this connection.
    pub(crate) async fn open(
        &self,
        persona_instructions: &str,
        turn_detection: TurnDetection,
        transcription_enabled: bool,
    ) -> Result<RealtimeChannel, AgentError> {
        let mut options = self.options.clone();
        if !persona_instructions.trim().is_empty() {
            options.instructions = persona_instructions.to_string();
        }
        options.turn_detection = turn_detection;
        options.transcription_enabled = transcription_enabled;

        tracing::debug!(
            provider = self.connector.provider(),
            model = %options.model,
            "opening realtime connection"
        );
        self.connector.connect(&options).await
    }
}
