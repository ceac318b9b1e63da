//! Error types for the agent worker.

use cockpit_voice::VoiceError;

/// Errors raised while configuring the worker or running a job.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A required environment variable is absent or empty.
    #[error("{0} is required")]
    MissingEnv(&'static str),

    /// A configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// LiveKit configuration, signing or room service failure.
    #[error(transparent)]
    Voice(#[from] VoiceError),

    /// The room handle rejected an operation.
    #[error("room error: {0}")]
    Room(String),

    /// The realtime model connection failed or rejected a command.
    #[error("realtime model error: {0}")]
    Realtime(String),

    /// Loading the voice-activity detector failed.
    #[error("VAD error: {0}")]
    Vad(String),

    /// `start` was called on a session that is already running.
    #[error("agent session already started")]
    AlreadyStarted,

    /// An operation that needs a running session was called before `start`.
    #[error("agent session not started")]
    NotStarted,

    /// The session was closed before or during the operation.
    #[error("agent session already closed")]
    SessionClosed,
}
