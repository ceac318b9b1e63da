//! Voice agent worker for the avatar cockpit.
//!
//! A [`Worker`] runs one job per LiveKit room. Each job joins the room,
//! binds an [`AgentSession`] (shared VAD, Gemini Live realtime model, turn
//! detection) to it, greets the room and keeps the session alive until the
//! session closes or the room goes away. Lifecycle notices go out on the
//! `chat` data topic.

pub mod config;
pub mod dispatch;
pub mod entry;
pub mod error;
pub mod events;
pub mod job;
pub mod realtime;
pub mod room;
pub mod session;
pub mod vad;
pub mod worker;

pub use config::{AgentConfig, LoggingConfig, SessionConfig, WorkerConfig};
pub use dispatch::RoomWatcher;
pub use entry::{publish_chat, VoiceAgent, CONNECTED_MESSAGE, FINISHED_MESSAGE};
pub use error::AgentError;
pub use events::{EventEmitter, SessionError, Subscription, UserInputTranscribed};
pub use job::{JobContext, JobRequest, ProcessContext};
pub use realtime::gemini::GeminiConnector;
pub use realtime::{
    RealtimeChannel, RealtimeCommand, RealtimeConnector, RealtimeEvent, RealtimeModel,
    RealtimeOptions, TurnDetection,
};
pub use room::{
    AutoSubscribe, DataPublishOptions, LiveKitRoom, LiveKitRoomConnector, Room, RoomConnector,
};
pub use session::{AgentSession, AssistantPersona, RoomOutputOptions, TRANSCRIPTION_TOPIC};
pub use vad::{AudioFrame, EnergyVad, EnergyVadLoader, EnergyVadOptions, Vad, VadEvent, VadLoader, VadStream};
pub use worker::{Worker, WorkerOptions, JOB_QUEUE_CAPACITY};
