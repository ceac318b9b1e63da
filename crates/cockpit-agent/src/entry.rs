//! The voice agent's prewarm hook and per-job entry point.

use crate::config::SessionConfig;
use crate::error::AgentError;
use crate::job::{JobContext, ProcessContext};
use crate::realtime::{RealtimeConnector, RealtimeModel, RealtimeOptions, TurnDetection};
use crate::room::{AutoSubscribe, DataPublishOptions, Room};
use crate::session::{AgentSession, AssistantPersona, RoomOutputOptions};
use crate::vad::VadLoader;
use cockpit_voice::CHAT_TOPIC;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Chat notice sent once the agent has joined the room.
pub const CONNECTED_MESSAGE: &str = "Agent connected. Preparing Gemini realtime session.";
/// Chat notice sent when the job tears down.
pub const FINISHED_MESSAGE: &str = "Agent session finished.";

pub struct VoiceAgent {
    config: SessionConfig,
    connector: Arc<dyn RealtimeConnector>,
    vad_loader: Arc<dyn VadLoader>,
    turn_detection: TurnDetection,
}

impl VoiceAgent {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn RealtimeConnector>,
        vad_loader: Arc<dyn VadLoader>,
    ) -> Self {
        Self {
            config,
            connector,
            vad_loader,
            turn_detection: TurnDetection::default(),
        }
    }

    pub fn with_turn_detection(mut self, turn_detection: TurnDetection) -> Self {
        self.turn_detection = turn_detection;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Loads the VAD into the process cache. Safe to call more than once.
    pub async fn prewarm(&self, proc: &ProcessContext) -> Result<(), AgentError> {
        proc.vad_or_load(self.vad_loader.as_ref()).await.map(|_| ())
    }

    /// Runs one job: joins the room, drives a session until it closes or
    /// the room goes away, then tears down.
    ///
    /// Once the room is joined it is always left again, whatever fails
    /// afterwards. The closing notice is published and the session closed
    /// whenever the session was built, including when starting it fails or
    /// the job is cancelled.
    pub async fn entry(&self, ctx: &mut JobContext) -> Result<(), AgentError> {
        let room = ctx.connect(AutoSubscribe::AudioOnly).await?;

        let mut teardown = JobTeardown::new(Arc::clone(&room));
        let result = self.run_in_room(Arc::clone(&room), ctx, &mut teardown).await;
        teardown.finish().await;

        ctx.shutdown().await;
        result
    }

    async fn run_in_room(
        &self,
        room: Arc<dyn Room>,
        ctx: &JobContext,
        teardown: &mut JobTeardown,
    ) -> Result<(), AgentError> {
        let vad = match ctx.proc().vad() {
            Some(vad) => vad,
            None => {
                debug!("VAD not prewarmed; loading it for this job");
                ctx.proc().vad_or_load(self.vad_loader.as_ref()).await?
            }
        };

        let model = RealtimeModel::new(
            Arc::clone(&self.connector),
            RealtimeOptions::from(&self.config),
        );
        let session = Arc::new(AgentSession::new(vad, model, self.turn_detection));

        let room_name = room.name().to_string();
        let _transcripts = session.on_user_input_transcribed(move |event| {
            if event.is_final {
                info!(room = %room_name, transcript = %event.transcript, "user speech transcribed");
            }
        });
        let _errors = session.on_error(|event| {
            warn!(recoverable = event.recoverable, "agent session error: {}", event.error);
        });

        publish_chat(room.as_ref(), CONNECTED_MESSAGE).await;

        teardown.attach(Arc::clone(&session));
        self.run_session(&session, room, ctx).await
    }

    async fn run_session(
        &self,
        session: &AgentSession,
        room: Arc<dyn Room>,
        ctx: &JobContext,
    ) -> Result<(), AgentError> {
        let persona = AssistantPersona::new(&self.config.agent_instructions);
        session
            .start(
                &persona,
                Arc::clone(&room),
                RoomOutputOptions {
                    transcription_enabled: true,
                },
            )
            .await?;

        session.say(&self.config.greeting).await?;

        tokio::select! {
            _ = session.wait_closed() => info!(room = room.name(), "agent session ended"),
            _ = room.disconnected() => info!(room = room.name(), "room disconnected"),
            _ = ctx.shutdown_requested() => info!(room = room.name(), "worker is shutting down"),
        }
        Ok(())
    }
}

/// Sends a chat notice to the room. Failures are logged, never returned.
pub async fn publish_chat(room: &dyn Room, message: &str) {
    if message.trim().is_empty() {
        return;
    }
    let options = DataPublishOptions::reliable(CHAT_TOPIC);
    if let Err(e) = room.publish_data(message.as_bytes().to_vec(), options).await {
        warn!(room = room.name(), "failed to publish chat message: {}", e);
    }
}

/// Runs job teardown exactly once. [`JobTeardown::finish`] publishes the
/// closing notice and closes the attached session; the room itself is left
/// by the job context. If the job future is dropped first, `Drop` closes the
/// session and hands the notice and the room disconnect to a spawned task.
struct JobTeardown {
    room: Arc<dyn Room>,
    session: Option<Arc<AgentSession>>,
    finished: bool,
}

impl JobTeardown {
    fn new(room: Arc<dyn Room>) -> Self {
        Self {
            room,
            session: None,
            finished: false,
        }
    }

    fn attach(&mut self, session: Arc<AgentSession>) {
        self.session = Some(session);
    }

    async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let Some(session) = self.session.take() else {
            return;
        };
        publish_chat(self.room.as_ref(), FINISHED_MESSAGE).await;
        match session.close().await {
            Ok(()) => {}
            Err(AgentError::SessionClosed) => debug!("agent session was already closed"),
            Err(e) => warn!("failed to close agent session: {}", e),
        }
    }
}

impl Drop for JobTeardown {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(room = self.room.name(), "job cancelled before teardown");

        let session = self.session.take();
        if let Some(session) = &session {
            session.close_now();
        }

        let room = Arc::clone(&self.room);
        let notify = session.is_some();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if notify {
                        publish_chat(room.as_ref(), FINISHED_MESSAGE).await;
                    }
                    room.disconnect().await;
                });
            }
            Err(_) => warn!(room = room.name(), "no runtime left; room not closed"),
        }
    }
}
