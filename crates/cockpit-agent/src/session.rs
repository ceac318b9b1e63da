//! The conversational session bound to one room for one job.
//!
//! An [`AgentSession`] composes the shared VAD, a [`RealtimeModel`] and the
//! turn-detection strategy. Starting it opens the realtime connection and
//! spawns two pumps. One turns realtime events into played speech, observer
//! callbacks and transcript packets; the other feeds room audio through the
//! VAD into the model.

use crate::error::AgentError;
use crate::events::{EventEmitter, SessionError, Subscription, UserInputTranscribed};
use crate::realtime::{RealtimeChannel, RealtimeCommand, RealtimeEvent, RealtimeModel, TurnDetection};
use crate::room::{wait_disconnected, DataPublishOptions, Room};
use crate::vad::{AudioFrame, Vad, VadEvent, VadStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Topic agent speech transcripts are published on.
pub const TRANSCRIPTION_TOPIC: &str = "lk.transcription";

/// The assistant the session speaks as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantPersona {
    pub instructions: String,
}

impl AssistantPersona {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomOutputOptions {
    /// Publish agent speech transcripts to the room.
    pub transcription_enabled: bool,
}

impl Default for RoomOutputOptions {
    fn default() -> Self {
        Self {
            transcription_enabled: true,
        }
    }
}

#[derive(Default)]
struct SessionState {
    commands: Option<mpsc::Sender<RealtimeCommand>>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct AgentSession {
    vad: Arc<dyn Vad>,
    model: RealtimeModel,
    turn_detection: TurnDetection,
    transcriptions: EventEmitter<UserInputTranscribed>,
    errors: EventEmitter<SessionError>,
    started: AtomicBool,
    close_requested: AtomicBool,
    closed: Arc<watch::Sender<bool>>,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("vad", &self.vad.name())
            .field("model", &self.model)
            .field("turn_detection", &self.turn_detection)
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl AgentSession {
    pub fn new(vad: Arc<dyn Vad>, model: RealtimeModel, turn_detection: TurnDetection) -> Self {
        Self {
            vad,
            model,
            turn_detection,
            transcriptions: EventEmitter::new(),
            errors: EventEmitter::new(),
            started: AtomicBool::new(false),
            close_requested: AtomicBool::new(false),
            closed: Arc::new(watch::channel(false).0),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn turn_detection(&self) -> TurnDetection {
        self.turn_detection
    }

    pub fn on_user_input_transcribed<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(&UserInputTranscribed) + Send + 'static,
    {
        self.transcriptions.on(handler)
    }

    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(&SessionError) + Send + 'static,
    {
        self.errors.on(handler)
    }

    /// Opens the realtime connection for `persona` and starts pumping events
    /// and room audio.
    pub async fn start(
        &self,
        persona: &AssistantPersona,
        room: Arc<dyn Room>,
        options: RoomOutputOptions,
    ) -> Result<(), AgentError> {
        if self.close_requested.load(Ordering::SeqCst) {
            return Err(AgentError::SessionClosed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AgentError::AlreadyStarted);
        }

        let RealtimeChannel { commands, events } = self
            .model
            .open(
                &persona.instructions,
                self.turn_detection,
                options.transcription_enabled,
            )
            .await?;

        let mut tasks = vec![tokio::spawn(pump_events(
            events,
            self.transcriptions.clone(),
            self.errors.clone(),
            Arc::clone(&room),
            options.transcription_enabled,
            Arc::clone(&self.closed),
        ))];

        if let Some(audio) = room.take_audio_input() {
            tasks.push(tokio::spawn(pump_audio(
                audio,
                self.vad.stream(),
                commands.clone(),
                self.turn_detection,
            )));
        } else {
            debug!(room = room.name(), "room has no audio feed");
        }

        {
            let mut state = self.lock_state();
            state.commands = Some(commands);
            state.tasks = tasks;
        }

        info!(
            room = room.name(),
            turn_detection = ?self.turn_detection,
            transcription = options.transcription_enabled,
            "agent session started"
        );
        Ok(())
    }

    /// Has the model speak `text`.
    pub async fn say(&self, text: &str) -> Result<(), AgentError> {
        if self.is_closed() {
            return Err(AgentError::SessionClosed);
        }
        let commands = self
            .lock_state()
            .commands
            .clone()
            .ok_or(AgentError::NotStarted)?;
        commands
            .send(RealtimeCommand::Say(text.to_string()))
            .await
            .map_err(|_| AgentError::SessionClosed)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the session has closed, either through [`close`] or
    /// because the realtime connection ended.
    ///
    /// [`close`]: AgentSession::close
    pub async fn wait_closed(&self) {
        wait_disconnected(&self.closed).await;
    }

    /// Closes the realtime connection and stops the pumps.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::SessionClosed`] when the session was already
    /// closed by an earlier call.
    pub async fn close(&self) -> Result<(), AgentError> {
        if self.close_requested.swap(true, Ordering::SeqCst) {
            return Err(AgentError::SessionClosed);
        }
        let state = std::mem::take(&mut *self.lock_state());
        if let Some(commands) = state.commands {
            let _ = commands.send(RealtimeCommand::Close).await;
        }
        for task in state.tasks {
            task.abort();
        }
        self.closed.send_replace(true);
        info!("agent session closed");
        Ok(())
    }

    /// Synchronous close for drop paths. No-op once closed.
    pub fn close_now(&self) {
        if self.close_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = std::mem::take(&mut *self.lock_state());
        if let Some(commands) = state.commands {
            let _ = commands.try_send(RealtimeCommand::Close);
        }
        for task in state.tasks {
            task.abort();
        }
        self.closed.send_replace(true);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn pump_events(
    mut events: mpsc::Receiver<RealtimeEvent>,
    transcriptions: EventEmitter<UserInputTranscribed>,
    errors: EventEmitter<SessionError>,
    room: Arc<dyn Room>,
    publish_transcripts: bool,
    closed: Arc<watch::Sender<bool>>,
) {
    let mut agent_transcript = String::new();
    let mut playback_failed = false;

    while let Some(event) = events.recv().await {
        if matches!(event, RealtimeEvent::Interrupted) {
            room.clear_audio();
        }
        match event {
            RealtimeEvent::Audio(frame) => {
                if let Err(e) = room.publish_audio(frame).await {
                    // Warn once per turn.
                    if !playback_failed {
                        warn!(room = room.name(), "failed to play agent speech: {}", e);
                    }
                    playback_failed = true;
                }
            }
            RealtimeEvent::InputTranscription { text, is_final } => {
                transcriptions.emit(&UserInputTranscribed {
                    transcript: text,
                    is_final,
                    speaker_id: None,
                });
            }
            RealtimeEvent::OutputTranscription { text } => agent_transcript.push_str(&text),
            RealtimeEvent::TurnComplete | RealtimeEvent::Interrupted => {
                playback_failed = false;
                let transcript = std::mem::take(&mut agent_transcript);
                if publish_transcripts {
                    publish_transcript(room.as_ref(), transcript.trim()).await;
                }
            }
            RealtimeEvent::Error {
                message,
                recoverable,
            } => {
                errors.emit(&SessionError {
                    error: message,
                    recoverable,
                });
            }
            RealtimeEvent::Closed { reason } => {
                info!(reason = %reason, "realtime connection closed");
                break;
            }
        }
    }

    closed.send_replace(true);
}

async fn publish_transcript(room: &dyn Room, transcript: &str) {
    if transcript.is_empty() {
        return;
    }
    let options = DataPublishOptions::reliable(TRANSCRIPTION_TOPIC);
    if let Err(e) = room
        .publish_data(transcript.as_bytes().to_vec(), options)
        .await
    {
        warn!(room = room.name(), "failed to publish agent transcript: {}", e);
    }
}

async fn pump_audio(
    mut audio: mpsc::Receiver<AudioFrame>,
    mut vad: Box<dyn VadStream>,
    commands: mpsc::Sender<RealtimeCommand>,
    turn_detection: TurnDetection,
) {
    let vad_turns = turn_detection == TurnDetection::Vad;

    while let Some(frame) = audio.recv().await {
        let transition = vad.push_frame(&frame);
        if let Some(transition) = transition {
            trace!(?transition, "voice activity");
        }

        if vad_turns && transition == Some(VadEvent::StartOfSpeech)
            && commands.send(RealtimeCommand::ActivityStart).await.is_err()
        {
            return;
        }
        if commands.send(RealtimeCommand::Audio(frame)).await.is_err() {
            return;
        }
        if vad_turns && transition == Some(VadEvent::EndOfSpeech)
            && commands.send(RealtimeCommand::ActivityEnd).await.is_err()
        {
            return;
        }
    }
    debug!("room audio feed ended");
}
