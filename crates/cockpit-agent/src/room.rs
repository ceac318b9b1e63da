//! Room handles a job is bound to.
//!
//! [`RoomConnector`] and [`Room`] are the seam between job orchestration and
//! the LiveKit transport. The shipped binding, [`LiveKitRoomConnector`],
//! joins the room as the agent participant through the LiveKit client SDK:
//! remote audio is subscribed per [`AutoSubscribe`] and mixed into one
//! frame feed, model speech plays on a published audio track, and data
//! packets go out on the local participant.

use crate::error::AgentError;
use crate::vad::AudioFrame;
use async_trait::async_trait;
use cockpit_voice::{AccessGrant, VoiceService};
use futures_util::StreamExt;
use livekit::options::TrackPublishOptions;
use livekit::track::{LocalAudioTrack, LocalTrack, RemoteTrack, TrackKind, TrackSource};
use livekit::webrtc::audio_frame::AudioFrame as RtcAudioFrame;
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::audio_source::{AudioSourceOptions, RtcAudioSource};
use livekit::webrtc::audio_stream::native::NativeAudioStream;
use livekit::{DataPacket, RoomEvent, RoomOptions};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Display name of the agent participant.
pub const AGENT_PARTICIPANT_NAME: &str = "Cockpit Agent";
/// Name of the track the agent speaks on.
pub const AGENT_TRACK_NAME: &str = "agent-voice";
/// Remote audio is resampled to this rate, mono, before reaching a session.
pub const ROOM_INPUT_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of the agent's voice track; Gemini Live speaks 24 kHz PCM16.
pub const AGENT_OUTPUT_SAMPLE_RATE: u32 = 24_000;

const AUDIO_INPUT_CAPACITY: usize = 256;
const AGENT_OUTPUT_QUEUE_MS: u32 = 1_000;

/// Which remote tracks the agent subscribes to when joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoSubscribe {
    #[default]
    AudioOnly,
    VideoOnly,
    SubscribeAll,
    SubscribeNone,
}

impl AutoSubscribe {
    /// Whether the SDK should subscribe to every track on its own.
    pub fn subscribes_all(self) -> bool {
        self == AutoSubscribe::SubscribeAll
    }

    /// Whether a remote track of `kind` should be subscribed.
    pub fn wants(self, kind: TrackKind) -> bool {
        match self {
            AutoSubscribe::AudioOnly => kind == TrackKind::Audio,
            AutoSubscribe::VideoOnly => kind == TrackKind::Video,
            AutoSubscribe::SubscribeAll => true,
            AutoSubscribe::SubscribeNone => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPublishOptions {
    pub reliable: bool,
    pub topic: Option<String>,
}

impl DataPublishOptions {
    /// Reliable delivery on `topic`.
    pub fn reliable(topic: &str) -> Self {
        Self {
            reliable: true,
            topic: Some(topic.to_string()),
        }
    }
}

/// A joined room, shared between the job and its session.
#[async_trait]
pub trait Room: Send + Sync {
    fn name(&self) -> &str;

    fn local_identity(&self) -> &str;

    async fn publish_data(
        &self,
        payload: Vec<u8>,
        options: DataPublishOptions,
    ) -> Result<(), AgentError>;

    /// Remote participant audio, mixed into one frame stream. Can be taken
    /// once; rooms without a media feed return `None`.
    fn take_audio_input(&self) -> Option<mpsc::Receiver<AudioFrame>> {
        None
    }

    /// Plays agent speech to the room. Rooms without an audio output drop it.
    async fn publish_audio(&self, _frame: AudioFrame) -> Result<(), AgentError> {
        Ok(())
    }

    /// Drops agent speech queued for playback, after a barge-in.
    fn clear_audio(&self) {}

    /// Resolves once the room connection is gone. Safe to await repeatedly.
    async fn disconnected(&self);

    async fn disconnect(&self);
}

#[async_trait]
pub trait RoomConnector: Send + Sync {
    async fn connect(
        &self,
        room: &str,
        identity: &str,
        auto_subscribe: AutoSubscribe,
    ) -> Result<Arc<dyn Room>, AgentError>;
}

/// Resolves when `state` turns true or its sender goes away.
pub(crate) async fn wait_disconnected(state: &watch::Sender<bool>) {
    let mut rx = state.subscribe();
    let _ = rx.wait_for(|gone| *gone).await;
}

fn room_error(action: &str, room: &str, e: impl std::fmt::Display) -> AgentError {
    AgentError::Room(format!("failed to {} in room {}: {}", action, room, e))
}

pub struct LiveKitRoomConnector {
    service: Arc<VoiceService>,
}

impl LiveKitRoomConnector {
    pub fn new(service: Arc<VoiceService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl RoomConnector for LiveKitRoomConnector {
    async fn connect(
        &self,
        room: &str,
        identity: &str,
        auto_subscribe: AutoSubscribe,
    ) -> Result<Arc<dyn Room>, AgentError> {
        self.service.ensure_room(room).await?;
        let grant = AccessGrant::new(room, identity).with_name(AGENT_PARTICIPANT_NAME);
        let join_token = self.service.generate_join_token(&grant)?;

        let mut options = RoomOptions::default();
        options.auto_subscribe = auto_subscribe.subscribes_all();
        let (connection, events) = livekit::Room::connect(self.service.get_url(), &join_token, options)
            .await
            .map_err(|e| room_error("join", room, e))?;

        // Tracks published before the agent joined never raise TrackPublished.
        if !auto_subscribe.subscribes_all() {
            for participant in connection.remote_participants().values() {
                for publication in participant.track_publications().values() {
                    if auto_subscribe.wants(publication.kind()) {
                        publication.set_subscribed(true);
                    }
                }
            }
        }

        let voice = NativeAudioSource::new(
            AudioSourceOptions::default(),
            AGENT_OUTPUT_SAMPLE_RATE,
            1,
            AGENT_OUTPUT_QUEUE_MS,
        );
        let track =
            LocalAudioTrack::create_audio_track(AGENT_TRACK_NAME, RtcAudioSource::Native(voice.clone()));
        let published = connection
            .local_participant()
            .publish_track(
                LocalTrack::Audio(track),
                TrackPublishOptions {
                    source: TrackSource::Microphone,
                    ..Default::default()
                },
            )
            .await;
        if let Err(e) = published {
            let _ = connection.close().await;
            return Err(room_error("publish the agent voice track", room, e));
        }

        let state = Arc::new(watch::channel(false).0);
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_INPUT_CAPACITY);
        let driver = tokio::spawn(drive_room(
            events,
            room.to_string(),
            auto_subscribe,
            audio_tx,
            Arc::clone(&state),
        ));

        info!(room, identity, auto_subscribe = ?auto_subscribe, "connected to room");

        Ok(Arc::new(LiveKitRoom {
            name: room.to_string(),
            identity: identity.to_string(),
            connection,
            voice,
            audio_input: Mutex::new(Some(audio_rx)),
            state,
            driver: Mutex::new(Some(driver)),
        }))
    }
}

/// Follows room events until the connection ends: subscribes to tracks the
/// agent wants, feeds subscribed audio into `audio`, and flips `state` once
/// the room is gone.
async fn drive_room(
    mut events: mpsc::UnboundedReceiver<RoomEvent>,
    room: String,
    auto_subscribe: AutoSubscribe,
    audio: mpsc::Sender<AudioFrame>,
    state: Arc<watch::Sender<bool>>,
) {
    let mut feeds = JoinSet::new();

    while let Some(event) = events.recv().await {
        match event {
            RoomEvent::TrackPublished {
                publication,
                participant,
            } => {
                if !auto_subscribe.subscribes_all() && auto_subscribe.wants(publication.kind()) {
                    debug!(room = %room, participant = %participant.identity(), "subscribing to track");
                    publication.set_subscribed(true);
                }
            }
            RoomEvent::TrackSubscribed {
                track: RemoteTrack::Audio(track),
                participant,
                ..
            } => {
                info!(room = %room, participant = %participant.identity(), "receiving participant audio");
                let stream =
                    NativeAudioStream::new(track.rtc_track(), ROOM_INPUT_SAMPLE_RATE as i32, 1);
                feeds.spawn(forward_audio(stream, audio.clone()));
            }
            RoomEvent::Disconnected { reason } => {
                info!(room = %room, reason = ?reason, "disconnected from room");
                break;
            }
            _ => {}
        }
    }

    state.send_replace(true);
    feeds.shutdown().await;
}

async fn forward_audio(mut stream: NativeAudioStream, audio: mpsc::Sender<AudioFrame>) {
    while let Some(frame) = stream.next().await {
        let frame = AudioFrame::new(frame.data.into_owned(), frame.sample_rate, frame.num_channels);
        if audio.send(frame).await.is_err() {
            break;
        }
    }
    stream.close();
}

/// Room handle backed by a LiveKit client connection.
pub struct LiveKitRoom {
    name: String,
    identity: String,
    connection: livekit::Room,
    voice: NativeAudioSource,
    audio_input: Mutex<Option<mpsc::Receiver<AudioFrame>>>,
    state: Arc<watch::Sender<bool>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl LiveKitRoom {
    fn stop_driver(&self) {
        let handle = self
            .driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for LiveKitRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveKitRoom")
            .field("name", &self.name)
            .field("identity", &self.identity)
            .field("disconnected", &*self.state.borrow())
            .finish()
    }
}

#[async_trait]
impl Room for LiveKitRoom {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_identity(&self) -> &str {
        &self.identity
    }

    async fn publish_data(
        &self,
        payload: Vec<u8>,
        options: DataPublishOptions,
    ) -> Result<(), AgentError> {
        if *self.state.borrow() {
            return Err(AgentError::Room(format!("room {} is disconnected", self.name)));
        }
        let packet = DataPacket {
            payload,
            topic: options.topic,
            reliable: options.reliable,
            ..Default::default()
        };
        self.connection
            .local_participant()
            .publish_data(packet)
            .await
            .map_err(|e| room_error("publish data", &self.name, e))
    }

    fn take_audio_input(&self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.audio_input
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    async fn publish_audio(&self, frame: AudioFrame) -> Result<(), AgentError> {
        if frame.sample_rate != self.voice.sample_rate() || frame.num_channels != self.voice.num_channels() {
            return Err(AgentError::Room(format!(
                "agent voice plays {} Hz x{}, got {} Hz x{}",
                self.voice.sample_rate(),
                self.voice.num_channels(),
                frame.sample_rate,
                frame.num_channels
            )));
        }
        let samples_per_channel = frame.samples_per_channel() as u32;
        let frame = RtcAudioFrame {
            data: frame.data.into(),
            sample_rate: frame.sample_rate,
            num_channels: frame.num_channels,
            samples_per_channel,
        };
        self.voice
            .capture_frame(&frame)
            .await
            .map_err(|e| room_error("play agent audio", &self.name, e))
    }

    fn clear_audio(&self) {
        self.voice.clear_buffer();
    }

    async fn disconnected(&self) {
        wait_disconnected(&self.state).await;
    }

    async fn disconnect(&self) {
        if !self.state.send_replace(true) {
            if let Err(e) = self.connection.close().await {
                warn!(room = %self.name, "failed to leave room cleanly: {}", e);
            }
            debug!(room = %self.name, "left room");
        }
        self.stop_driver();
    }
}

impl Drop for LiveKitRoom {
    fn drop(&mut self) {
        self.stop_driver();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliable_options_carry_topic() {
        let options = DataPublishOptions::reliable("chat");
        assert!(options.reliable);
        assert_eq!(options.topic.as_deref(), Some("chat"));
        assert_eq!(AutoSubscribe::default(), AutoSubscribe::AudioOnly);
    }

    #[test]
    fn auto_subscribe_picks_track_kinds() {
        assert!(AutoSubscribe::AudioOnly.wants(TrackKind::Audio));
        assert!(!AutoSubscribe::AudioOnly.wants(TrackKind::Video));
        assert!(AutoSubscribe::VideoOnly.wants(TrackKind::Video));
        assert!(!AutoSubscribe::VideoOnly.wants(TrackKind::Audio));
        assert!(AutoSubscribe::SubscribeAll.wants(TrackKind::Video));
        assert!(!AutoSubscribe::SubscribeNone.wants(TrackKind::Audio));

        assert!(AutoSubscribe::SubscribeAll.subscribes_all());
        assert!(!AutoSubscribe::AudioOnly.subscribes_all());
        assert!(!AutoSubscribe::SubscribeNone.subscribes_all());
    }

    #[tokio::test]
    async fn wait_disconnected_resolves_for_every_waiter() {
        let state = Arc::new(watch::channel(false).0);

        let first = tokio::spawn({
            let state = Arc::clone(&state);
            async move { wait_disconnected(&state).await }
        });
        let second = tokio::spawn({
            let state = Arc::clone(&state);
            async move { wait_disconnected(&state).await }
        });

        tokio::task::yield_now().await;
        state.send_replace(true);

        first.await.unwrap();
        second.await.unwrap();
        // Already disconnected: resolves immediately.
        wait_disconnected(&state).await;
    }
}
