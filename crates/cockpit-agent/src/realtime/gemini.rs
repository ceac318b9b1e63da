//! Google Gemini Live (`BidiGenerateContent`) websocket connector.
//!
//! The connector performs the setup handshake, then hands the socket to a
//! provider task that encodes [`RealtimeCommand`]s and translates server
//! messages into [`RealtimeEvent`]s until either side closes.

use super::{
    RealtimeChannel, RealtimeCommand, RealtimeConnector, RealtimeEvent, RealtimeOptions,
    TurnDetection, REALTIME_CHANNEL_CAPACITY,
};
use crate::error::AgentError;
use crate::vad::AudioFrame;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::{SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, info, warn};

pub const GEMINI_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Rate of model speech when the blob's MIME type does not name one.
const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// How long the server may take to acknowledge the setup message.
const SETUP_TIMEOUT: Duration = Duration::from_secs(15);

mod wire {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) enum ClientMessage {
        Setup(Setup),
        RealtimeInput(RealtimeInput),
        ClientContent(ClientContent),
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Setup {
        pub model: String,
        pub generation_config: GenerationConfig,
        pub system_instruction: Content,
        pub realtime_input_config: RealtimeInputConfig,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub input_audio_transcription: Option<Empty>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub output_audio_transcription: Option<Empty>,
    }

    #[derive(Serialize, Debug)]
    pub(super) struct Empty {}

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerationConfig {
        pub response_modalities: Vec<ResponseModality>,
        pub speech_config: SpeechConfig,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "UPPERCASE")]
    pub(super) enum ResponseModality {
        Audio,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct SpeechConfig {
        pub voice_config: VoiceConfig,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct VoiceConfig {
        pub prebuilt_voice_config: PrebuiltVoiceConfig,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct PrebuiltVoiceConfig {
        pub voice_name: String,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct RealtimeInputConfig {
        pub automatic_activity_detection: AutomaticActivityDetection,
    }

    #[derive(Serialize, Debug)]
    pub(super) struct AutomaticActivityDetection {
        pub disabled: bool,
    }

    #[derive(Serialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct RealtimeInput {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub audio: Option<Blob>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub activity_start: Option<Empty>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub activity_end: Option<Empty>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Blob {
        pub mime_type: String,
        pub data: String,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ClientContent {
        pub turns: Vec<Content>,
        pub turn_complete: bool,
    }

    #[derive(Serialize, Debug)]
    pub(super) struct Content {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub role: Option<String>,
        pub parts: Vec<Part>,
    }

    #[derive(Serialize, Debug)]
    pub(super) struct Part {
        pub text: String,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerMessage {
        pub setup_complete: Option<serde_json::Value>,
        pub server_content: Option<ServerContent>,
        pub go_away: Option<GoAway>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerContent {
        pub model_turn: Option<ModelTurn>,
        pub input_transcription: Option<Transcription>,
        pub output_transcription: Option<Transcription>,
        pub turn_complete: Option<bool>,
        pub interrupted: Option<bool>,
    }

    #[derive(Deserialize, Debug, Default)]
    pub(super) struct ModelTurn {
        #[serde(default)]
        pub parts: Vec<ServerPart>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerPart {
        pub inline_data: Option<InlineData>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct InlineData {
        #[serde(default)]
        pub mime_type: String,
        #[serde(default)]
        pub data: String,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct Transcription {
        #[serde(default)]
        pub text: String,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GoAway {
        pub time_left: Option<String>,
    }
}

use wire::{ClientMessage, ServerMessage};

#[derive(Debug, Clone)]
pub struct GeminiConnector {
    endpoint: String,
}

impl Default for GeminiConnector {
    fn default() -> Self {
        Self::new(GEMINI_LIVE_ENDPOINT)
    }
}

impl GeminiConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl RealtimeConnector for GeminiConnector {
    fn provider(&self) -> &str {
        "gemini"
    }

    async fn connect(&self, options: &RealtimeOptions) -> Result<RealtimeChannel, AgentError> {
        let api_key = options.api_key.as_deref().ok_or_else(|| {
            AgentError::Realtime(
                "GOOGLE_API_KEY or GOOGLE_GENAI_API_KEY is required for the Gemini realtime model"
                    .to_string(),
            )
        })?;

        let url = format!("{}?key={}", self.endpoint, api_key);
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| AgentError::Realtime(format!("failed to connect to Gemini Live: {}", e)))?;
        info!(model = %options.model, voice = %options.voice, "connected to Gemini Live");

        let (mut sink, mut stream) = ws_stream.split();

        let setup = serde_json::to_string(&setup_message(options))
            .map_err(|e| AgentError::Realtime(e.to_string()))?;
        sink.send(WsMessage::Text(setup.into()))
            .await
            .map_err(|e| AgentError::Realtime(format!("failed to send setup: {}", e)))?;

        tokio::time::timeout(SETUP_TIMEOUT, wait_for_setup(&mut stream))
            .await
            .map_err(|_| {
                AgentError::Realtime(format!(
                    "Gemini Live setup not acknowledged within {} seconds",
                    SETUP_TIMEOUT.as_secs()
                ))
            })??;
        debug!("Gemini Live setup complete");

        let (command_tx, command_rx) = mpsc::channel(REALTIME_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(REALTIME_CHANNEL_CAPACITY);
        tokio::spawn(run_connection(sink, stream, command_rx, event_tx));

        Ok(RealtimeChannel {
            commands: command_tx,
            events: event_rx,
        })
    }
}

fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

fn setup_message(options: &RealtimeOptions) -> ClientMessage {
    let transcription = || options.transcription_enabled.then_some(wire::Empty {});

    ClientMessage::Setup(wire::Setup {
        model: model_path(&options.model),
        generation_config: wire::GenerationConfig {
            response_modalities: vec![wire::ResponseModality::Audio],
            speech_config: wire::SpeechConfig {
                voice_config: wire::VoiceConfig {
                    prebuilt_voice_config: wire::PrebuiltVoiceConfig {
                        voice_name: options.voice.clone(),
                    },
                },
            },
        },
        system_instruction: wire::Content {
            role: None,
            parts: vec![wire::Part {
                text: options.instructions.clone(),
            }],
        },
        realtime_input_config: wire::RealtimeInputConfig {
            automatic_activity_detection: wire::AutomaticActivityDetection {
                disabled: options.turn_detection == TurnDetection::Vad,
            },
        },
        input_audio_transcription: transcription(),
        output_audio_transcription: transcription(),
    })
}

fn encode_command(command: RealtimeCommand) -> Option<ClientMessage> {
    match command {
        RealtimeCommand::Audio(frame) => {
            Some(ClientMessage::RealtimeInput(wire::RealtimeInput {
                audio: Some(wire::Blob {
                    mime_type: format!("audio/pcm;rate={}", frame.sample_rate),
                    data: STANDARD.encode(frame.to_le_bytes()),
                }),
                ..Default::default()
            }))
        }
        RealtimeCommand::ActivityStart => Some(ClientMessage::RealtimeInput(wire::RealtimeInput {
            activity_start: Some(wire::Empty {}),
            ..Default::default()
        })),
        RealtimeCommand::ActivityEnd => Some(ClientMessage::RealtimeInput(wire::RealtimeInput {
            activity_end: Some(wire::Empty {}),
            ..Default::default()
        })),
        RealtimeCommand::Say(text) => Some(ClientMessage::ClientContent(wire::ClientContent {
            turns: vec![wire::Content {
                role: Some("user".to_string()),
                parts: vec![wire::Part {
                    text: format!("Say the following to the user, word for word: {}", text),
                }],
            }],
            turn_complete: true,
        })),
        RealtimeCommand::Close => None,
    }
}

/// Folds server messages into session events. Input transcripts arrive in
/// chunks; they are reported as partials and flushed as one final transcript
/// once the model starts answering or the turn completes.
#[derive(Debug, Default)]
struct EventTranslator {
    pending_input: String,
}

impl EventTranslator {
    fn translate(&mut self, message: ServerMessage) -> Vec<RealtimeEvent> {
        let mut events = Vec::new();

        if let Some(content) = message.server_content {
            if let Some(chunk) = content.input_transcription {
                if !chunk.text.is_empty() {
                    self.pending_input.push_str(&chunk.text);
                    events.push(RealtimeEvent::InputTranscription {
                        text: chunk.text,
                        is_final: false,
                    });
                }
            }

            let turn_complete = content.turn_complete == Some(true);
            if content.model_turn.is_some() || turn_complete {
                self.flush_input(&mut events);
            }

            for part in content.model_turn.into_iter().flat_map(|turn| turn.parts) {
                if let Some(frame) = part.inline_data.and_then(decode_speech) {
                    events.push(RealtimeEvent::Audio(frame));
                }
            }

            if let Some(chunk) = content.output_transcription {
                if !chunk.text.is_empty() {
                    events.push(RealtimeEvent::OutputTranscription { text: chunk.text });
                }
            }
            if content.interrupted == Some(true) {
                events.push(RealtimeEvent::Interrupted);
            }
            if turn_complete {
                events.push(RealtimeEvent::TurnComplete);
            }
        }

        if let Some(go_away) = message.go_away {
            events.push(RealtimeEvent::Error {
                message: format!(
                    "Gemini Live is ending the session (time left: {})",
                    go_away.time_left.as_deref().unwrap_or("unknown")
                ),
                recoverable: true,
            });
        }

        events
    }

    fn flush_input(&mut self, events: &mut Vec<RealtimeEvent>) {
        let transcript = self.pending_input.trim();
        if !transcript.is_empty() {
            events.push(RealtimeEvent::InputTranscription {
                text: transcript.to_string(),
                is_final: true,
            });
        }
        self.pending_input.clear();
    }
}

/// Decodes an inline PCM16 blob of model speech. Other MIME types and
/// undecodable payloads are skipped.
fn decode_speech(blob: wire::InlineData) -> Option<AudioFrame> {
    let mut params = blob.mime_type.split(';').map(str::trim);
    if params.next() != Some("audio/pcm") {
        debug!(mime_type = %blob.mime_type, "ignoring non-PCM model output");
        return None;
    }
    let sample_rate = params
        .find_map(|param| param.strip_prefix("rate="))
        .and_then(|rate| rate.parse().ok())
        .unwrap_or(OUTPUT_SAMPLE_RATE);

    match STANDARD.decode(blob.data.as_bytes()) {
        Ok(bytes) if !bytes.is_empty() => Some(AudioFrame::from_le_bytes(&bytes, sample_rate, 1)),
        Ok(_) => None,
        Err(e) => {
            warn!("dropping undecodable model audio: {}", e);
            None
        }
    }
}

fn parse_server_message(message: &WsMessage) -> Option<ServerMessage> {
    let parsed = match message {
        WsMessage::Text(text) => serde_json::from_str::<ServerMessage>(text),
        WsMessage::Binary(bytes) => serde_json::from_slice::<ServerMessage>(bytes),
        _ => return None,
    };
    match parsed {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("ignoring unparseable Gemini Live message: {}", e);
            None
        }
    }
}

async fn wait_for_setup<S>(stream: &mut S) -> Result<(), AgentError>
where
    S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        let message = message.map_err(|e| AgentError::Realtime(e.to_string()))?;
        if let WsMessage::Close(frame) = &message {
            let reason = frame
                .as_ref()
                .map(|f| f.reason.to_string())
                .unwrap_or_default();
            return Err(AgentError::Realtime(format!(
                "Gemini Live closed during setup: {}",
                reason
            )));
        }
        if parse_server_message(&message).is_some_and(|m| m.setup_complete.is_some()) {
            return Ok(());
        }
    }
    Err(AgentError::Realtime(
        "Gemini Live closed during setup".to_string(),
    ))
}

async fn run_connection<K, S>(
    mut sink: K,
    mut stream: S,
    mut commands: mpsc::Receiver<RealtimeCommand>,
    events: mpsc::Sender<RealtimeEvent>,
) where
    K: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut translator = EventTranslator::default();

    let reason = 'conn: loop {
        tokio::select! {
            command = commands.recv() => {
                let command = match command {
                    None | Some(RealtimeCommand::Close) => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break 'conn "closed by session".to_string();
                    }
                    Some(command) => command,
                };
                let Some(message) = encode_command(command) else { continue };
                let payload = match serde_json::to_string(&message) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("failed to encode Gemini Live message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::Text(payload.into())).await {
                    let _ = events
                        .send(RealtimeEvent::Error { message: e.to_string(), recoverable: false })
                        .await;
                    break 'conn format!("send failed: {}", e);
                }
            }
            incoming = stream.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        let _ = events
                            .send(RealtimeEvent::Error { message: e.to_string(), recoverable: false })
                            .await;
                        break 'conn format!("receive failed: {}", e);
                    }
                    None => break 'conn "connection closed".to_string(),
                };
                if let WsMessage::Close(frame) = &message {
                    break 'conn frame
                        .as_ref()
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "connection closed".to_string());
                }
                let Some(parsed) = parse_server_message(&message) else { continue };
                for event in translator.translate(parsed) {
                    if events.send(event).await.is_err() {
                        break 'conn "session dropped".to_string();
                    }
                }
            }
        }
    };

    debug!(reason = %reason, "Gemini Live connection finished");
    let _ = events.send(RealtimeEvent::Closed { reason }).await;
}
