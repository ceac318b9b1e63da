use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("LiveKit API error: {0}")]
    LiveKit(#[from] livekit_api::access_token::AccessTokenError),

    #[error("Room service error: {0}")]
    RoomService(String),

    #[error("Missing LIVEKIT_API_KEY or LIVEKIT_API_SECRET")]
    MissingCredentials,

    #[error("LIVEKIT_URL must be a websocket endpoint (wss://...). Received: {0}")]
    InvalidUrl(String),
}
