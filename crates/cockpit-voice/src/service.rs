use crate::config::LiveKitConfig;
use crate::error::VoiceError;
use crate::grant::AccessGrant;
use crate::url::to_http_url;
use livekit_api::access_token::{AccessToken, VideoGrants};
use livekit_api::services::room::{CreateRoomOptions, RoomClient};
use std::time::Duration;

/// Data-channel topic the browser cockpit renders as chat.
pub const CHAT_TOPIC: &str = "chat";

#[derive(Debug)]
pub struct VoiceService {
    config: LiveKitConfig,
    room_client: RoomClient,
}

impl VoiceService {
    pub fn new(config: LiveKitConfig) -> Self {
        // The room service is Twirp over HTTP; tokens only need the raw URL,
        // so an unparseable scheme is left for the room calls to report.
        let host = to_http_url(&config.url).unwrap_or_else(|_| config.url.clone());
        let room_client = RoomClient::with_api_key(&host, &config.api_key, &config.api_secret);
        Self {
            config,
            room_client,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.config.has_credentials()
    }

    pub fn get_url(&self) -> &str {
        &self.config.url
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.config.token_ttl_seconds)
    }

    /// Signs a join token for `grant`. Capabilities are always join, publish
    /// and subscribe on the granted room.
    pub fn generate_join_token(&self, grant: &AccessGrant) -> Result<String, VoiceError> {
        if !self.config.has_credentials() {
            return Err(VoiceError::MissingCredentials);
        }

        let token = AccessToken::with_api_key(&self.config.api_key, &self.config.api_secret)
            .with_identity(&grant.identity)
            .with_name(grant.display_name())
            .with_grants(VideoGrants {
                room_join: true,
                room: grant.room.clone(),
                can_publish: true,
                can_subscribe: true,
                can_publish_data: true,
                ..Default::default()
            })
            .with_ttl(self.token_ttl());

        token.to_jwt().map_err(VoiceError::LiveKit)
    }

    /// Creates the room if it does not exist yet. LiveKit returns the
    /// existing room for a repeated name.
    pub async fn ensure_room(&self, name: &str) -> Result<(), VoiceError> {
        self.room_client
            .create_room(name, CreateRoomOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| VoiceError::RoomService(e.to_string()))
    }

    pub async fn room_exists(&self, name: &str) -> Result<bool, VoiceError> {
        let rooms = self
            .room_client
            .list_rooms(vec![name.to_string()])
            .await
            .map_err(|e| VoiceError::RoomService(e.to_string()))?;
        Ok(rooms.iter().any(|room| room.name == name))
    }

    /// Names of rooms that currently hold at least one participant.
    pub async fn occupied_rooms(&self) -> Result<Vec<String>, VoiceError> {
        let rooms = self
            .room_client
            .list_rooms(Vec::new())
            .await
            .map_err(|e| VoiceError::RoomService(e.to_string()))?;
        Ok(rooms
            .into_iter()
            .filter(|room| room.num_participants > 0)
            .map(|room| room.name)
            .collect())
    }
}
