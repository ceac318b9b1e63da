//! LiveKit plumbing shared by the cockpit agent worker and token server.
//!
//! Holds the LiveKit connection settings, endpoint normalization, signed
//! access grants for room participants and the room service calls the agent
//! uses to find occupied rooms. The shutdown signal both binaries wait on
//! lives here too.
//!
//! Token cryptography and room state live in LiveKit; this crate only shapes
//! requests for the `livekit-api` client.

pub mod config;
pub mod error;
pub mod grant;
pub mod service;
pub mod shutdown;
pub mod url;

pub use config::{LiveKitConfig, DEFAULT_LIVEKIT_URL};
pub use error::VoiceError;
pub use grant::AccessGrant;
pub use service::{VoiceService, CHAT_TOPIC};
pub use shutdown::shutdown_signal;
pub use url::{normalize_ws_url, to_http_url};
