//! Endpoint scheme handling for the LiveKit server URL.
//!
//! Workers connect over websockets while the room service speaks plain
//! HTTP(S), and operators paste either form into `LIVEKIT_URL`.

use crate::error::VoiceError;

/// Maps an `http(s)` endpoint onto its websocket twin. `ws://` and `wss://`
/// pass through untouched; any other scheme is rejected.
pub fn normalize_ws_url(raw: &str) -> Result<String, VoiceError> {
    if raw.starts_with("ws://") || raw.starts_with("wss://") {
        return Ok(raw.to_string());
    }
    if let Some(rest) = raw.strip_prefix("https://") {
        return Ok(format!("wss://{}", rest));
    }
    if let Some(rest) = raw.strip_prefix("http://") {
        return Ok(format!("ws://{}", rest));
    }
    Err(VoiceError::InvalidUrl(raw.to_string()))
}

/// The inverse mapping, used for room service (Twirp) calls.
pub fn to_http_url(raw: &str) -> Result<String, VoiceError> {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Ok(raw.to_string());
    }
    if let Some(rest) = raw.strip_prefix("wss://") {
        return Ok(format!("https://{}", rest));
    }
    if let Some(rest) = raw.strip_prefix("ws://") {
        return Ok(format!("http://{}", rest));
    }
    Err(VoiceError::InvalidUrl(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_becomes_wss() {
        assert_eq!(
            normalize_ws_url("https://cockpit.livekit.cloud").unwrap(),
            "wss://cockpit.livekit.cloud"
        );
    }

    #[test]
    fn http_becomes_ws() {
        assert_eq!(
            normalize_ws_url("http://localhost:7880").unwrap(),
            "ws://localhost:7880"
        );
    }

    #[test]
    fn websocket_schemes_pass_through() {
        assert_eq!(normalize_ws_url("ws://host").unwrap(), "ws://host");
        assert_eq!(normalize_ws_url("wss://host/path").unwrap(), "wss://host/path");
    }

    #[test]
    fn other_schemes_are_rejected() {
        for raw in ["ftp://host", "host:7880", "", "WSS://host"] {
            let err = normalize_ws_url(raw).unwrap_err();
            assert!(matches!(err, VoiceError::InvalidUrl(_)));
            assert!(err.to_string().contains("websocket endpoint"));
        }
    }

    #[test]
    fn http_form_for_room_service() {
        assert_eq!(to_http_url("wss://host").unwrap(), "https://host");
        assert_eq!(to_http_url("ws://localhost:7880").unwrap(), "http://localhost:7880");
        assert_eq!(to_http_url("https://host").unwrap(), "https://host");
        assert!(to_http_url("udp://host").is_err());
    }
}
