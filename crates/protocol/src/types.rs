//! Core signaling types shared by connect responses and sync-state payloads.

use serde::{Deserialize, Serialize};

/// Which of the two peer transports a message or event refers to.
///
/// Every session owns one transport per role: the publisher carries locally
/// produced media and the engine's outgoing data channels, the subscriber
/// carries remote media. The server designates one of them as "primary" in
/// [`JoinDetails`](crate::connect::JoinDetails).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalTarget {
    Publisher,
    Subscriber,
}

impl std::fmt::Display for SignalTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalTarget::Publisher => write!(f, "publisher"),
            SignalTarget::Subscriber => write!(f, "subscriber"),
        }
    }
}

/// An ICE server entry handed out by the signaling server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServerInfo {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

/// Server-pushed client policy knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Restrict candidate gathering to relay (TURN) candidates.
    #[serde(default)]
    pub force_relay: bool,
}

/// SDP kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description as carried over the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Answer, sdp: sdp.into() }
    }
}

/// A trickled ICE candidate, in the JSON shape the server expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    pub sdp_mid: String,
    pub sdp_m_line_index: i32,
    pub candidate: String,
}

/// Metadata for a data channel opened on the publisher transport.
///
/// Sent as part of [`SyncState`](crate::sync_state::SyncState) so the server
/// can re-associate channel ids after an ICE restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChannelInfo {
    pub label: String,
    pub id: u16,
}

/// A locally published track as acknowledged by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPublishedInfo {
    /// Client-generated correlation id for the publish request.
    pub cid: String,
    /// Server-assigned track sid.
    pub track_sid: String,
}

/// Server acknowledgement for a single signaling request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_id: u32,
    pub reason: ResponseReason,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseReason {
    Ok,
    NotFound,
    NotAllowed,
    LimitExceeded,
}

/// Why a session ended or is about to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    ClientInitiated,
    ServerShutdown,
    NetworkChange,
    SignalClosed,
    TransportFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_candidate_uses_camel_case_wire_shape() {
        let candidate = IceCandidateInit {
            sdp_mid: "0".to_string(),
            sdp_m_line_index: 0,
            candidate: "candidate:1 1 udp 2122260223 192.168.1.2 54400 typ host".to_string(),
        };

        let json = serde_json::to_value(&candidate).unwrap();
        assert!(json.get("sdpMid").is_some());
        assert!(json.get("sdpMLineIndex").is_some());

        let back: IceCandidateInit = serde_json::from_value(json).unwrap();
        assert_eq!(back, candidate);
    }

    #[test]
    fn session_description_tags_type_field() {
        let offer = SessionDescription::offer("v=0\r\n");
        let json = serde_json::to_value(&offer).unwrap();
        assert_eq!(json["type"], "offer");

        let answer = SessionDescription::answer("v=0\r\n");
        let json = serde_json::to_value(&answer).unwrap();
        assert_eq!(json["type"], "answer");
    }

    #[test]
    fn client_config_defaults_to_no_relay() {
        let config: ClientConfig = serde_json::from_str("{}").unwrap();
        assert!(!config.force_relay);
    }
}
