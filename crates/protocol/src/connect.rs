//! Connect and reconnect response shapes.

use serde::{Deserialize, Serialize};

use crate::types::{ClientConfig, IceServerInfo};

/// Payload of a successful initial connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinDetails {
    pub session_id: String,
    pub ice_servers: Vec<IceServerInfo>,
    #[serde(default)]
    pub client_config: Option<ClientConfig>,
    /// When set, the subscriber transport carries the primary connectivity
    /// signal and the server opens the first offer.
    #[serde(default)]
    pub subscriber_primary: bool,
    #[serde(default)]
    pub fast_publish: bool,
}

/// Payload of a successful reconnect handshake.
///
/// The server may rotate ICE servers between attempts; the engine reapplies
/// them to the existing transports without recreating them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectDetails {
    pub ice_servers: Vec<IceServerInfo>,
    #[serde(default)]
    pub client_config: Option<ClientConfig>,
}

/// What the signaling server answered a connect call with.
///
/// A connect in reconnect mode yields `Reconnect`; an initial connect yields
/// `Join`. The engine treats a mismatched variant as a signaling error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectResponse {
    Join(JoinDetails),
    Reconnect(ReconnectDetails),
}

impl ConnectResponse {
    pub fn as_join(&self) -> Option<&JoinDetails> {
        match self {
            ConnectResponse::Join(details) => Some(details),
            ConnectResponse::Reconnect(_) => None,
        }
    }

    pub fn as_reconnect(&self) -> Option<&ReconnectDetails> {
        match self {
            ConnectResponse::Reconnect(details) => Some(details),
            ConnectResponse::Join(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_response_round_trips() {
        let response = ConnectResponse::Join(JoinDetails {
            session_id: "RM_abc123".to_string(),
            ice_servers: vec![IceServerInfo {
                urls: vec!["stun:stun.example.com:3478".to_string()],
                ..Default::default()
            }],
            client_config: Some(ClientConfig { force_relay: true }),
            subscriber_primary: true,
            fast_publish: false,
        });

        let json = serde_json::to_string(&response).unwrap();
        let back: ConnectResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, response);
        assert!(back.as_join().is_some());
        assert!(back.as_reconnect().is_none());
    }
}
