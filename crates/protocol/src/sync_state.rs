//! Sync-state payload sent during a quick reconnect.

use serde::{Deserialize, Serialize};

use crate::types::{DataChannelInfo, SessionDescription, TrackPublishedInfo};

/// Snapshot of client-side session state sent before an ICE restart so the
/// server can reconcile subscriptions, descriptions, and channel ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Local answer on the subscriber transport, when one exists.
    #[serde(default)]
    pub answer: Option<SessionDescription>,
    /// Local offer on the publisher transport, when one exists.
    #[serde(default)]
    pub offer: Option<SessionDescription>,
    /// Track sids the client is (or wants to stay) subscribed to.
    #[serde(default)]
    pub track_sids: Vec<String>,
    /// Whether `track_sids` is a subscribe list or an unsubscribe list.
    #[serde(default = "default_subscribe")]
    pub subscribe: bool,
    /// Tracks this client has published in the current session.
    #[serde(default)]
    pub publish_tracks: Vec<TrackPublishedInfo>,
    /// Publisher data channels, so the server can re-associate ids.
    #[serde(default)]
    pub data_channels: Vec<DataChannelInfo>,
}

fn default_subscribe() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sync_state_deserializes_with_subscribe_default() {
        let state: SyncState = serde_json::from_str("{}").unwrap();
        assert!(state.subscribe);
        assert!(state.track_sids.is_empty());
    }

    #[test]
    fn sync_state_round_trips() {
        let state = SyncState {
            answer: Some(SessionDescription::answer("v=0\r\n")),
            offer: None,
            track_sids: vec!["TR_a".to_string(), "TR_b".to_string()],
            subscribe: true,
            publish_tracks: vec![TrackPublishedInfo {
                cid: "cid-1".to_string(),
                track_sid: "TR_pub".to_string(),
            }],
            data_channels: vec![DataChannelInfo { label: "_reliable".to_string(), id: 1 }],
        };

        let json = serde_json::to_string(&state).unwrap();
        let back: SyncState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
