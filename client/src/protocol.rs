use serde::{Deserialize, Serialize};

/// Heartbeat payloads. They travel as bare text frames outside the JSON envelope.
pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// One observation of playback position at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoState {
    /// Content fingerprint of the media being played
    pub id: String,
    /// Wall-clock capture time, milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Position in seconds
    pub current_time: f64,
    pub paused: bool,
}

/// Messages exchanged through the relay (must match relay protocol)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    #[serde(rename_all = "camelCase")]
    Create {
        client_id: String,
        video_state: VideoState,
        url: String,
    },
    #[serde(rename_all = "camelCase")]
    Fetch { client_id: String },
    #[serde(rename_all = "camelCase")]
    Sync {
        client_id: String,
        video_state: VideoState,
    },
    /// Reserved for media reference changes; never produced or consumed by sessions.
    #[serde(rename_all = "camelCase")]
    Load { client_id: String, url: String },
}

impl Message {
    pub fn client_id(&self) -> &str {
        match self {
            Message::Create { client_id, .. }
            | Message::Fetch { client_id }
            | Message::Sync { client_id, .. }
            | Message::Load { client_id, .. } => client_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Create { .. } => "create",
            Message::Fetch { .. } => "fetch",
            Message::Sync { .. } => "sync",
            Message::Load { .. } => "load",
        }
    }
}

/// Body of the room info request sent to the relay's HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoomRequest {
    #[serde(rename = "getRoomInfo")]
    GetRoomInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    /// Obfuscated media reference
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> VideoState {
        VideoState {
            id: "42".into(),
            timestamp: 1_700_000_000_000,
            current_time: 12.5,
            paused: false,
        }
    }

    #[test]
    fn sync_uses_camel_case_envelope() {
        let msg = Message::Sync {
            client_id: "abc".into(),
            video_state: state(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "sync",
                "clientId": "abc",
                "videoState": {
                    "id": "42",
                    "timestamp": 1_700_000_000_000_i64,
                    "currentTime": 12.5,
                    "paused": false
                }
            })
        );
    }

    #[test]
    fn parses_fetch_and_create_from_peers() {
        let fetch: Message = serde_json::from_str(r#"{"type":"fetch","clientId":"b"}"#).unwrap();
        assert_eq!(fetch, Message::Fetch { client_id: "b".into() });
        assert_eq!(fetch.kind(), "fetch");

        let create: Message = serde_json::from_str(
            r#"{"type":"create","clientId":"a","url":"xyz",
                "videoState":{"id":"1","timestamp":5,"currentTime":0,"paused":true}}"#,
        )
        .unwrap();
        assert_eq!(create.client_id(), "a");
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<Message>(r#"{"type":"chat","clientId":"a"}"#).is_err());
    }

    #[test]
    fn room_request_tag() {
        let body = serde_json::to_string(&RoomRequest::GetRoomInfo).unwrap();
        assert_eq!(body, r#"{"type":"getRoomInfo"}"#);
    }
}
