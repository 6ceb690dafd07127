use serde::{Deserialize, Serialize};

/// Heartbeat payloads, exchanged as bare text frames.
pub const PING: &str = "ping";
pub const PONG: &str = "pong";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoState {
    pub id: String,
    pub timestamp: i64,
    pub current_time: f64,
    pub paused: bool,
}

/// Messages relayed between room members (must match client protocol)
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
    #[serde(rename_all = "camelCase")]
    Load { client_id: String, url: String },
}

/// Body of `POST /{room_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoomRequest {
    #[serde(rename = "getRoomInfo")]
    GetRoomInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub url: String,
}
