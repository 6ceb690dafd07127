use anyhow::{bail, Context, Result};
use std::time::Duration;
use url::Url;
use urlencoding::decode;

use crate::{
    crypto::decrypt_url,
    media::is_valid_http_url,
    protocol::{RoomInfo, RoomRequest},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteLink {
    pub room_id: String,
    pub key: String,
}

/// Parses `<anything>/join/<room>#<key>`.
pub fn parse_invite_url(input: &str) -> Option<InviteLink> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let url = Url::parse(trimmed).ok()?;
    let mut segments = url.path_segments()?;
    segments.find(|segment| *segment == "join")?;
    let room_id = segments
        .next()
        .filter(|s| !s.is_empty())
        .and_then(|s| decode(s).ok())
        .map(|s| s.into_owned())?;
    let key = url.fragment().filter(|k| !k.is_empty())?.to_string();

    Some(InviteLink { room_id, key })
}

/// Asks the relay for the room's obfuscated media reference and decrypts it.
pub async fn fetch_room_info(http_server: &Url, room_id: &str, key: &str) -> Result<Url> {
    let endpoint = http_server
        .join(&urlencoding::encode(room_id))
        .context("Invalid room info endpoint")?;

    let response = reqwest::Client::new()
        .post(endpoint.clone())
        .json(&RoomRequest::GetRoomInfo)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .with_context(|| format!("Failed to reach relay at {endpoint}"))?;
    if !response.status().is_success() {
        bail!("Failed to fetch room information ({})", response.status());
    }

    let info: RoomInfo = response
        .json()
        .await
        .context("Relay returned malformed room information")?;
    let media = decrypt_url(&info.url, key).context("Failed to decrypt shared media reference")?;
    if !is_valid_http_url(&media) {
        bail!("Shared media reference is not an http(s) URL");
    }
    tracing::info!("Room {room_id} is watching {media}");
    Url::parse(&media).context("Invalid shared media reference")
}
