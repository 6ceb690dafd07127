use dashmap::DashMap;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::VideoState;

pub const LOG_TAG: &str = "[SyncRoom Relay]";

/// Outbound text frames for one connected member.
pub type MemberSender = mpsc::UnboundedSender<String>;

#[derive(Default)]
pub struct Room {
    /// Obfuscated media reference announced by the creator
    pub url: Option<String>,
    /// Latest accepted state and the client that reported it
    pub state: Option<(String, VideoState)>,
    pub members: HashMap<Uuid, MemberSender>,
}

/// Shared relay state
#[derive(Clone, Default)]
pub struct RelayState {
    /// All active rooms: room_id -> Room
    pub rooms: Arc<DashMap<String, Room>>,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room_id: &str, member_id: Uuid, tx: MemberSender) {
        let mut room = self.rooms.entry(room_id.to_string()).or_default();
        room.members.insert(member_id, tx);
        tracing::info!(
            "{LOG_TAG} Member {} joined room {} ({} connected)",
            member_id,
            room_id,
            room.members.len()
        );
    }

    /// Removes a member; returns true when the room was deleted.
    pub fn leave(&self, room_id: &str, member_id: Uuid) -> bool {
        let empty = match self.rooms.get_mut(room_id) {
            Some(mut room) => {
                room.members.remove(&member_id);
                room.members.is_empty()
            }
            None => return false,
        };
        tracing::info!("{LOG_TAG} Member {} left room {}", member_id, room_id);

        if empty
            && self
                .rooms
                .remove_if(room_id, |_, room| room.members.is_empty())
                .is_some()
        {
            tracing::info!("{LOG_TAG} Room {} deleted (empty)", room_id);
            return true;
        }
        false
    }

    /// Records the creator's announcement. The url is always replaced; a
    /// state already held stays, so a creator re-announcing after a
    /// reconnect picks up what the room moved on to in the meantime.
    pub fn create(&self, room_id: &str, client_id: String, url: String, state: VideoState) {
        let mut room = self.rooms.entry(room_id.to_string()).or_default();
        let reannounced = room.url.is_some();
        room.url = Some(url);
        if room.state.is_none() {
            room.state = Some((client_id, state));
        }
        if reannounced {
            tracing::info!("{LOG_TAG} Room {} re-announced", room_id);
        } else {
            tracing::info!("{LOG_TAG} Room {} announced", room_id);
        }
    }

    pub fn current_state(&self, room_id: &str) -> Option<(String, VideoState)> {
        self.rooms.get(room_id).and_then(|room| room.state.clone())
    }

    pub fn room_url(&self, room_id: &str) -> Option<String> {
        self.rooms.get(room_id).and_then(|room| room.url.clone())
    }

    /// Stores `state` unless an older timestamp than the held one, then
    /// forwards `text` to every other member. Returns how many received it.
    pub fn sync(
        &self,
        room_id: &str,
        from: Uuid,
        client_id: String,
        state: VideoState,
        text: &str,
    ) -> usize {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return 0;
        };
        let newer = room
            .state
            .as_ref()
            .map_or(true, |(_, held)| state.timestamp >= held.timestamp);
        if newer {
            room.state = Some((client_id, state));
        }

        let mut delivered = 0;
        for (member_id, tx) in room.members.iter() {
            if *member_id != from && tx.send(text.to_string()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms
            .get(room_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(timestamp: i64, current_time: f64) -> VideoState {
        VideoState {
            id: "7288324857687883".into(),
            timestamp,
            current_time,
            paused: false,
        }
    }

    fn member(state: &RelayState, room_id: &str) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        state.join(room_id, id, tx);
        (id, rx)
    }

    #[test]
    fn create_stores_url_and_state() {
        let relay = RelayState::new();
        let (_a, _rx) = member(&relay, "room1");
        assert!(relay.current_state("room1").is_none());
        assert!(relay.room_url("room1").is_none());

        relay.create("room1", "alice".into(), "ciphertext".into(), state(1_000, 10.0));
        assert_eq!(relay.room_url("room1").as_deref(), Some("ciphertext"));
        let (from, held) = relay.current_state("room1").unwrap();
        assert_eq!(from, "alice");
        assert_eq!(held.current_time, 10.0);
    }

    #[test]
    fn sync_keeps_newest_and_forwards_to_others() {
        let relay = RelayState::new();
        let (a, mut a_rx) = member(&relay, "room1");
        let (_b, mut b_rx) = member(&relay, "room1");
        relay.create("room1", "alice".into(), "ciphertext".into(), state(1_000, 10.0));

        assert_eq!(relay.sync("room1", a, "alice".into(), state(2_000, 20.0), "newer"), 1);
        assert_eq!(b_rx.try_recv().unwrap(), "newer");
        assert!(a_rx.try_recv().is_err());

        // Older states are still forwarded but never replace the held one.
        assert_eq!(relay.sync("room1", a, "alice".into(), state(1_500, 15.0), "older"), 1);
        assert_eq!(b_rx.try_recv().unwrap(), "older");
        assert_eq!(relay.current_state("room1").unwrap().1.current_time, 20.0);
    }

    #[test]
    fn last_member_leaving_deletes_room() {
        let relay = RelayState::new();
        let (a, _a_rx) = member(&relay, "room1");
        let (b, _b_rx) = member(&relay, "room1");
        relay.create("room1", "alice".into(), "ciphertext".into(), state(1_000, 10.0));

        assert!(!relay.leave("room1", a));
        assert_eq!(relay.member_count("room1"), 1);
        assert!(relay.leave("room1", b));
        assert!(relay.rooms.get("room1").is_none());
        assert!(!relay.leave("room1", b));
    }

    #[test]
    fn reannouncing_restores_a_deleted_room() {
        let relay = RelayState::new();
        let (a, _a_rx) = member(&relay, "room1");
        relay.create("room1", "alice".into(), "ciphertext".into(), state(1_000, 10.0));
        assert!(relay.leave("room1", a));

        let (_a, _a_rx) = member(&relay, "room1");
        assert!(relay.room_url("room1").is_none());
        relay.create("room1", "alice".into(), "ciphertext".into(), state(5_000, 14.0));
        assert_eq!(relay.room_url("room1").as_deref(), Some("ciphertext"));
        assert_eq!(relay.current_state("room1").unwrap().1.current_time, 14.0);
    }

    #[test]
    fn reannouncing_a_live_room_keeps_its_state() {
        let relay = RelayState::new();
        let (_a, _a_rx) = member(&relay, "room1");
        let (b, _b_rx) = member(&relay, "room1");
        relay.create("room1", "alice".into(), "ciphertext".into(), state(1_000, 10.0));
        relay.sync("room1", b, "bob".into(), state(2_000, 42.0), "{}");

        relay.create("room1", "alice".into(), "ciphertext".into(), state(3_000, 11.0));
        let (from, held) = relay.current_state("room1").unwrap();
        assert_eq!(from, "bob");
        assert_eq!(held.current_time, 42.0);
    }

    #[test]
    fn sync_to_unknown_room_is_dropped() {
        let relay = RelayState::new();
        assert_eq!(relay.sync("nowhere", Uuid::new_v4(), "x".into(), state(1, 0.0), "{}"), 0);
        assert!(relay.rooms.is_empty());
    }
}
