//! Synchronization engine.
//!
//! Holds the last accepted remote state and the lock table, decides whether a
//! local observation is worth broadcasting, and reconciles the local player
//! with incoming remote states.
//!
//! Ordering between peers is last-writer-wins on the capture timestamp, read
//! from each participant's own wall clock. Clock skew between participants
//! therefore shifts which state wins; that is accepted behavior.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    clock::Clock,
    error::SyncError,
    locks::{LockKind, LockTable},
    media::build_url,
    player::{Player, PlayerEventKind},
    protocol::VideoState,
    utils::fingerprint,
};

/// Positions closer than this are considered in sync.
pub const SEEK_TOLERANCE_SECS: f64 = 0.2;

/// Local player events that may need to reach peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    Play,
    Pause,
    Seeking,
    Seeked,
}

impl SyncEvent {
    pub fn from_player(kind: PlayerEventKind) -> Option<Self> {
        match kind {
            PlayerEventKind::Play => Some(SyncEvent::Play),
            PlayerEventKind::Pause => Some(SyncEvent::Pause),
            PlayerEventKind::Seeking => Some(SyncEvent::Seeking),
            PlayerEventKind::Seeked => Some(SyncEvent::Seeked),
            _ => None,
        }
    }

    /// The lock that swallows an echo of this event.
    pub fn lock(self) -> LockKind {
        match self {
            SyncEvent::Play => LockKind::Play,
            SyncEvent::Pause => LockKind::Pause,
            SyncEvent::Seeking => LockKind::Seeking,
            SyncEvent::Seeked => LockKind::Seeked,
        }
    }
}

/// Position of `state` aged to `now`.
///
/// A playing observation keeps moving after capture, so the elapsed time is
/// added and the result clamped to `[0, duration]`. Paused observations are
/// returned unchanged. An unknown (NaN) duration leaves the upper bound open.
pub fn projected_time(state: &VideoState, duration: f64, now: i64) -> f64 {
    if state.paused {
        return state.current_time;
    }
    let offset = (now - state.timestamp) as f64 / 1000.0;
    (state.current_time + offset).min(duration).max(0.0)
}

/// Player commands issued while applying a remote state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub played: bool,
    pub paused: bool,
    pub seeked_to: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// Older than the held remote state; nothing changed.
    Stale,
    Accepted(Reconciliation),
}

pub struct SyncEngine {
    player: Arc<dyn Player>,
    clock: Arc<dyn Clock>,
    remote_state: Option<VideoState>,
    locks: LockTable,
}

impl SyncEngine {
    pub fn new(player: Arc<dyn Player>, clock: Arc<dyn Clock>) -> Self {
        Self {
            player,
            clock,
            remote_state: None,
            locks: LockTable::new(),
        }
    }

    pub fn player(&self) -> &Arc<dyn Player> {
        &self.player
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Fingerprint of the media the local player has loaded.
    pub fn local_id(&self) -> String {
        fingerprint(&build_url(&self.player.media_url(), false))
    }

    pub fn local_state(&self) -> VideoState {
        VideoState {
            id: self.local_id(),
            timestamp: self.clock.now_millis(),
            current_time: self.player.current_time(),
            paused: self.player.paused(),
        }
    }

    pub fn remote_state(&self) -> Option<&VideoState> {
        self.remote_state.as_ref()
    }

    pub fn set_remote_state(&mut self, state: Option<VideoState>) {
        self.remote_state = state;
    }

    /// Forgets the held remote state and every lock; used between rooms.
    pub fn reset(&mut self) {
        self.remote_state = None;
        self.locks = LockTable::new();
    }

    pub fn arm_lock(&mut self, kind: LockKind) {
        let now = self.clock.now_millis();
        self.locks.arm(kind, now);
    }

    pub fn release_lock(&mut self, kind: LockKind) {
        self.locks.release(kind);
    }

    pub fn is_locked(&self, kind: LockKind) -> bool {
        self.locks.is_locked(kind, self.clock.now_millis())
    }

    pub fn is_locked_any(&self) -> bool {
        self.locks.is_locked_any(self.clock.now_millis())
    }

    /// Whether a locally observed `event` carries news for the room.
    pub fn should_broadcast(&self, local: &VideoState, event: SyncEvent) -> bool {
        let Some(remote) = &self.remote_state else {
            return true;
        };
        if local.timestamp < remote.timestamp {
            return false;
        }
        if remote.id != local.id {
            return false;
        }
        match event {
            SyncEvent::Play | SyncEvent::Pause => remote.paused != local.paused,
            SyncEvent::Seeking | SyncEvent::Seeked => {
                let expected = projected_time(remote, self.player.duration(), local.timestamp);
                (expected - local.current_time).abs() > SEEK_TOLERANCE_SECS
            }
        }
    }

    /// Brings the local player in line with `incoming`.
    ///
    /// Every command issued here arms the lock for the event it will fire.
    pub fn apply_remote_state(&mut self, incoming: &VideoState) -> Result<Applied, SyncError> {
        if let Some(held) = &self.remote_state {
            if incoming.timestamp < held.timestamp {
                debug!(
                    incoming = incoming.timestamp,
                    held = held.timestamp,
                    "dropping stale remote state"
                );
                return Ok(Applied::Stale);
            }
        }

        let local_id = self.local_id();
        if incoming.id != local_id {
            warn!(local = %local_id, remote = %incoming.id, "remote state is for different media");
            return Err(SyncError::MediaMismatch {
                expected: local_id,
                actual: incoming.id.clone(),
            });
        }

        self.remote_state = Some(incoming.clone());
        let mut outcome = Reconciliation::default();

        if incoming.paused != self.player.paused() {
            if incoming.paused {
                self.command_pause(&mut outcome);
            } else {
                self.command_play(&mut outcome);
            }
        } else if incoming.paused && self.is_locked(LockKind::Play) {
            // A play we issued earlier has not been observed yet.
            self.command_pause(&mut outcome);
        } else if !incoming.paused && self.is_locked(LockKind::Pause) {
            self.command_play(&mut outcome);
        }

        let now = self.clock.now_millis();
        let target = projected_time(incoming, self.player.duration(), now);
        if (target - self.player.current_time()).abs() > SEEK_TOLERANCE_SECS {
            self.locks.arm(LockKind::Seeked, now);
            self.locks.arm(LockKind::Seeking, now);
            match self.player.seek(target) {
                Ok(()) => outcome.seeked_to = Some(target),
                Err(e) => {
                    // No seek events will follow to consume the locks.
                    warn!("player refused seek to {target:.3}: {e}");
                    self.locks.release(LockKind::Seeked);
                    self.locks.release(LockKind::Seeking);
                }
            }
        }

        debug!(?outcome, "applied remote state");
        Ok(Applied::Accepted(outcome))
    }

    fn command_pause(&mut self, outcome: &mut Reconciliation) {
        let now = self.clock.now_millis();
        self.locks.arm(LockKind::Pause, now);
        self.locks.release(LockKind::Play);
        match self.player.pause() {
            Ok(()) => outcome.paused = true,
            Err(e) => {
                warn!("player refused pause: {e}");
                self.locks.release(LockKind::Pause);
            }
        }
    }

    fn command_play(&mut self, outcome: &mut Reconciliation) {
        let now = self.clock.now_millis();
        self.locks.arm(LockKind::Play, now);
        self.locks.release(LockKind::Pause);
        match self.player.play() {
            Ok(()) => outcome.played = true,
            Err(e) => {
                warn!("player refused play: {e}");
                self.locks.release(LockKind::Play);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::player::SimulatedPlayer;
    use url::Url;

    const T0: i64 = 1_700_000_000_000;
    const MEDIA: &str = "https://media.example.com/films/intro.mp4";

    struct Fixture {
        clock: Arc<ManualClock>,
        player: Arc<SimulatedPlayer>,
        engine: SyncEngine,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(T0));
        let player = Arc::new(SimulatedPlayer::new(
            clock.clone(),
            Url::parse(MEDIA).unwrap(),
            600.0,
        ));
        let engine = SyncEngine::new(player.clone(), clock.clone());
        Fixture {
            clock,
            player,
            engine,
        }
    }

    fn state(timestamp: i64, current_time: f64, paused: bool) -> VideoState {
        VideoState {
            id: fingerprint(MEDIA),
            timestamp,
            current_time,
            paused,
        }
    }

    #[test]
    fn projection_ages_only_playing_states() {
        let playing = state(T0, 10.0, false);
        assert!((projected_time(&playing, 600.0, T0 + 2_000) - 12.0).abs() < 1e-9);
        assert_eq!(projected_time(&playing, 11.0, T0 + 2_000), 11.0);
        assert_eq!(projected_time(&playing, 600.0, T0 - 20_000), 0.0);

        let paused = state(T0, 10.0, true);
        assert_eq!(projected_time(&paused, 600.0, T0 + 60_000), 10.0);
    }

    #[test]
    fn local_state_fingerprints_canonical_url() {
        let f = fixture();
        let local = f.engine.local_state();
        assert_eq!(local.id, "7288324857687883");
        assert_eq!(local.timestamp, T0);
        assert!(local.paused);
    }

    #[test]
    fn newer_state_is_accepted_and_older_is_ignored() {
        let mut f = fixture();
        let a = state(T0, 5.0, true);
        let b = state(T0 + 1_000, 8.0, true);

        assert!(matches!(f.engine.apply_remote_state(&a), Ok(Applied::Accepted(_))));
        assert!(matches!(f.engine.apply_remote_state(&b), Ok(Applied::Accepted(_))));
        assert_eq!(f.engine.remote_state(), Some(&b));

        let position = f.player.current_time();
        assert_eq!(f.engine.apply_remote_state(&a), Ok(Applied::Stale));
        assert_eq!(f.engine.remote_state(), Some(&b));
        assert_eq!(f.player.current_time(), position);
    }

    #[test]
    fn equal_timestamp_is_accepted() {
        let mut f = fixture();
        let a = state(T0, 5.0, true);
        f.engine.apply_remote_state(&a).unwrap();
        let again = state(T0, 50.0, true);
        assert!(matches!(
            f.engine.apply_remote_state(&again),
            Ok(Applied::Accepted(_))
        ));
    }

    #[test]
    fn mismatched_fingerprint_fails_without_mutation() {
        let mut f = fixture();
        let mut foreign = state(T0, 1.0, false);
        foreign.id = fingerprint("https://media.example.com/films/other.mp4");
        assert!(matches!(
            f.engine.apply_remote_state(&foreign),
            Err(SyncError::MediaMismatch { .. })
        ));
        assert_eq!(f.engine.remote_state(), None);

        let held = state(T0, 1.0, true);
        f.engine.apply_remote_state(&held).unwrap();
        foreign.timestamp = T0 + 10;
        assert!(f.engine.apply_remote_state(&foreign).is_err());
        assert_eq!(f.engine.remote_state(), Some(&held));
        assert!(f.player.paused());
    }

    #[test]
    fn remote_pause_arms_pause_lock() {
        let mut f = fixture();
        f.player.restore(20.0, false);
        let outcome = f.engine.apply_remote_state(&state(T0, 20.0, true)).unwrap();
        assert_eq!(
            outcome,
            Applied::Accepted(Reconciliation {
                paused: true,
                ..Reconciliation::default()
            })
        );
        assert!(f.player.paused());
        assert!(f.engine.is_locked(LockKind::Pause));
        assert!(!f.engine.is_locked(LockKind::Play));
    }

    #[test]
    fn pending_local_play_is_undone_when_remote_is_paused() {
        let mut f = fixture();
        f.engine.arm_lock(LockKind::Play);
        let outcome = f.engine.apply_remote_state(&state(T0, 0.0, true)).unwrap();
        assert!(matches!(outcome, Applied::Accepted(Reconciliation { paused: true, .. })));
        assert!(f.engine.is_locked(LockKind::Pause));
        assert!(!f.engine.is_locked(LockKind::Play));
    }

    #[test]
    fn drift_beyond_tolerance_seeks_and_arms_both_seek_locks() {
        let mut f = fixture();
        f.player.restore(10.0, true);

        let near = state(T0, 10.15, true);
        let outcome = f.engine.apply_remote_state(&near).unwrap();
        assert_eq!(outcome, Applied::Accepted(Reconciliation::default()));
        assert!(!f.engine.is_locked_any());

        let far = state(T0 + 1, 30.0, true);
        let outcome = f.engine.apply_remote_state(&far).unwrap();
        assert!(matches!(
            outcome,
            Applied::Accepted(Reconciliation { seeked_to: Some(t), .. }) if (t - 30.0).abs() < 1e-9
        ));
        assert!(f.engine.is_locked(LockKind::Seeking));
        assert!(f.engine.is_locked(LockKind::Seeked));
        assert!((f.player.current_time() - 30.0).abs() < 1e-9);

        f.clock.advance(5_001);
        assert!(!f.engine.is_locked_any());
    }

    #[test]
    fn refused_commands_leave_no_lock_behind() {
        let mut f = fixture();
        f.player.abort();

        let outcome = f.engine.apply_remote_state(&state(T0, 30.0, false)).unwrap();
        assert_eq!(outcome, Applied::Accepted(Reconciliation::default()));
        assert!(!f.engine.is_locked(LockKind::Play));
        assert!(!f.engine.is_locked(LockKind::Seeking));
        assert!(!f.engine.is_locked(LockKind::Seeked));
        assert!(!f.engine.is_locked_any());
        // The state is still held for the next attempt.
        assert_eq!(f.engine.remote_state(), Some(&state(T0, 30.0, false)));
    }

    #[test]
    fn broadcast_when_nothing_is_held() {
        let f = fixture();
        let local = f.engine.local_state();
        assert!(f.engine.should_broadcast(&local, SyncEvent::Seeking));
        assert!(f.engine.should_broadcast(&local, SyncEvent::Play));
    }

    #[test]
    fn broadcast_gates_on_age_media_and_change() {
        let mut f = fixture();
        f.engine.set_remote_state(Some(state(T0, 10.0, true)));

        let mut older = state(T0 - 1, 40.0, false);
        assert!(!f.engine.should_broadcast(&older, SyncEvent::Play));
        older.timestamp = T0 + 1;
        older.id = "1".into();
        assert!(!f.engine.should_broadcast(&older, SyncEvent::Play));

        assert!(f.engine.should_broadcast(&state(T0 + 5, 10.0, false), SyncEvent::Play));
        assert!(!f.engine.should_broadcast(&state(T0 + 5, 10.0, true), SyncEvent::Pause));
    }

    #[test]
    fn seek_broadcast_uses_tolerance() {
        let mut f = fixture();
        f.engine.set_remote_state(Some(state(T0, 10.0, false)));

        // Remote projects to 12.0 two seconds later.
        let close = state(T0 + 2_000, 12.2, false);
        assert!(!f.engine.should_broadcast(&close, SyncEvent::Seeking));
        assert!(!f.engine.should_broadcast(&close, SyncEvent::Seeked));

        let far = state(T0 + 2_000, 12.25, false);
        assert!(f.engine.should_broadcast(&far, SyncEvent::Seeking));
        assert!(f.engine.should_broadcast(&far, SyncEvent::Seeked));
    }
}
