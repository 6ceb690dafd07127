use parking_lot::Mutex;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc;
use url::Url;

use crate::{clock::Clock, error::PlayerError};

/// `HAVE_NOTHING`: no media data available
pub const HAVE_NOTHING: u8 = 0;
/// `HAVE_ENOUGH_DATA`: playback can proceed to the end
pub const HAVE_ENOUGH_DATA: u8 = 4;

/// Lifecycle events a player reports to its listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerEventKind {
    Play,
    Pause,
    Seeking,
    Seeked,
    LoadedData,
    LoadStart,
    Abort,
    Ended,
}

impl PlayerEventKind {
    pub const ALL: [PlayerEventKind; 8] = [
        PlayerEventKind::Play,
        PlayerEventKind::Pause,
        PlayerEventKind::Seeking,
        PlayerEventKind::Seeked,
        PlayerEventKind::LoadedData,
        PlayerEventKind::LoadStart,
        PlayerEventKind::Abort,
        PlayerEventKind::Ended,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerEventKind::Play => "play",
            PlayerEventKind::Pause => "pause",
            PlayerEventKind::Seeking => "seeking",
            PlayerEventKind::Seeked => "seeked",
            PlayerEventKind::LoadedData => "loadeddata",
            PlayerEventKind::LoadStart => "loadstart",
            PlayerEventKind::Abort => "abort",
            PlayerEventKind::Ended => "ended",
        }
    }
}

impl fmt::Display for PlayerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type EventListener = Arc<dyn Fn(PlayerEventKind) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Capability set every media backend exposes to the sync engine.
///
/// Commands return once issued; their effect is observed through the
/// matching lifecycle event, which may arrive later or not at all.
pub trait Player: Send + Sync {
    /// Playback position in seconds
    fn current_time(&self) -> f64;
    fn paused(&self) -> bool;
    /// Media length in seconds
    fn duration(&self) -> f64;
    fn ready_state(&self) -> u8;
    /// Reference of the media currently loaded
    fn media_url(&self) -> Url;
    fn play(&self) -> Result<(), PlayerError>;
    fn pause(&self) -> Result<(), PlayerError>;
    fn seek(&self, time: f64) -> Result<(), PlayerError>;
    fn subscribe(&self, kinds: &[PlayerEventKind], listener: EventListener) -> ListenerId;
    fn unsubscribe(&self, id: ListenerId);
}

struct Subscription {
    id: ListenerId,
    kinds: Vec<PlayerEventKind>,
    listener: EventListener,
}

/// Ordered listener registry shared by the player backends.
#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Subscription>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kinds: &[PlayerEventKind], listener: EventListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push(Subscription {
            id,
            kinds: kinds.to_vec(),
            listener,
        });
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners.lock().retain(|sub| sub.id != id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Calls matching listeners in registration order, outside the registry lock.
    pub fn emit(&self, kind: PlayerEventKind) {
        let targets: Vec<EventListener> = self
            .listeners
            .lock()
            .iter()
            .filter(|sub| sub.kinds.contains(&kind))
            .map(|sub| Arc::clone(&sub.listener))
            .collect();
        tracing::trace!(event = %kind, listeners = targets.len(), "player event");
        for listener in targets {
            listener(kind);
        }
    }
}

struct SimulatedState {
    media_url: Url,
    duration: f64,
    position: f64,
    anchor_ms: i64,
    paused: bool,
    ready_state: u8,
}

impl SimulatedState {
    fn position_at(&self, now: i64) -> f64 {
        if self.paused {
            return self.position;
        }
        let elapsed = (now - self.anchor_ms) as f64 / 1000.0;
        (self.position + elapsed).clamp(0.0, self.duration.max(0.0))
    }
}

/// Direct backend: an in-memory player whose position advances with the clock.
///
/// Fires events the way a media element does: `play`/`pause` only on an actual
/// state change, `seeking` then `seeked` for every seek.
pub struct SimulatedPlayer {
    clock: Arc<dyn Clock>,
    state: Mutex<SimulatedState>,
    events: EventHub,
}

impl SimulatedPlayer {
    /// A player with `media_url` already loaded, paused at zero.
    pub fn new(clock: Arc<dyn Clock>, media_url: Url, duration: f64) -> Self {
        let now = clock.now_millis();
        Self {
            clock,
            state: Mutex::new(SimulatedState {
                media_url,
                duration,
                position: 0.0,
                anchor_ms: now,
                paused: true,
                ready_state: HAVE_ENOUGH_DATA,
            }),
            events: EventHub::new(),
        }
    }

    /// Moves the playhead without firing any event.
    pub fn restore(&self, position: f64, paused: bool) {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        state.position = position.clamp(0.0, state.duration.max(0.0));
        state.anchor_ms = now;
        state.paused = paused;
    }

    pub fn load(&self, media_url: Url, duration: f64) {
        self.events.emit(PlayerEventKind::LoadStart);
        {
            let now = self.clock.now_millis();
            let mut state = self.state.lock();
            state.media_url = media_url;
            state.duration = duration;
            state.position = 0.0;
            state.anchor_ms = now;
            state.paused = true;
            state.ready_state = HAVE_ENOUGH_DATA;
        }
        self.events.emit(PlayerEventKind::LoadedData);
    }

    /// Tears down the current media, as when the page swaps the source.
    pub fn abort(&self) {
        {
            let mut state = self.state.lock();
            state.ready_state = HAVE_NOTHING;
            state.paused = true;
        }
        self.events.emit(PlayerEventKind::Abort);
    }

    /// Runs playback to the end.
    pub fn finish(&self) {
        let was_playing = {
            let now = self.clock.now_millis();
            let mut state = self.state.lock();
            let was_playing = !state.paused;
            state.position = state.duration;
            state.anchor_ms = now;
            state.paused = true;
            was_playing
        };
        if was_playing {
            self.events.emit(PlayerEventKind::Pause);
        }
        self.events.emit(PlayerEventKind::Ended);
    }

    pub fn listener_count(&self) -> usize {
        self.events.listener_count()
    }

    fn ensure_ready(&self) -> Result<(), PlayerError> {
        if self.state.lock().ready_state == HAVE_NOTHING {
            Err(PlayerError::NotReady)
        } else {
            Ok(())
        }
    }
}

impl Player for SimulatedPlayer {
    fn current_time(&self) -> f64 {
        let now = self.clock.now_millis();
        self.state.lock().position_at(now)
    }

    fn paused(&self) -> bool {
        self.state.lock().paused
    }

    fn duration(&self) -> f64 {
        self.state.lock().duration
    }

    fn ready_state(&self) -> u8 {
        self.state.lock().ready_state
    }

    fn media_url(&self) -> Url {
        self.state.lock().media_url.clone()
    }

    fn play(&self) -> Result<(), PlayerError> {
        self.ensure_ready()?;
        let changed = {
            let now = self.clock.now_millis();
            let mut state = self.state.lock();
            if state.paused {
                state.position = state.position_at(now);
                state.anchor_ms = now;
                state.paused = false;
                true
            } else {
                false
            }
        };
        if changed {
            self.events.emit(PlayerEventKind::Play);
        }
        Ok(())
    }

    fn pause(&self) -> Result<(), PlayerError> {
        let changed = {
            let now = self.clock.now_millis();
            let mut state = self.state.lock();
            if state.paused {
                false
            } else {
                state.position = state.position_at(now);
                state.anchor_ms = now;
                state.paused = true;
                true
            }
        };
        if changed {
            self.events.emit(PlayerEventKind::Pause);
        }
        Ok(())
    }

    fn seek(&self, time: f64) -> Result<(), PlayerError> {
        self.ensure_ready()?;
        {
            let now = self.clock.now_millis();
            let mut state = self.state.lock();
            state.position = time.clamp(0.0, state.duration.max(0.0));
            state.anchor_ms = now;
        }
        self.events.emit(PlayerEventKind::Seeking);
        self.events.emit(PlayerEventKind::Seeked);
        Ok(())
    }

    fn subscribe(&self, kinds: &[PlayerEventKind], listener: EventListener) -> ListenerId {
        self.events.subscribe(kinds, listener)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.events.unsubscribe(id);
    }
}

/// Command forwarded to an out-of-band control surface.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    Play,
    Pause,
    Seek { time: f64 },
}

/// Playback state as last reported by the control surface.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceSnapshot {
    pub media_url: Url,
    pub current_time: f64,
    pub duration: f64,
    pub paused: bool,
    pub ready_state: u8,
}

/// Command-relay backend for surfaces that must not be driven directly.
///
/// Reads come from the latest [`SurfaceSnapshot`]; `play`/`pause`/`seek` are
/// forwarded as [`PlayerCommand`]s to whoever bridges into the surface, and
/// the bridge reports the resulting events back through [`RelayPlayer::report`].
pub struct RelayPlayer {
    commands: mpsc::UnboundedSender<PlayerCommand>,
    snapshot: Mutex<SurfaceSnapshot>,
    events: EventHub,
}

impl RelayPlayer {
    pub fn new(initial: SurfaceSnapshot) -> (Self, mpsc::UnboundedReceiver<PlayerCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let player = Self {
            commands,
            snapshot: Mutex::new(initial),
            events: EventHub::new(),
        };
        (player, rx)
    }

    /// Records fresh surface state, then notifies listeners of `event` if given.
    pub fn report(&self, snapshot: SurfaceSnapshot, event: Option<PlayerEventKind>) {
        *self.snapshot.lock() = snapshot;
        if let Some(kind) = event {
            self.events.emit(kind);
        }
    }

    fn forward(&self, command: PlayerCommand) -> Result<(), PlayerError> {
        self.commands
            .send(command)
            .map_err(|_| PlayerError::CommandRejected("control surface bridge closed".into()))
    }
}

impl Player for RelayPlayer {
    fn current_time(&self) -> f64 {
        self.snapshot.lock().current_time
    }

    fn paused(&self) -> bool {
        self.snapshot.lock().paused
    }

    fn duration(&self) -> f64 {
        self.snapshot.lock().duration
    }

    fn ready_state(&self) -> u8 {
        self.snapshot.lock().ready_state
    }

    fn media_url(&self) -> Url {
        self.snapshot.lock().media_url.clone()
    }

    fn play(&self) -> Result<(), PlayerError> {
        self.forward(PlayerCommand::Play)
    }

    fn pause(&self) -> Result<(), PlayerError> {
        self.forward(PlayerCommand::Pause)
    }

    fn seek(&self, time: f64) -> Result<(), PlayerError> {
        self.forward(PlayerCommand::Seek { time })
    }

    fn subscribe(&self, kinds: &[PlayerEventKind], listener: EventListener) -> ListenerId {
        self.events.subscribe(kinds, listener)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.events.unsubscribe(id);
    }
}
