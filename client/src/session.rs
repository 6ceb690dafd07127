//! Session coordinator.
//!
//! Owns the engine, the identity and the transport, and runs every handler on
//! one dispatch sequence: player listeners and the channel handler only push
//! [`SessionInput`]s onto a queue that [`Session::run`] drains in order.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    channel::{ChannelEvent, Transport},
    clock::Clock,
    config::ClientConfig,
    crypto::encrypt_url,
    engine::{Applied, SyncEngine, SyncEvent},
    error::SessionError,
    identity::SessionIdentity,
    locks::LockKind,
    media::{build_url, is_valid_http_url},
    player::{ListenerId, Player, PlayerEventKind},
    protocol::Message,
    utils::generate_room_id,
};

/// Work item for the dispatch sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    Player(PlayerEventKind),
    Channel(ChannelEvent),
    Exit,
}

/// What handling one input did.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Ignored,
    /// Echo of a change this session applied; propagation stops here.
    Suppressed,
    /// Observed, but peers already know.
    Unchanged,
    Broadcast,
    Fetched,
    Applied(Applied),
    Exited,
}

/// Published to the optional observer for every non-suppressed input.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Player {
        kind: PlayerEventKind,
        outcome: EventOutcome,
    },
    Remote(EventOutcome),
    Exited,
}

pub struct Session {
    identity: SessionIdentity,
    engine: SyncEngine,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    loaded_data: bool,
    listeners: Vec<ListenerId>,
    inputs: mpsc::UnboundedSender<SessionInput>,
    observer: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl Session {
    pub fn new(
        player: Arc<dyn Player>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: ClientConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionInput>) {
        let (inputs, rx) = mpsc::unbounded_channel();
        let session = Self {
            identity: SessionIdentity::default(),
            engine: SyncEngine::new(player, clock),
            transport,
            config,
            loaded_data: false,
            listeners: Vec::new(),
            inputs,
            observer: None,
        };
        (session, rx)
    }

    pub fn client_id(&self) -> &str {
        self.identity.client_id()
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn room_id(&self) -> Option<&str> {
        self.identity.room_id()
    }

    pub fn invite_url(&self) -> Option<Url> {
        self.identity.invite_url(&self.config.http_server)
    }

    /// Handle for queueing inputs from outside the dispatch sequence.
    pub fn input_sender(&self) -> mpsc::UnboundedSender<SessionInput> {
        self.inputs.clone()
    }

    /// Subscribes to session events. A later call replaces the earlier observer.
    pub fn observe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observer = Some(tx);
        rx
    }

    /// Opens a new room for `media_url` and returns its identifier.
    pub async fn create_room(&mut self, media_url: Url) -> Result<String, SessionError> {
        ensure_http(&media_url)?;
        let room_id = generate_room_id();
        self.enter_room(&room_id).await?;
        self.identity.create_room(room_id.clone(), media_url);
        info!("Created room {room_id}");
        Ok(room_id)
    }

    pub async fn join_room(
        &mut self,
        room_id: &str,
        media_url: Url,
        key: &str,
    ) -> Result<(), SessionError> {
        ensure_http(&media_url)?;
        self.enter_room(room_id).await?;
        self.identity
            .join_room(room_id.to_string(), key.to_string(), media_url);
        info!("Joined room {room_id}");
        Ok(())
    }

    async fn enter_room(&mut self, room_id: &str) -> Result<(), SessionError> {
        self.exit_room();
        self.engine.reset();
        self.loaded_data = false;

        let endpoint = self.config.room_endpoint(room_id)?;
        debug!("Connecting to {endpoint}");
        self.transport.connect(&endpoint).await?;
        Ok(())
    }

    /// Wires player events and inbound messages into the dispatch queue, then
    /// announces the room (creator) or asks for its state (joiner).
    pub fn start(&mut self) -> Result<(), SessionError> {
        if !self.identity.is_in_room() {
            return Err(SessionError::NotInRoom);
        }

        self.unsubscribe_player();
        let inputs = self.inputs.clone();
        let id = self.engine.player().subscribe(
            &PlayerEventKind::ALL,
            Arc::new(move |kind| {
                let _ = inputs.send(SessionInput::Player(kind));
            }),
        );
        self.listeners.push(id);

        let inputs = self.inputs.clone();
        self.transport.on_message(Arc::new(move |event| {
            let _ = inputs.send(SessionInput::Channel(event));
        }));
        self.transport.keep_alive();

        if self.identity.is_creator() {
            self.announce_room()?;
        } else {
            self.fetch_state(true)?;
        }
        Ok(())
    }

    /// Sends `CREATE` with the obfuscated media reference and the local state.
    fn announce_room(&mut self) -> Result<(), SessionError> {
        let (Some(media_url), Some(key)) = (self.identity.media_url(), self.identity.key()) else {
            return Err(SessionError::NotInRoom);
        };
        let url = encrypt_url(&build_url(media_url, true), key)?;
        let message = Message::Create {
            client_id: self.identity.client_id().to_string(),
            video_state: self.engine.local_state(),
            url,
        };
        self.transport.send(&message)?;
        Ok(())
    }

    /// Leaves the current room. Safe to call in any state.
    pub fn exit_room(&mut self) {
        let was_in_room = self.identity.is_in_room();
        self.identity.exit_room();
        self.unsubscribe_player();
        self.transport.close();
        if was_in_room {
            info!("Left room");
            self.publish(SessionEvent::Exited);
        }
    }

    /// Asks the room for its current state. `force` drops the held remote
    /// state first so whatever comes back is accepted.
    pub fn fetch_state(&mut self, force: bool) -> Result<bool, SessionError> {
        if !self.identity.is_in_room() {
            return Ok(false);
        }
        if force {
            self.engine.set_remote_state(None);
        }
        self.engine.arm_lock(LockKind::Sync);
        self.transport.send(&Message::Fetch {
            client_id: self.identity.client_id().to_string(),
        })?;
        Ok(true)
    }

    pub fn handle_event(&mut self, kind: PlayerEventKind) -> Result<EventOutcome, SessionError> {
        debug!(
            event = %kind,
            position = self.engine.player().current_time(),
            "player event"
        );
        if !self.identity.is_in_room() {
            self.exit_room();
            return Ok(EventOutcome::Exited);
        }

        let Some(event) = SyncEvent::from_player(kind) else {
            return self.handle_lifecycle(kind);
        };

        let locked = self.engine.is_locked_any();
        self.engine.release_lock(event.lock());
        if locked {
            debug!("Suppressed echo of {kind}");
            return Ok(EventOutcome::Suppressed);
        }

        let local = self.engine.local_state();
        if !self.engine.should_broadcast(&local, event) {
            return Ok(EventOutcome::Unchanged);
        }
        self.engine.set_remote_state(Some(local.clone()));
        self.transport.send(&Message::Sync {
            client_id: self.identity.client_id().to_string(),
            video_state: local,
        })?;
        Ok(EventOutcome::Broadcast)
    }

    fn handle_lifecycle(&mut self, kind: PlayerEventKind) -> Result<EventOutcome, SessionError> {
        match kind {
            PlayerEventKind::LoadedData => {
                if self.loaded_data {
                    return Ok(EventOutcome::Ignored);
                }
                self.loaded_data = true;
                if !self.identity.is_creator() && self.fetch_state(true)? {
                    return Ok(EventOutcome::Fetched);
                }
                Ok(EventOutcome::Ignored)
            }
            PlayerEventKind::Abort => {
                info!("Media aborted, leaving room");
                self.exit_room();
                Ok(EventOutcome::Exited)
            }
            _ => Ok(EventOutcome::Ignored),
        }
    }

    pub fn receive_message(&mut self, message: Message) -> Result<EventOutcome, SessionError> {
        if !self.identity.is_in_room() {
            self.exit_room();
            return Ok(EventOutcome::Exited);
        }
        let Message::Sync { video_state, .. } = message else {
            debug!("Ignoring {} message", message.kind());
            return Ok(EventOutcome::Ignored);
        };
        match self.engine.apply_remote_state(&video_state) {
            Ok(applied) => {
                self.engine.release_lock(LockKind::Sync);
                Ok(EventOutcome::Applied(applied))
            }
            Err(e) => {
                warn!("Leaving room: {e}");
                self.exit_room();
                Ok(EventOutcome::Exited)
            }
        }
    }

    pub fn handle_channel_event(
        &mut self,
        event: ChannelEvent,
    ) -> Result<EventOutcome, SessionError> {
        match event {
            ChannelEvent::Message(message) => self.receive_message(message),
            ChannelEvent::Reopened => {
                info!("Connection restored, refreshing room state");
                // The relay drops a room once its last member is gone.
                if self.identity.is_creator() {
                    self.announce_room()?;
                }
                if self.fetch_state(true)? {
                    Ok(EventOutcome::Fetched)
                } else {
                    Ok(EventOutcome::Ignored)
                }
            }
        }
    }

    /// Handles one queued input.
    pub fn dispatch(&mut self, input: SessionInput) -> Result<EventOutcome, SessionError> {
        match input {
            SessionInput::Player(kind) => {
                let outcome = self.handle_event(kind)?;
                if !matches!(outcome, EventOutcome::Suppressed | EventOutcome::Exited) {
                    self.publish(SessionEvent::Player {
                        kind,
                        outcome: outcome.clone(),
                    });
                }
                Ok(outcome)
            }
            SessionInput::Channel(event) => {
                let outcome = self.handle_channel_event(event)?;
                if outcome != EventOutcome::Exited {
                    self.publish(SessionEvent::Remote(outcome.clone()));
                }
                Ok(outcome)
            }
            SessionInput::Exit => {
                self.exit_room();
                Ok(EventOutcome::Exited)
            }
        }
    }

    /// Drains `inputs` until an [`SessionInput::Exit`] arrives.
    pub async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<SessionInput>) {
        while let Some(input) = inputs.recv().await {
            let exit = input == SessionInput::Exit;
            if let Err(e) = self.dispatch(input) {
                warn!("Session error: {e}");
            }
            if exit {
                break;
            }
        }
        self.exit_room();
    }

    fn unsubscribe_player(&mut self) {
        for id in self.listeners.drain(..) {
            self.engine.player().unsubscribe(id);
        }
    }

    fn publish(&self, event: SessionEvent) {
        if let Some(observer) = &self.observer {
            let _ = observer.send(event);
        }
    }
}

fn ensure_http(media_url: &Url) -> Result<(), SessionError> {
    if is_valid_http_url(media_url.as_str()) {
        Ok(())
    } else {
        Err(SessionError::InvalidMediaUrl(media_url.to_string()))
    }
}
