//! Keeps media playback in lockstep across the members of a room.
//!
//! A [`session::Session`] binds one local [`player::Player`] to a relay
//! connection ([`channel::WsChannel`]) and runs the [`engine::SyncEngine`]
//! between them.

pub mod channel;
pub mod clock;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod identity;
pub mod invite;
pub mod locks;
pub mod media;
pub mod player;
pub mod protocol;
pub mod session;
pub mod utils;

pub use channel::{ChannelEvent, ChannelOptions, ReadyState, Transport, WsChannel};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ClientConfig;
pub use engine::{Applied, Reconciliation, SyncEngine, SyncEvent};
pub use error::{ChannelError, CryptoError, PlayerError, SessionError, SyncError};
pub use player::{Player, PlayerEventKind, RelayPlayer, SimulatedPlayer};
pub use protocol::{Message, VideoState};
pub use session::{EventOutcome, Session, SessionEvent, SessionInput};
