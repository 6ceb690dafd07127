//! Echo suppression.
//!
//! Applying a remote state on the local player fires the same player events a
//! user action would. Before issuing a command the engine arms the lock for the
//! event that command will produce; the coordinator consumes the lock when the
//! event arrives and drops the event instead of broadcasting it.

/// Window after which a timed lock stops suppressing, even if never released.
pub const LOCK_WINDOW_MS: i64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    Play,
    Pause,
    Seeking,
    Seeked,
    Sync,
}

impl LockKind {
    pub const ALL: [LockKind; 5] = [
        LockKind::Play,
        LockKind::Pause,
        LockKind::Seeking,
        LockKind::Seeked,
        LockKind::Sync,
    ];

    fn index(self) -> usize {
        match self {
            LockKind::Play => 0,
            LockKind::Pause => 1,
            LockKind::Seeking => 2,
            LockKind::Seeked => 3,
            LockKind::Sync => 4,
        }
    }

    fn initial(self) -> LockEntry {
        match self {
            LockKind::Play | LockKind::Pause => LockEntry::Latched { armed: false },
            LockKind::Seeking | LockKind::Seeked | LockKind::Sync => {
                LockEntry::Windowed { armed_at: None }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockEntry {
    /// Held until the matching event clears it.
    Latched { armed: bool },
    /// Held until cleared or until `LOCK_WINDOW_MS` has passed since arming.
    Windowed { armed_at: Option<i64> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTable {
    entries: [LockEntry; 5],
}

impl Default for LockTable {
    fn default() -> Self {
        Self {
            entries: LockKind::ALL.map(LockKind::initial),
        }
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, kind: LockKind, now: i64) {
        self.entries[kind.index()] = match kind.initial() {
            LockEntry::Latched { .. } => LockEntry::Latched { armed: true },
            LockEntry::Windowed { .. } => LockEntry::Windowed {
                armed_at: Some(now),
            },
        };
    }

    pub fn release(&mut self, kind: LockKind) {
        self.entries[kind.index()] = kind.initial();
    }

    pub fn is_locked(&self, kind: LockKind, now: i64) -> bool {
        match self.entries[kind.index()] {
            LockEntry::Latched { armed } => armed,
            LockEntry::Windowed { armed_at } => {
                armed_at.is_some_and(|at| now - at <= LOCK_WINDOW_MS)
            }
        }
    }

    pub fn is_locked_any(&self, now: i64) -> bool {
        LockKind::ALL.iter().any(|kind| self.is_locked(*kind, now))
    }
}
