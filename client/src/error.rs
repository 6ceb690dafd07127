use thiserror::Error;

/// Raised by the sync engine. Fatal to the current room membership.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("media mismatch: peer is watching {actual}, local media is {expected}")]
    MediaMismatch { expected: String, actual: String },
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is already connected")]
    AlreadyConnected,
    #[error("channel is not connected")]
    NotConnected,
    #[error("channel is not open")]
    NotOpen,
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("channel closed before it opened")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    #[error("player has no media loaded")]
    NotReady,
    #[error("player rejected command: {0}")]
    CommandRejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encrypt,
    #[error("ciphertext is not valid base64")]
    InvalidEncoding,
    #[error("ciphertext is too short")]
    TooShort,
    #[error("decryption failed (wrong key or corrupted data)")]
    Decrypt,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not in a room")]
    NotInRoom,
    #[error("invalid media url: {0}")]
    InvalidMediaUrl(String),
    #[error("invalid room endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
