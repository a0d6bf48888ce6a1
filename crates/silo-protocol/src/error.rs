use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown message type: {0}")]
    UnknownMessageType(u16),

    #[error("message range of protocol {protocol} is out of order: [{low}, {high}]")]
    InvalidMessageRange { protocol: &'static str, low: u16, high: u16 },

    #[error("unexpected message {received}: {reason}")]
    UnexpectedMessage { received: u16, reason: &'static str },

    #[error("peer public key does not match the expected key")]
    PublicKeyMismatch,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("no peer public key known; cannot initiate")]
    UnknownPeer,

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("no protocol can initiate an exchange")]
    NothingToInitiate,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] silo_crypto::CryptoError),

    #[error("framing error: {0}")]
    FramingError(String),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
