use std::time::Duration;

/// Errors from the content pipeline and its object backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No backend object matches the id.
    #[error("content not found: {0}")]
    NotFound(String),

    /// A backend call did not finish in time. Whatever the backend did
    /// meanwhile, the caller sees a failure.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: &'static str, timeout: Duration },

    /// The backend refused or failed the request. Not retried here.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A content id could not be resolved to a backend id.
    #[error("invalid content id: {0}")]
    InvalidId(String),

    /// Sessions open for `r` or `w` only.
    #[error("invalid open mode: {0}")]
    InvalidMode(String),

    /// The write session was already committed or cleaned up.
    #[error("write session is closed")]
    SessionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Wrap for consumers that speak `std::io` streams.
    pub fn into_io(self) -> std::io::Error {
        match self {
            Self::Io(err) => err,
            Self::NotFound(msg) => std::io::Error::new(std::io::ErrorKind::NotFound, msg),
            other => std::io::Error::other(other),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
