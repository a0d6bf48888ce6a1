use thiserror::Error;

/// Errors from parsing a `Range` header.
///
/// None of these should reach a client: a request with an unusable
/// `Range` header is served as if it had none.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("not a valid range header: {0:?}")]
    Malformed(String),

    #[error("not a valid range: {0:?}")]
    InvalidToken(String),

    #[error("range start {start} is after end {end}")]
    Inverted { start: u64, end: u64 },

    #[error("wildcard range is not satisfiable")]
    Wildcard,
}

pub type RangeResult<T> = Result<T, RangeError>;
