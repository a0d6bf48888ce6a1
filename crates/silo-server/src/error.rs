use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use silo_store::StoreError;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    /// A request refused by policy. The message is shown to the client.
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] silo_protocol::ProtocolError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] silo_crypto::CryptoError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn rejected(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Rejected { status, message: message.into() }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Rejected { status, .. } => *status,
            Self::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Store(StoreError::InvalidId(_)) => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            Self::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Protocol(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing text. Internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Rejected { message, .. } => message.clone(),
            Self::Store(StoreError::NotFound(_)) => "Content not found".into(),
            Self::Store(StoreError::InvalidId(_)) => "Invalid content id".into(),
            Self::Store(StoreError::Timeout { .. }) => "Storage backend timed out".into(),
            Self::Store(StoreError::Unavailable(_)) => "Storage backend unavailable".into(),
            Self::Protocol(_) => "Protocol error".into(),
            _ => "Internal server error".into(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(json!({ "message": self.public_message() }))).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn store_errors_map_to_status() {
        let cases = [
            (StoreError::NotFound("abc".into()), StatusCode::NOT_FOUND),
            (StoreError::InvalidId("x".into()), StatusCode::BAD_REQUEST),
            (
                StoreError::Timeout { operation: "get", timeout: Duration::from_secs(1) },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (StoreError::Unavailable("down".into()), StatusCode::SERVICE_UNAVAILABLE),
            (StoreError::SessionClosed, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status(), status);
        }
    }

    #[test]
    fn internal_detail_hidden() {
        let err = ServerError::from(StoreError::Unavailable("10.0.0.7 refused connection".into()));
        assert!(!err.public_message().contains("10.0.0.7"));
        let err = ServerError::Internal("stack trace".into());
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn rejection_message_is_public() {
        let err = ServerError::rejected(StatusCode::FORBIDDEN, "nope");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.public_message(), "nope");
    }
}
