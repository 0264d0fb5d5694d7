//! Handler error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use splice_core::CoreError;

/// Error returned by handlers. The `IntoResponse` impl is the single
/// place request failures get logged.
#[derive(Debug)]
pub enum ServerError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    PayloadTooLarge(String),
    Internal(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::PayloadTooLarge(msg) => write!(f, "payload too large: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        tracing::error!(status = %status, error = %message, "request failed");
        (status, message).into_response()
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl From<CoreError> for ServerError {
    fn from(err: CoreError) -> Self {
        match &err {
            CoreError::NoChunks(_) => Self::NotFound(err.to_string()),
            CoreError::InvalidName(_)
            | CoreError::BadChunkName(_)
            | CoreError::DuplicateIndex { .. }
            | CoreError::IndexGap { .. }
            | CoreError::ChunkSizeMismatch { .. }
            | CoreError::ZeroChunkSize
            | CoreError::LayoutOverflow { .. } => Self::BadRequest(err.to_string()),
            CoreError::ChunkChanged { .. }
            | CoreError::OutputLength { .. }
            | CoreError::TaskJoin(_)
            | CoreError::Io(_) => Self::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_chunks_map_to_not_found() {
        let err = ServerError::from(CoreError::NoChunks("f".to_string()));
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[test]
    fn io_errors_map_to_internal() {
        // A chunk vanishing mid-merge is a server-side failure, not an
        // unknown file.
        let gone = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = ServerError::from(CoreError::Io(gone));
        assert!(matches!(err, ServerError::Internal(_)));
    }

    #[test]
    fn plan_errors_map_to_bad_request() {
        let err = ServerError::from(CoreError::IndexGap {
            expected: 1,
            found: 2,
        });
        assert!(matches!(err, ServerError::BadRequest(_)));
    }
}
