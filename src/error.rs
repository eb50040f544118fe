use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use redis::{ErrorKind, RedisError};

#[derive(Debug, thiserror::Error)]
pub enum LensError {
    #[error("Could not connect to Redis server: {0}")]
    Connection(String),

    #[error("Error fetching keys: {0}")]
    Retrieval(RedisError),

    #[error("Key '{0}' not found")]
    KeyNotFound(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),
}

impl LensError {
    /// Sort a failure raised while listing keys into "could not connect"
    /// versus "could not complete listing".
    pub fn from_listing(e: RedisError) -> Self {
        if is_connectivity(&e) {
            LensError::Connection(e.to_string())
        } else {
            LensError::Retrieval(e)
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            LensError::KeyNotFound(_) => StatusCode::NOT_FOUND,
            LensError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            LensError::Connection(_) | LensError::Retrieval(_) | LensError::Redis(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for LensError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "detail": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

pub fn is_connectivity(e: &RedisError) -> bool {
    e.is_io_error()
        || e.is_connection_refusal()
        || e.is_connection_dropped()
        || e.is_timeout()
        || e.kind() == ErrorKind::AuthenticationFailed
}

/// An error reply from the server itself, e.g. a renamed or ACL-blocked command.
pub fn is_rejection(e: &RedisError) -> bool {
    matches!(e.kind(), ErrorKind::ResponseError | ErrorKind::ExtensionError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_is_not_connectivity() {
        let e = RedisError::from((
            ErrorKind::ResponseError,
            "An error was signalled by the server",
            "unknown command 'KEYS'".to_string(),
        ));
        assert!(is_rejection(&e));
        assert!(!is_connectivity(&e));
        assert!(matches!(LensError::from_listing(e), LensError::Retrieval(_)));
    }

    #[test]
    fn test_io_error_is_connectivity() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let e = RedisError::from(io);
        assert!(is_connectivity(&e));
        assert!(!is_rejection(&e));
        assert!(matches!(LensError::from_listing(e), LensError::Connection(_)));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(LensError::KeyNotFound("k".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(LensError::InvalidRequest("bad".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            LensError::Connection("down".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
