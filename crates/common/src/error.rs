use thiserror::Error;

use crate::validation::ValidationError;

/// Error types for the dev-tunnel system
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Subscribe error: {0}")]
    SubscribeError(String),

    #[error("Publish error: {0}")]
    PublishError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Handler not found: {0}")]
    HandlerNotFound(String),

    #[error("Invocation failed: {0}")]
    InvocationFailed(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Type alias for Results using TunnelError
pub type Result<T> = std::result::Result<T, TunnelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TunnelError::InvalidMessage("test".to_string());
        assert_eq!(err.to_string(), "Invalid message format: test");

        let err = TunnelError::Timeout("subscribe public/abc".to_string());
        assert_eq!(err.to_string(), "Timeout: subscribe public/abc");

        let err = TunnelError::HandlerNotFound("src/api.handler".to_string());
        assert_eq!(err.to_string(), "Handler not found: src/api.handler");
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json");
        assert!(json_err.is_err());

        let tunnel_err: TunnelError = json_err.unwrap_err().into();
        assert!(matches!(tunnel_err, TunnelError::SerializationError(_)));
    }

    #[test]
    fn test_validation_error_is_transparent() {
        let err: TunnelError = ValidationError::InvalidChannel("a b".to_string()).into();
        assert_eq!(err.to_string(), "Invalid channel format: a b");
    }
}
