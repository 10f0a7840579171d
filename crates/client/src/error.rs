//! Client error taxonomy.

use std::sync::Arc;

use hearth_shared::{ApiError, CloseCode, ProtocolError};
use thiserror::Error;

/// Error type handlers return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The connection to the gateway failed or went away.
///
/// Always feeds the reconnect policy; callers only ever see it as the reason
/// a session ended.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection closed ({}): {reason}", .code.map_or(0, |c| c.0))]
    Closed {
        code: Option<CloseCode>,
        reason: String,
    },
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Io(String),
}

/// A registered handler returned an error or panicked.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync>),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl From<BoxError> for HandlerError {
    fn from(err: BoxError) -> Self {
        HandlerError::Failed(Arc::from(err))
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    /// Identify or resume was rejected; the client will not retry.
    #[error("authentication rejected ({code}): {reason}")]
    Auth { code: u16, reason: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("wait predicate for `{event}` panicked: {message}")]
    Predicate { event: String, message: String },
    #[error("timed out waiting for `{event}`")]
    WaitTimeout { event: String },
    #[error("cancelled: the client was closed")]
    Cancelled,
    #[error("the client has not received its initial snapshot yet")]
    NotReady,
    #[error("no live gateway connection")]
    NotConnected,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Rest(#[from] ApiError),
}

impl ClientError {
    /// Error surfaced when the gateway closes with a fatal code.
    pub fn from_fatal_close(code: CloseCode, reason: &str) -> Self {
        let reason = if reason.is_empty() {
            format!("gateway closed with {}", code.0)
        } else {
            format!("gateway closed with {}: {reason}", code.0)
        };
        if code == CloseCode::AUTHENTICATION_FAILED {
            ClientError::Auth {
                code: code.0,
                reason,
            }
        } else {
            ClientError::Config(reason)
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Auth { .. } | ClientError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_close_maps_auth_separately() {
        let auth = ClientError::from_fatal_close(CloseCode::AUTHENTICATION_FAILED, "bad token");
        assert!(matches!(&auth, ClientError::Auth { code: 4004, reason } if reason.contains("bad token")));
        assert!(auth.is_fatal());

        let intents = ClientError::from_fatal_close(CloseCode::DISALLOWED_INTENTS, "");
        assert!(matches!(&intents, ClientError::Config(r) if r.contains("4014")));
    }

    #[test]
    fn handler_error_from_boxed() {
        let boxed: BoxError = "boom".into();
        let err = HandlerError::from(boxed);
        assert_eq!(err.to_string(), "boom");
    }
}
