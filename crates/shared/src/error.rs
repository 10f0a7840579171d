//! Shared error types for the gateway protocol and REST calls.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A gateway frame that could not be turned into something meaningful.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("opcode {0} is not valid from the gateway")]
    UnexpectedOpcode(u8),
    #[error("frame is missing `{0}`")]
    MissingField(&'static str),
    #[error("sequence went backwards: {last} -> {received}")]
    SequenceRegression { last: u64, received: u64 },
    #[error("no HELLO within {0:?}")]
    HelloTimeout(std::time::Duration),
}

/// JSON error body returned by the REST API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub message: String,
}

/// Attempt to parse a REST error body into a user-facing message.
pub fn try_error_message(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ApiErrorBody>(body).ok()?;
    let message = parsed.message.trim();
    if message.is_empty() {
        return None;
    }
    Some(message.to_string())
}

/// Failure of a one-shot REST call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

impl ApiError {
    /// Human readable message, preferring the API's own `message` field.
    pub fn message(&self) -> String {
        match self {
            ApiError::Http { body, .. } => {
                try_error_message(body).unwrap_or_else(|| self.to_string())
            }
            other => other.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Http { status: 404, .. })
    }
}

/// Rejected CDN asset arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    #[error("size must be a power of 2 between 16 and 4096, got {0}")]
    InvalidSize(u16),
    #[error("format {0} is not valid here")]
    InvalidFormat(&'static str),
    #[error("non animated avatars do not support gif format")]
    NotAnimated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_api_message() {
        let err = ApiError::Http {
            status: 404,
            body: r#"{"code":10006,"message":"Unknown Invite"}"#.into(),
        };
        assert_eq!(err.message(), "Unknown Invite");
        assert!(err.is_not_found());
    }

    #[test]
    fn falls_back_to_display() {
        let err = ApiError::Http {
            status: 502,
            body: "<html>bad gateway</html>".into(),
        };
        assert_eq!(err.message(), "HTTP 502: <html>bad gateway</html>");
    }
}
