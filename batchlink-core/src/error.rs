use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure reported by the transport: either a response outside 200-299 or a
/// call that never produced a response (`status` is `None`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct TransportFailure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl TransportFailure {
    pub fn status(status: u16, body: Option<Value>) -> Self {
        TransportFailure {
            status: Some(status),
            message: format!("request failed with status {}", status),
            body,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        TransportFailure {
            status: None,
            message: message.into(),
            body: None,
        }
    }
}

/// Runtime error delivered through an operation's observable.
///
/// Cloneable so a single batch failure can be handed to every member of the
/// batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkError {
    #[error("transport error: {0}")]
    Transport(TransportFailure),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl LinkError {
    pub fn protocol(message: impl Into<String>) -> Self {
        LinkError::Protocol(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        LinkError::Decode(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        LinkError::Transport(TransportFailure::network(message))
    }

    pub fn status(status: u16, body: Option<Value>) -> Self {
        LinkError::Transport(TransportFailure::status(status, body))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LinkError::Cancelled)
    }

    /// Transport failures are reported to one-shot callers as data; every
    /// other variant is a rejection.
    pub fn as_transport(&self) -> Option<&TransportFailure> {
        match self {
            LinkError::Transport(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Decode(format!("JSON error: {}", err))
    }
}

/// Configuration fault detected while running a link chain. Returned
/// synchronously, never through an observable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("chain exhausted without a terminal link (index {index})")]
    Exhausted { index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transport_failure_display() {
        let failure = TransportFailure::status(404, Some(json!({"message": "missing"})));
        assert_eq!(failure.to_string(), "request failed with status 404");

        let failure = TransportFailure::network("connection refused");
        assert_eq!(failure.to_string(), "connection refused");
    }

    #[test]
    fn test_convenience_constructors() {
        assert!(matches!(LinkError::protocol("x"), LinkError::Protocol(_)));
        assert!(matches!(LinkError::decode("x"), LinkError::Decode(_)));
        assert!(LinkError::Cancelled.is_cancelled());

        let err = LinkError::status(500, None);
        assert_eq!(err.as_transport().and_then(|f| f.status), Some(500));
        assert!(LinkError::protocol("x").as_transport().is_none());
    }

    #[test]
    fn test_failure_serialization_skips_empty_fields() {
        let failure = TransportFailure::network("timed out");
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json, json!({"message": "timed out"}));
    }

    #[test]
    fn test_json_error_becomes_decode() {
        let err: LinkError = serde_json::from_str::<Value>("{").unwrap_err().into();
        assert!(matches!(err, LinkError::Decode(msg) if msg.starts_with("JSON error")));
    }

    #[test]
    fn test_chain_error_display() {
        let err = ChainError::Exhausted { index: 2 };
        assert!(err.to_string().contains("without a terminal link"));
    }
}
