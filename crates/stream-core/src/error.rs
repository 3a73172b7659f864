//! Error types and handling for talkstream-core
//!
//! This module defines every error a streaming session can surface and the
//! helpers used to classify them for retry and logging decisions.
//!
//! # Error Categories
//!
//! - **Network Errors** - the request never completed; the only recoverable class
//! - **Signaling Errors** - session creation or description exchange failed
//! - **Configuration Errors** - credential or descriptor problems, user-actionable
//! - **Precondition Errors** - an operation was invoked at the wrong moment
//!
//! # Handling Pattern
//!
//! ```rust,no_run
//! # use talkstream_core::{StreamClient, StreamError};
//! # async fn example(client: StreamClient) {
//! match client.connect().await {
//!     Ok(service) => println!("streaming from {}", service),
//!     Err(StreamError::InvalidConfiguration { field, reason }) => {
//!         eprintln!("fix {} in api.json: {}", field, reason);
//!     }
//!     Err(e) => eprintln!("connect failed ({}): {}", e.category(), e),
//! }
//! # }
//! ```

use thiserror::Error;

/// Result type alias for talkstream-core operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors produced by the signaling client, the transport boundary and the facade
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    /// The request could not be completed (connection refused, reset, DNS...)
    #[error("Network error: {reason}")]
    NetworkError { reason: String },

    /// Every attempt allowed by the retry policy failed at the connection level
    #[error("Max retries exceeded after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<StreamError>,
    },

    /// The service answered with a non-success status code
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The session-creation call failed
    #[error("Session creation failed: {reason}")]
    SessionCreationFailed { reason: String },

    /// Remote/local description exchange failed
    #[error("Negotiation failed: {reason}")]
    NegotiationFailed { reason: String },

    /// The bootstrap descriptor holds an unusable value
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// The bootstrap descriptor could not be read or parsed
    #[error("Failed to load configuration from {path}: {reason}")]
    ConfigurationLoad { path: String, reason: String },

    /// Operation invoked while the session is not in a state that allows it
    #[error("Precondition not met: {reason}")]
    PreconditionNotMet { reason: String },

    /// The peer transport reported a failure
    #[error("Transport error: {reason}")]
    TransportError { reason: String },

    /// The service returned a body that does not match the expected shape
    #[error("Protocol error: {reason}")]
    ProtocolError { reason: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl StreamError {
    /// Create a network error
    pub fn network_error(reason: impl Into<String>) -> Self {
        Self::NetworkError { reason: reason.into() }
    }

    /// Create a session creation error
    pub fn session_creation_failed(reason: impl Into<String>) -> Self {
        Self::SessionCreationFailed { reason: reason.into() }
    }

    /// Create a negotiation error
    pub fn negotiation_failed(reason: impl Into<String>) -> Self {
        Self::NegotiationFailed { reason: reason.into() }
    }

    /// Create a configuration error for a named field
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a precondition error
    pub fn precondition_not_met(reason: impl Into<String>) -> Self {
        Self::PreconditionNotMet { reason: reason.into() }
    }

    /// Create a transport error
    pub fn transport_error(reason: impl Into<String>) -> Self {
        Self::TransportError { reason: reason.into() }
    }

    /// Create a protocol error
    pub fn protocol_error(reason: impl Into<String>) -> Self {
        Self::ProtocolError { reason: reason.into() }
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Check if this error is worth retrying.
    ///
    /// Only connection-level failures qualify. A received error status is a
    /// well-formed answer and is handed back to the caller untouched.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StreamError::NetworkError { .. })
    }

    /// Check if the error came from the bootstrap descriptor
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            StreamError::InvalidConfiguration { .. } | StreamError::ConfigurationLoad { .. }
        )
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            StreamError::NetworkError { .. } | StreamError::RetriesExhausted { .. } => "network",

            StreamError::HttpStatus { .. } | StreamError::ProtocolError { .. } => "protocol",

            StreamError::SessionCreationFailed { .. } | StreamError::NegotiationFailed { .. } => {
                "signaling"
            }

            StreamError::InvalidConfiguration { .. } | StreamError::ConfigurationLoad { .. } => {
                "configuration"
            }

            StreamError::PreconditionNotMet { .. } => "state",

            StreamError::TransportError { .. } => "transport",

            StreamError::InternalError { .. } => "system",
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::protocol_error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn only_network_errors_are_recoverable() {
        assert!(StreamError::network_error("connection reset").is_recoverable());
        assert!(!StreamError::HttpStatus { status: 503, body: String::new() }.is_recoverable());
        assert!(!StreamError::session_creation_failed("boom").is_recoverable());
        assert!(!StreamError::invalid_configuration("key", "placeholder").is_recoverable());
    }

    #[test]
    fn exhausted_retries_expose_last_failure_as_source() {
        let err = StreamError::RetriesExhausted {
            attempts: 4,
            last: Box::new(StreamError::network_error("connection refused")),
        };

        let source = err.source().expect("source should be set");
        assert_eq!(source.to_string(), "Network error: connection refused");
        assert!(err.to_string().contains("4 attempts"));
        assert_eq!(err.category(), "network");
    }

    #[test]
    fn configuration_errors_are_flagged() {
        let err = StreamError::ConfigurationLoad {
            path: "api.json".to_string(),
            reason: "missing".to_string(),
        };
        assert!(err.is_configuration_error());
        assert_eq!(err.category(), "configuration");
        assert!(!StreamError::precondition_not_met("not ready").is_configuration_error());
    }
}
