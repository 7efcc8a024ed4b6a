//! Error taxonomy for the streaming core.

use std::time::Duration;
use thiserror::Error;

use crate::protocol::ErrorNotification;

/// Missing or unusable configuration. Fatal at `start()`, never retried.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Handshake, timeout and unexpected-close failures of the analyzer link.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectionError {
    #[error("no acknowledgment within {0:?}")]
    Timeout(Duration),

    #[error("not connected")]
    NotConnected,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("gave up after {attempts} reconnection attempts")]
    PermanentlyFailed { attempts: u32 },
}

/// Capture device acquisition/start/stop failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CaptureError {
    #[error("failed to acquire capture device {device}: {reason}")]
    Acquire { device: String, reason: String },

    #[error("failed to start capture: {0}")]
    Start(String),

    #[error("failed to stop capture: {0}")]
    Stop(String),

    #[error("capture device is not acquired")]
    NotAcquired,
}

/// A fragment of a chunk could not be handed to the connection.
///
/// Fragments before the failing one have already reached the wire and are
/// not resent.
#[derive(Debug, Clone, Error, PartialEq)]
#[error(
    "chunk #{chunk_index}: fragment {} of {total_fragments} failed: {source}",
    .fragments_sent + 1
)]
pub struct TransportError {
    pub chunk_index: u64,
    pub fragments_sent: usize,
    pub total_fragments: usize,
    #[source]
    pub source: ConnectionError,
}

/// Inbound payload that could not be decoded. Logged and dropped.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProtocolError {
    #[error("message is not valid JSON: {0}")]
    NotJson(String),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("missing or mistyped field: {0}")]
    Schema(String),

    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("unexpected binary message ({0} bytes)")]
    UnexpectedBinary(usize),
}

/// Failure of a caller-facing orchestrator call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StreamError {
    #[error("a streaming session is already active")]
    AlreadyActive,

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("streaming driver has shut down")]
    Closed,
}

/// What an `AnalysisSink` is told about besides results.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("analyzer reported an error: {}", .0.message)]
    Analyzer(ErrorNotification),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl SessionError {
    /// True when the session has been torn down because of this error.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::Connection(ConnectionError::PermanentlyFailed { .. })
        )
    }
}
