//! Error types for the AMI client

use thiserror::Error;

/// Errors surfaced by [`AmiStream`](crate::AmiStream) and friends.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AmiError {
    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server answered an action with `Response: Error`.
    ///
    /// Carries the server's `Message` field. The connection stays usable.
    #[error("action failed: {message}")]
    ActionFailed { message: String },

    /// The connection was closed while the call was outstanding, or before it
    /// could be written.
    #[error("connection closed")]
    ConnectionClosed,

    /// An action was issued with an `ActionID` that is still outstanding.
    #[error("duplicate ActionID: {action_id}")]
    DuplicateActionId { action_id: String },

    /// The stream has already stopped.
    #[error("not connected")]
    NotConnected,

    /// Connect or action timeout expired.
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The server rejected the login handshake.
    #[error("login failed: {message}")]
    LoginFailed { message: String },

    /// Local protocol violation (oversized buffer, header injection, ...).
    #[error("protocol error: {message}")]
    ProtocolError { message: String },

    /// Messages were dropped because the message stream consumer fell behind.
    #[error("message queue full, messages were dropped")]
    QueueFull,
}

impl AmiError {
    pub(crate) fn protocol_error(message: impl Into<String>) -> Self {
        AmiError::ProtocolError {
            message: message.into(),
        }
    }

    /// `true` for errors that mean the connection itself is gone.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            AmiError::Io(_) | AmiError::ConnectionClosed | AmiError::NotConnected
        )
    }
}

/// Result type alias using [`AmiError`].
pub type AmiResult<T> = Result<T, AmiError>;
