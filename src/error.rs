use thiserror::Error;

/// Errors surfaced by the receiver engine and by backend implementations.
///
/// Only construction, start-up and replay-argument failures ever reach
/// application code as `Err`. Everything that happens inside the background
/// tasks is reported as a diagnostic instead (see
/// [`ReceiverEvent::Diagnostic`](crate::ReceiverEvent::Diagnostic)).
#[derive(Error, Debug)]
pub enum ReceiverError {
    /// A required configuration value was not supplied.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Replay was asked for a window whose end lies before its start.
    #[error("invalid replay window: {0}")]
    InvalidReplayWindow(String),

    /// Transient backend failure (network error, broker error, timeout).
    ///
    /// This is the only variant the retry helper retries.
    #[error("backend error: {0}")]
    Backend(String),

    /// The backend rejected the requested offsets and the configured reset
    /// policy is `error`.
    #[error("offset out of range: {0}")]
    OffsetOutOfRange(String),

    /// The resolution token is unknown to the backend or already resolved.
    #[error("unknown resolution token: {0}")]
    UnknownToken(String),

    /// An application handler failed (returned an error or panicked).
    #[error("handler error: {0}")]
    Handler(String),

    /// The backend binding does not provide the requested capability.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// The receiver's cancellation token fired while the call was in progress.
    #[error("receiver stopped")]
    Stopped,

    /// Payload decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReceiverError {
    /// Returns `true` for failures worth retrying within the same operation.
    pub fn is_transient(&self) -> bool {
        // ---
        matches!(self, ReceiverError::Backend(_))
    }
}

/// Result type alias for receiver operations.
pub type Result<T> = std::result::Result<T, ReceiverError>;
