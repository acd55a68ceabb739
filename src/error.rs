use thiserror::Error;

/// Errors that can occur during RPC operations.
///
/// Every `call()` resolves to exactly one of: a successful payload,
/// [`Transport`](RpcError::Transport), [`Timeout`](RpcError::Timeout),
/// [`Decode`](RpcError::Decode), [`Remote`](RpcError::Remote) or
/// [`Closed`](RpcError::Closed).
#[derive(Error, Debug)]
pub enum RpcError {
    /// Publish or connection failure reported by the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// No reply observed before the deadline.
    ///
    /// The request may still have been processed by the remote side; treat
    /// this as an unknown outcome rather than a definite failure.
    #[error("request timed out")]
    Timeout,

    /// A reply payload could not be interpreted as a reply envelope.
    #[error("failed to decode payload: {0}")]
    Decode(String),

    /// The remote side reported an application-level failure.
    #[error("remote error: {0}")]
    Remote(String),

    /// The client was closed while the call was in flight.
    #[error("client closed")]
    Closed,

    /// JSON serialization of a typed request or response failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A required builder or config field was not provided.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Builder options that cannot be combined.
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),

    /// Operation not supported by the transport's mode.
    #[error("invalid mode: {0}")]
    InvalidMode(String),

    /// A freshly generated correlation id was already registered.
    #[error("duplicate correlation id: {0}")]
    DuplicateCorrelationId(String),
}

impl RpcError {
    /// True when the caller cannot know whether the remote side acted.
    pub fn is_unknown_outcome(&self) -> bool {
        // ---
        matches!(self, RpcError::Timeout)
    }
}

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;
