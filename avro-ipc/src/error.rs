use avro_ipc_schema::Value;

/// Result type for avro-ipc.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for avro-ipc.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The byte stream is not a well formed frame-message
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),
    /// The message name is not declared by the protocol
    #[error("Message not defined: {0}")]
    MessageNotDefined(String),
    /// The message is declared but no handler is registered for it
    #[error("Message not implemented: {0}")]
    MessageNotImplemented(String),
    /// The remote side answered the call with an error
    #[error("Remote error: {0}")]
    Remote(RemoteError),
    /// Client and server could not agree on a protocol, even after sending the full protocol text
    #[error("Handshake mismatch: {0}")]
    HandshakeMismatch(String),
    /// A value, handshake or envelope failed to encode or decode
    #[error("Schema error: {0}")]
    Schema(#[from] avro_ipc_schema::Error),
    /// The transceiver could not exchange bytes with the remote side
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors reading a frame-message.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// The stream ended before the terminating zero-length buffer
    #[error("Stream ended in the middle of a frame")]
    Truncated,
    /// A peer declared a buffer larger than this side accepts
    #[error("Buffer of {length} bytes exceeds the maximum of {max}")]
    BufferTooLarge {
        /// Declared length
        length: usize,
        /// Configured maximum
        max: usize,
    },
    /// A whole request body is larger than this side accepts
    #[error("Body of {length} bytes exceeds the maximum of {max}")]
    BodyTooLarge {
        /// Body length
        length: usize,
        /// Configured maximum
        max: usize,
    },
    /// Standard IO error
    #[error("IO failure: {0}")]
    IoFailure(#[from] std::io::Error),
}

/// An error response from the remote side of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// One of the message's declared error types
    Declared(Value),
    /// The generic fault: undeclared failures, unknown and unimplemented messages
    Fault(String),
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Declared(value) => write!(f, "{value:?}"),
            RemoteError::Fault(message) => f.write_str(message),
        }
    }
}
