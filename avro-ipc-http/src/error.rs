/// Result type for avro-ipc-http.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for avro-ipc-http.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error from the ipc layer
    #[error("Avro IPC error: {0}")]
    Ipc(#[from] avro_ipc::Error),
    /// The HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    /// The endpoint URL does not parse
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// Standard IO error, e.g. from the listener
    #[error("IO failure: {0}")]
    IoFailure(#[from] std::io::Error),
}
