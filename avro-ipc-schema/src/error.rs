/// Result type for avro-ipc-schema.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for avro-ipc-schema.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Standard IO error, e.g. while reading a protocol file
    #[error("IO failure: {0}")]
    IoFailure(#[from] std::io::Error),
    /// The protocol text is not JSON
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The JSON is well formed but does not describe a valid schema
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    /// A named type was referenced before it was defined
    #[error("Unknown type: {0}")]
    UnknownType(String),
    /// A named type was defined twice
    #[error("Duplicate type: {0}")]
    DuplicateType(String),
    /// The value does not conform to the schema it is written with
    #[error("Can not encode value: {0}")]
    Encode(String),
    /// The bytes do not decode with the schema they are read with
    #[error("Can not decode value: {0}")]
    Decode(String),
    /// The input ended in the middle of a value
    #[error("Need more bytes to decode the value")]
    Truncated,
}
