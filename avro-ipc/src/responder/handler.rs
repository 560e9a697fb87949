use avro_ipc_schema::Value;

/// How a handler fails a call.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// A value of one of the message's declared error types. It is sent to the caller.
    ///
    /// A value that conforms to none of the declared errors is treated as undeclared.
    #[error("declared error {0:?}")]
    Declared(Value),
    /// Anything else. It is logged, and the caller only sees a generic fault.
    #[error("{0}")]
    Undeclared(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Wrap any error as an undeclared failure.
    pub fn undeclared(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Undeclared(error.into())
    }
}

/// Serves one message of a protocol.
///
/// The request is a record with one field per message parameter. The returned value must
/// conform to the message's response schema; one-way messages' results are discarded.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, request: Value) -> Result<Value, HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(Value) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        self(request)
    }
}
