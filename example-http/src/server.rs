use std::sync::Arc;

use avro_ipc::{HandlerError, Protocol, ResponderBuilder, Value};
use avro_ipc_http::AvroEndpoint;

const PROTOCOL: &str = include_str!("../protocol/messages.avpr");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut builder = ResponderBuilder::new(Protocol::parse(PROTOCOL)?);
    builder.register("send", send)?;
    let router = AvroEndpoint::new("messages", Arc::new(builder.build()))
        .connect(axum::Router::new(), "/messages");

    let listener = tokio::net::TcpListener::bind(
        std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0:9000".to_string()),
    )
    .await?;
    avro_ipc_http::serve(listener, router).await?;
    Ok(())
}

/// Accepts every message, unless it is addressed to nobody.
fn send(request: Value) -> Result<Value, HandlerError> {
    let message = request
        .field("message")
        .ok_or_else(|| HandlerError::undeclared("request without a message"))?;
    let to = message.field("to").and_then(Value::as_str).unwrap_or_default();
    let from = message.field("from").and_then(Value::as_str).unwrap_or_default();
    log::info!("{from} -> {to}: {:?}", message.field("body"));

    if to.is_empty() {
        return Err(HandlerError::Declared(Value::record([(
            "reason",
            "no recipient",
        )])));
    }
    Ok(Value::from("Why, of course my good sir!"))
}
