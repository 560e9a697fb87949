use avro_ipc::{Error, Protocol, RemoteError, Requestor, Value};
use avro_ipc_http::HttpTransceiver;

const PROTOCOL: &str = include_str!("../protocol/messages.avpr");

/// Sends one message. The parameters are JSON, from the first argument:
///
/// `example-http-client '{"message": {"to": "Alex", "from": "Jeff", "body": "Join me for a beer?"}}'`
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let protocol = Protocol::parse(PROTOCOL)?;
    let parameters = std::env::args().nth(1).unwrap_or_else(|| {
        r#"{"message": {"to": "Alex", "from": "Jeff", "body": "Join me for a beer?"}}"#.to_string()
    });
    let send = protocol
        .message("send")
        .ok_or_else(|| Error::MessageNotDefined("send".to_string()))?;
    let parameters = Value::from_json(
        &serde_json::from_str::<serde_json::Value>(&parameters)?,
        send.request(),
        protocol.names(),
    )?;

    let transceiver = HttpTransceiver::new(
        &std::env::var("URL").unwrap_or_else(|_| "http://127.0.0.1:9000/messages".to_string()),
    )?;
    let requestor = Requestor::new(protocol, transceiver);
    match requestor.request("send", parameters).await {
        Ok(response) => log::info!("response: {response:?}"),
        Err(Error::Remote(RemoteError::Declared(error))) => log::warn!("rejected: {error:?}"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
