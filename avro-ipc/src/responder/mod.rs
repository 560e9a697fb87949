//! Server side: decode a handshake and a call, dispatch it, encode the response.

mod builder;
mod handler;

use std::{collections::HashMap, sync::Arc};

use avro_ipc_schema::{
    binary::{write_long, write_string},
    decode_resolved, encode, Message, Protocol, Value,
};
use bytes::{Buf, Bytes, BytesMut};

pub use builder::ResponderBuilder;
pub use handler::{HandlerError, MessageHandler};

use crate::{
    framing::{join, read_framed_message, FramedWriter},
    handshake::{negotiate, HandshakeRequest, ProtocolCache},
    message::{CallRequest, CallResponse, Metadata},
    Configuration, Error, FramingError, Result,
};

/// The fault callers see when a handler fails in a way the protocol does not declare.
pub const INTERNAL_SERVER_ERROR: &str = "internal server error";

/// Serves the messages of one protocol.
///
/// A responder is immutable once built. Share it behind an `Arc` and call
/// [`Responder::respond`] with each request body.
pub struct Responder {
    pub(crate) protocol: Arc<Protocol>,
    pub(crate) handlers: HashMap<String, Box<dyn MessageHandler>>,
    pub(crate) cache: ProtocolCache,
    pub(crate) configuration: Configuration,
    pub(crate) writer: FramedWriter,
}

impl Responder {
    pub fn builder(protocol: impl Into<Arc<Protocol>>) -> ResponderBuilder {
        ResponderBuilder::new(protocol)
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// The largest request body [`Responder::respond`] accepts.
    pub fn max_body_length(&self) -> usize {
        self.configuration.max_body_length
    }

    /// Answer one request body: a handshake frame-message, then a call frame-message.
    ///
    /// Only a body that is not made of frame-messages, or whose handshake does not decode,
    /// is an `Err`. Everything that goes wrong with the call itself is answered with a fault
    /// the caller can read.
    pub fn respond(&self, body: Bytes) -> Result<Bytes> {
        if self.configuration.max_body_length < body.len() {
            log::warn!("{} byte body is too large", body.len());
            return Err(FramingError::BodyTooLarge {
                length: body.len(),
                max: self.configuration.max_body_length,
            }
            .into());
        }
        let max_buffer_length = self.configuration.max_buffer_length;
        let mut reader = body.reader();
        let mut handshake = join(read_framed_message(&mut reader, max_buffer_length)?);
        let handshake = HandshakeRequest::decode(&mut handshake)?;
        let (handshake_response, client_protocol) =
            negotiate(&handshake, &self.protocol, &self.cache);

        let mut encoded = Vec::new();
        handshake_response.encode(&mut encoded);
        let mut out = BytesMut::new();
        self.writer.write(&encoded, &mut out);

        let Some(client_protocol) = client_protocol else {
            log::debug!("client protocol is unknown, answering with the handshake only");
            return Ok(out.freeze());
        };
        if !reader.get_ref().has_remaining() {
            return Ok(out.freeze());
        }
        let call = join(read_framed_message(&mut reader, max_buffer_length)?);
        if call.is_empty() {
            return Ok(out.freeze());
        }

        let mut encoded = Vec::new();
        if let Some(response) = self.dispatch(&client_protocol, call) {
            response.encode(&mut encoded);
        }
        self.writer.write(&encoded, &mut out);
        Ok(out.freeze())
    }

    /// Run one call. Returns None for one-way messages.
    fn dispatch(&self, client_protocol: &Protocol, call: Bytes) -> Option<CallResponse> {
        let request = match CallRequest::decode(call) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("undecodable call: {e}");
                return Some(fault(&e.to_string()));
            }
        };
        let name = request.message_name.as_str();
        let (client_message, message) =
            match (client_protocol.message(name), self.protocol.message(name)) {
                (Some(client_message), Some(message)) => (client_message, message),
                _ => {
                    log::debug!("call for undefined message {name}");
                    return Some(fault(&Error::MessageNotDefined(name.to_string()).to_string()));
                }
            };
        let Some(handler) = self.handlers.get(name) else {
            log::warn!("call for unimplemented message {name}");
            return Some(fault(
                &Error::MessageNotImplemented(name.to_string()).to_string(),
            ));
        };

        // Parameters are written with the client's schema and read with ours.
        let mut encoded = request.parameters;
        let parameters = decode_resolved(
            client_message.request(),
            client_protocol.names(),
            message.request(),
            self.protocol.names(),
            &mut encoded,
        )
        .and_then(|parameters| {
            if encoded.has_remaining() {
                Err(avro_ipc_schema::Error::Decode(format!(
                    "{} bytes follow the parameters",
                    encoded.remaining()
                )))
            } else {
                Ok(parameters)
            }
        });
        let parameters = match parameters {
            Ok(parameters) => parameters,
            Err(e) => {
                log::warn!("undecodable parameters for {name}: {e}");
                return Some(fault(&e.to_string()));
            }
        };

        log::debug!("dispatching {name}");
        let result = handler.handle(parameters);
        if message.is_one_way() {
            if let Err(e) = result {
                log::error!("one-way message {name} failed: {e}");
            }
            return None;
        }
        Some(self.encode_result(message, result))
    }

    fn encode_result(
        &self,
        message: &Message,
        result: std::result::Result<Value, HandlerError>,
    ) -> CallResponse {
        let names = self.protocol.names();
        let mut payload = Vec::new();
        match result {
            Ok(value) => match encode(&value, message.response(), names, &mut payload) {
                Ok(()) => CallResponse {
                    metadata: Metadata::new(),
                    is_error: false,
                    payload: payload.into(),
                },
                Err(e) => {
                    log::error!("{} returned a bad response: {e}", message.name());
                    fault(INTERNAL_SERVER_ERROR)
                }
            },
            Err(HandlerError::Declared(error))
                if message
                    .declared_errors()
                    .iter()
                    .any(|declared| error.conforms(declared, names)) =>
            {
                match encode(&error, message.errors(), names, &mut payload) {
                    Ok(()) => CallResponse {
                        metadata: Metadata::new(),
                        is_error: true,
                        payload: payload.into(),
                    },
                    Err(e) => {
                        log::error!("{} raised an unencodable error: {e}", message.name());
                        fault(INTERNAL_SERVER_ERROR)
                    }
                }
            }
            Err(HandlerError::Declared(error)) => {
                log::error!("{} raised an undeclared error: {error:?}", message.name());
                fault(INTERNAL_SERVER_ERROR)
            }
            Err(HandlerError::Undeclared(e)) => {
                log::error!("{} failed: {e}", message.name());
                fault(INTERNAL_SERVER_ERROR)
            }
        }
    }
}

/// The generic fault: branch 0 of every message's error union.
fn fault(message: &str) -> CallResponse {
    let mut payload = Vec::new();
    write_long(&mut payload, 0);
    write_string(&mut payload, message);
    CallResponse {
        metadata: Metadata::new(),
        is_error: true,
        payload: payload.into(),
    }
}
