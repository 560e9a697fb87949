//! Client side: encode a call, negotiate the handshake, decode the response.

mod transceiver;

use std::sync::Arc;

use avro_ipc_schema::{decode_resolved, encode, Message, Protocol, Value};
use bytes::{Buf, Bytes, BytesMut};
use k_lock::Mutex;

pub use transceiver::{LocalTransceiver, Transceiver};

use crate::{
    framing::{join, read_framed_message, FramedWriter},
    handshake::{
        ClientHandshake, HandshakeOutcome, HandshakeRequest, HandshakeResponse, HandshakeState,
    },
    message::{CallRequest, CallResponse, Metadata},
    Configuration, Error, RemoteError, Result,
};

/// Calls the messages of a protocol through a [`Transceiver`].
///
/// The handshake state lives as long as the requestor, so only the first call (or the
/// first call after the server forgets us) pays for negotiation.
pub struct Requestor<T> {
    protocol: Arc<Protocol>,
    transceiver: T,
    handshake: Mutex<ClientHandshake>,
    configuration: Configuration,
    writer: FramedWriter,
}

impl<T: Transceiver> Requestor<T> {
    pub fn new(protocol: impl Into<Arc<Protocol>>, transceiver: T) -> Self {
        Self::with_configuration(protocol, transceiver, Configuration::default())
    }

    pub fn with_configuration(
        protocol: impl Into<Arc<Protocol>>,
        transceiver: T,
        configuration: Configuration,
    ) -> Self {
        let protocol = protocol.into();
        Self {
            handshake: Mutex::new(ClientHandshake::new(protocol.clone())),
            writer: FramedWriter::new(configuration.buffer_size),
            protocol,
            transceiver,
            configuration,
        }
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn transceiver(&self) -> &T {
        &self.transceiver
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.handshake.lock().expect("must not be poisoned").state()
    }

    /// The server's protocol, if the server told us it differs from ours.
    pub fn server_protocol(&self) -> Option<Arc<Protocol>> {
        self.handshake
            .lock()
            .expect("must not be poisoned")
            .server_protocol()
            .cloned()
    }

    /// Call `message_name` with `parameters`, a record with one field per parameter.
    ///
    /// Declared errors and faults raised by the remote side come back as
    /// `Error::Remote`. One-way messages return `Value::Null`.
    pub async fn request(&self, message_name: &str, parameters: Value) -> Result<Value> {
        let message = self
            .protocol
            .message(message_name)
            .ok_or_else(|| Error::MessageNotDefined(message_name.to_string()))?;

        let mut encoded = Vec::new();
        encode(
            &parameters,
            message.request(),
            self.protocol.names(),
            &mut encoded,
        )?;
        let mut call = Vec::new();
        CallRequest {
            metadata: Metadata::new(),
            message_name: message_name.to_string(),
            parameters: encoded.into(),
        }
        .encode(&mut call);

        // The protocol text goes with a call's retry even if another call has since
        // been accepted without it, so one call costs at most two exchanges.
        let mut with_protocol = false;
        loop {
            let (handshake_request, body) = self.frame(&call, with_protocol);
            log::trace!(
                "{message_name} to {}, {} bytes",
                self.transceiver.remote_name(),
                body.len()
            );
            let response = self.transceiver.transceive(body).await?;
            let mut reader = response.reader();
            let mut handshake = join(read_framed_message(
                &mut reader,
                self.configuration.max_buffer_length,
            )?);
            let handshake = HandshakeResponse::decode(&mut handshake)?;
            let outcome = self
                .handshake
                .lock()
                .expect("must not be poisoned")
                .handle(&handshake_request, handshake)?;
            match outcome {
                HandshakeOutcome::Retry => {
                    log::debug!(
                        "{} does not know {}, sending it",
                        self.transceiver.remote_name(),
                        self.protocol.fullname()
                    );
                    with_protocol = true;
                }
                HandshakeOutcome::Proceed => {
                    if message.is_one_way() {
                        return Ok(Value::Null);
                    }
                    let call_response = join(read_framed_message(
                        &mut reader,
                        self.configuration.max_buffer_length,
                    )?);
                    return self.read_response(message, call_response);
                }
            }
        }
    }

    fn frame(&self, call: &[u8], with_protocol: bool) -> (HandshakeRequest, Bytes) {
        let handshake = self
            .handshake
            .lock()
            .expect("must not be poisoned")
            .request(with_protocol);
        let mut encoded = Vec::new();
        handshake.encode(&mut encoded);
        let mut body = BytesMut::new();
        self.writer.write(&encoded, &mut body);
        self.writer.write(call, &mut body);
        (handshake, body.freeze())
    }

    /// The response is written with the server's schemas and read with ours.
    fn read_response(&self, message: &Message, call_response: Bytes) -> Result<Value> {
        let server_protocol = self.server_protocol().unwrap_or_else(|| self.protocol.clone());
        // A server without the message only answers with a fault, which every error
        // union reads the same way.
        let (server_message, server_names) = match server_protocol.message(message.name()) {
            Some(server_message) => (server_message, server_protocol.names()),
            None => (message, self.protocol.names()),
        };
        let names = self.protocol.names();
        let response = CallResponse::decode(call_response)?;
        let mut payload = response.payload;
        if !response.is_error {
            return Ok(decode_resolved(
                server_message.response(),
                server_names,
                message.response(),
                names,
                &mut payload,
            )?);
        }
        let error = decode_resolved(
            server_message.errors(),
            server_names,
            message.errors(),
            names,
            &mut payload,
        )?;
        match error {
            Value::String(fault) => Err(Error::Remote(RemoteError::Fault(fault))),
            declared => Err(Error::Remote(RemoteError::Declared(declared))),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    };

    use avro_ipc_schema::{Protocol, Value};
    use bytes::Bytes;
    use futures::executor::block_on;

    use super::{LocalTransceiver, Requestor, Transceiver};
    use crate::{
        handshake::HandshakeState, Error, HandlerError, Responder, ResponderBuilder, Result,
    };

    const GREETER: &str = r#"{
        "protocol": "Greeter",
        "messages": {
            "greet": {"request": [{"name": "name", "type": "string"}], "response": "string"}
        }
    }"#;

    /// Counts exchanges, so tests can see retries.
    struct CountingTransceiver {
        inner: LocalTransceiver,
        exchanges: AtomicUsize,
    }

    impl Transceiver for CountingTransceiver {
        fn remote_name(&self) -> String {
            self.inner.remote_name()
        }

        async fn transceive(&self, request: Bytes) -> Result<Bytes> {
            self.exchanges.fetch_add(1, Ordering::Relaxed);
            self.inner.transceive(request).await
        }
    }

    fn greeter(server_protocol: &str) -> Arc<Responder> {
        let mut builder = ResponderBuilder::new(Protocol::parse(server_protocol).expect("parses"));
        builder
            .register("greet", |request: Value| -> std::result::Result<Value, HandlerError> {
                let name = request.field("name").and_then(Value::as_str).unwrap_or("?");
                Ok(Value::from(format!("hello {name}")))
            })
            .expect("greet is declared");
        Arc::new(builder.build())
    }

    fn counting(responder: Arc<Responder>) -> CountingTransceiver {
        CountingTransceiver {
            inner: LocalTransceiver::new(responder),
            exchanges: AtomicUsize::new(0),
        }
    }

    #[test]
    fn same_protocol_needs_one_exchange() {
        let requestor = Requestor::new(
            Protocol::parse(GREETER).expect("parses"),
            counting(greeter(GREETER)),
        );
        assert_eq!(HandshakeState::Init, requestor.handshake_state());

        let response = block_on(requestor.request("greet", Value::record([("name", "Alex")])))
            .expect("call succeeds");
        assert_eq!(Value::from("hello Alex"), response);
        assert_eq!(1, requestor.transceiver().exchanges.load(Ordering::Relaxed));
        assert_eq!(HandshakeState::Confirmed, requestor.handshake_state());
        assert!(requestor.server_protocol().is_none());
    }

    #[test]
    fn different_protocols_negotiate_once() {
        let server_protocol = GREETER.replace(
            r#""messages": {"#,
            r#""messages": {"shout": {"request": [], "response": "null"},"#,
        );
        let requestor = Requestor::new(
            Protocol::parse(GREETER).expect("parses"),
            counting(greeter(&server_protocol)),
        );

        let response = block_on(requestor.request("greet", Value::record([("name", "Alex")])))
            .expect("call succeeds after resending the protocol");
        assert_eq!(Value::from("hello Alex"), response);
        assert_eq!(2, requestor.transceiver().exchanges.load(Ordering::Relaxed));
        assert_eq!(
            Some(Protocol::parse(&server_protocol).expect("parses").md5()),
            requestor.server_protocol().map(|p| p.md5())
        );

        let response = block_on(requestor.request("greet", Value::record([("name", "Jeff")])))
            .expect("warm call succeeds");
        assert_eq!(Value::from("hello Jeff"), response);
        assert_eq!(3, requestor.transceiver().exchanges.load(Ordering::Relaxed));

        let fresh = Requestor::new(
            Protocol::parse(GREETER).expect("parses"),
            LocalTransceiver::new(requestor.transceiver().inner.responder().clone()),
        );
        block_on(fresh.request("greet", Value::record([("name", "Sam")])))
            .expect("the server remembers the client protocol");
    }

    /// Holds the first two exchanges until both are in flight.
    struct GatedTransceiver {
        inner: LocalTransceiver,
        gate: Barrier,
        exchanges: AtomicUsize,
    }

    impl Transceiver for GatedTransceiver {
        fn remote_name(&self) -> String {
            self.inner.remote_name()
        }

        async fn transceive(&self, request: Bytes) -> Result<Bytes> {
            if self.exchanges.fetch_add(1, Ordering::SeqCst) < 2 {
                self.gate.wait();
            }
            self.inner.transceive(request).await
        }
    }

    #[test]
    fn overlapping_first_calls_both_negotiate() {
        let server_protocol = GREETER.replace(
            r#""messages": {"#,
            r#""messages": {"shout": {"request": [], "response": "null"},"#,
        );
        let requestor = Requestor::new(
            Protocol::parse(GREETER).expect("parses"),
            GatedTransceiver {
                inner: LocalTransceiver::new(greeter(&server_protocol)),
                gate: Barrier::new(2),
                exchanges: AtomicUsize::new(0),
            },
        );

        let requestor = &requestor;
        let responses: Vec<Result<Value>> = std::thread::scope(|scope| {
            let calls: Vec<_> = ["Alex", "Jeff"]
                .into_iter()
                .map(|name| {
                    scope.spawn(move || {
                        block_on(requestor.request("greet", Value::record([("name", name)])))
                    })
                })
                .collect();
            calls
                .into_iter()
                .map(|call| call.join().expect("caller does not panic"))
                .collect()
        });

        let responses: Vec<Value> = responses
            .into_iter()
            .map(|response| response.expect("each call negotiates on its own"))
            .collect();
        assert_eq!(vec![Value::from("hello Alex"), Value::from("hello Jeff")], responses);
        assert_eq!(4, requestor.transceiver().exchanges.load(Ordering::SeqCst));
    }

    #[test]
    fn responses_are_read_with_the_server_schema() {
        // The server answers with an int; this client expects a long.
        let server_protocol = r#"{
            "protocol": "Counter",
            "messages": {"count": {"request": [], "response": "int"}}
        }"#;
        let mut builder = ResponderBuilder::new(Protocol::parse(server_protocol).expect("parses"));
        builder
            .register("count", |_: Value| -> std::result::Result<Value, HandlerError> {
                Ok(Value::Int(300))
            })
            .expect("count is declared");
        let requestor = Requestor::new(
            Protocol::parse(&server_protocol.replace(r#""response": "int""#, r#""response": "long""#))
                .expect("parses"),
            LocalTransceiver::new(Arc::new(builder.build())),
        );

        let response = block_on(requestor.request("count", Value::Record(Vec::new())))
            .expect("call succeeds");
        assert_eq!(Value::Long(300), response);
    }

    #[test]
    fn transport_errors_propagate() {
        struct Unplugged;
        impl Transceiver for Unplugged {
            fn remote_name(&self) -> String {
                "unplugged".to_string()
            }

            async fn transceive(&self, _request: Bytes) -> Result<Bytes> {
                Err(Error::Transport("cable is unplugged".to_string()))
            }
        }

        let requestor = Requestor::new(Protocol::parse(GREETER).expect("parses"), Unplugged);
        assert!(matches!(
            block_on(requestor.request("greet", Value::record([("name", "Alex")]))),
            Err(Error::Transport(_))
        ));
    }

    #[test]
    fn truncated_responses_are_framing_errors() {
        struct Truncating;
        impl Transceiver for Truncating {
            fn remote_name(&self) -> String {
                "truncating".to_string()
            }

            async fn transceive(&self, _request: Bytes) -> Result<Bytes> {
                Ok(Bytes::from_static(&[0, 0, 1]))
            }
        }

        let requestor = Requestor::new(Protocol::parse(GREETER).expect("parses"), Truncating);
        assert!(matches!(
            block_on(requestor.request("greet", Value::record([("name", "Alex")]))),
            Err(Error::Framing(_))
        ));
    }
}
