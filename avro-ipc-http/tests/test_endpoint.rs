use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use avro_ipc::{
    Configuration, Error, HandlerError, Protocol, RemoteError, Requestor, Responder,
    ResponderBuilder, Value,
};
use avro_ipc_http::{serve, test_client, AvroEndpoint, HttpTransceiver, AVRO_CONTENT_TYPE};
use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    Router,
};
use tower::ServiceExt;

const AVRO_FILE: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/avro_schema/test_avro_schema.avpr"
);

const EXPECTED_TO: &str = "Alex";
const EXPECTED_FROM: &str = "Jeff";
const EXPECTED_BODY: &str = "Join me for a beer?";
const EXPECTED_RESPONSE: &str = "Why, of course my good sir!";

fn test_message(to: &str) -> Value {
    Value::record([(
        "message",
        Value::record([("to", to), ("from", EXPECTED_FROM), ("body", EXPECTED_BODY)]),
    )])
}

fn handle_test_send(test_message: Value) -> Result<Value, HandlerError> {
    let message = test_message
        .field("message")
        .ok_or_else(|| HandlerError::undeclared("no message"))?;
    let field = |name| message.field(name).and_then(Value::as_str);
    match field("to") {
        Some("nobody") => Err(HandlerError::Declared(Value::record([(
            "reason",
            "nobody is home",
        )]))),
        Some(EXPECTED_TO) => {
            assert_eq!(Some(EXPECTED_FROM), field("from"));
            assert_eq!(Some(EXPECTED_BODY), field("body"));
            Ok(Value::from(EXPECTED_RESPONSE))
        }
        _ => Err(HandlerError::undeclared("unexpected recipient")),
    }
}

fn endpoint() -> AvroEndpoint {
    let mut builder = ResponderBuilder::from_protocol_file(AVRO_FILE).expect("protocol file parses");
    builder
        .register("test_send", handle_test_send)
        .expect("test_send is declared");
    AvroEndpoint::new("tests", Arc::new(builder.build()))
}

fn app() -> (Arc<Protocol>, Router) {
    let endpoint = endpoint();
    let protocol = endpoint.responder().protocol().clone();
    (protocol, endpoint.connect(Router::new(), "/tests"))
}

#[test]
fn cannot_register_unknown_message() {
    let unknown_message_name = "blahblah";
    let mut builder = ResponderBuilder::from_protocol_file(AVRO_FILE).expect("protocol file parses");
    assert!(builder.protocol().message(unknown_message_name).is_none());

    let result = builder.register(unknown_message_name, |_: Value| -> Result<Value, HandlerError> {
        Ok(Value::Null)
    });
    assert!(matches!(result, Err(Error::MessageNotDefined(name)) if name == unknown_message_name));
    assert!(builder.registered_messages().is_empty());
}

#[tokio::test]
async fn successfully_register_and_handle_message() {
    let (protocol, router) = app();
    let client = test_client(protocol, router, "/tests");

    let response = client
        .request("test_send", test_message(EXPECTED_TO))
        .await
        .expect("test_send succeeds");
    assert_eq!(Value::from(EXPECTED_RESPONSE), response);
}

#[tokio::test]
async fn declared_errors_cross_http() {
    let (protocol, router) = app();
    let client = test_client(protocol, router, "/tests");

    match client.request("test_send", test_message("nobody")).await {
        Err(Error::Remote(RemoteError::Declared(error))) => {
            assert_eq!(Value::record([("reason", "nobody is home")]), error)
        }
        other => panic!("unexpected {other:?}"),
    }
    match client.request("test_send", test_message("stranger")).await {
        Err(Error::Remote(RemoteError::Fault(fault))) => {
            assert_eq!(avro_ipc::INTERNAL_SERVER_ERROR, fault)
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn unimplemented_messages_are_faults() {
    let (protocol, router) = app();
    let client = test_client(protocol, router, "/tests");

    assert!(matches!(
        client.request("test_ping", Value::Record(Vec::new())).await,
        Ok(Value::Null)
    ), "one-way calls do not wait for a result");

    let mut builder = ResponderBuilder::from_protocol_file(AVRO_FILE).expect("parses");
    builder
        .register("test_ping", |_: Value| -> Result<Value, HandlerError> { Ok(Value::Null) })
        .expect("test_ping is declared");
    let router = AvroEndpoint::new("ping only", Arc::new(builder.build())).connect(Router::new(), "/ping");
    let client = test_client(
        Protocol::from_file(AVRO_FILE).expect("parses"),
        router,
        "/ping",
    );
    match client.request("test_send", test_message(EXPECTED_TO)).await {
        Err(Error::Remote(RemoteError::Fault(fault))) => {
            assert_eq!("Message not implemented: test_send", fault)
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn only_post_is_routed() {
    let (_, router) = app();
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/tests")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("router is infallible");
    assert_eq!(StatusCode::METHOD_NOT_ALLOWED, response.status());

    let response = router
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/tests")
                .header(CONTENT_TYPE, AVRO_CONTENT_TYPE)
                .body(Body::from(vec![0, 0, 0, 9, 1]))
                .expect("request builds"),
        )
        .await
        .expect("router is infallible");
    assert_eq!(StatusCode::BAD_REQUEST, response.status());
}

#[tokio::test]
async fn responses_are_avro_binary() {
    let (protocol, router) = app();
    let mut handshake = Vec::new();
    avro_ipc::handshake::HandshakeRequest {
        client_hash: protocol.md5(),
        client_protocol: None,
        server_hash: protocol.md5(),
        meta: None,
    }
    .encode(&mut handshake);
    let mut body = Vec::new();
    avro_ipc::framing::write_framed_message(&[handshake], &mut body);

    let response = router
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/tests")
                .header(CONTENT_TYPE, AVRO_CONTENT_TYPE)
                .body(Body::from(body))
                .expect("request builds"),
        )
        .await
        .expect("router is infallible");
    assert_eq!(StatusCode::OK, response.status());
    assert_eq!(
        Some(AVRO_CONTENT_TYPE),
        response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    );
}

fn body_length(request: Value) -> Result<Value, HandlerError> {
    let body = request
        .field("message")
        .and_then(|message| message.field("body"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    Ok(Value::from(body.len().to_string()))
}

fn letter_with_body(body: &str) -> Value {
    Value::record([(
        "message",
        Value::record([("to", EXPECTED_TO), ("from", EXPECTED_FROM), ("body", body)]),
    )])
}

#[tokio::test]
async fn body_limit_follows_the_configuration() {
    let mut builder = ResponderBuilder::from_protocol_file(AVRO_FILE).expect("parses");
    builder
        .register("test_send", body_length)
        .expect("test_send is declared");
    let responder = Arc::new(builder.build());
    let client = test_client(
        responder.protocol().clone(),
        AvroEndpoint::new("large", responder).connect(Router::new(), "/tests"),
        "/tests",
    );
    // Larger than axum's default limit, within the default max body length.
    let body = "x".repeat(3 << 20);
    let response = client
        .request("test_send", letter_with_body(&body))
        .await
        .expect("large bodies are served");
    assert_eq!(Value::from(body.len().to_string()), response);

    let mut configuration = Configuration::default();
    configuration.max_body_length(1024);
    let mut builder = ResponderBuilder::from_protocol_file(AVRO_FILE).expect("parses");
    builder
        .register("test_send", body_length)
        .expect("test_send is declared")
        .configuration(configuration);
    let responder = Arc::new(builder.build());
    let client = test_client(
        responder.protocol().clone(),
        AvroEndpoint::new("small", responder).connect(Router::new(), "/tests"),
        "/tests",
    );
    match client.request("test_send", letter_with_body(&"x".repeat(4096))).await {
        Err(Error::Transport(status)) => assert!(status.starts_with("413"), "{status}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn older_clients_negotiate_their_protocol() {
    let (_, router) = app();
    let client_protocol = Protocol::parse(
        r#"{
            "namespace": "avro.ipc.test",
            "protocol": "TestProtocol",
            "types": [{"name": "TestMessage", "type": "record", "fields": [
                {"name": "to", "type": "string"},
                {"name": "from", "type": "string"},
                {"name": "body", "type": "string"}
            ]}],
            "messages": {
                "test_send": {"request": [{"name": "message", "type": "TestMessage"}], "response": "string"}
            }
        }"#,
    )
    .expect("protocol parses");
    let client = test_client(client_protocol, router, "/tests");

    for _ in 0..2 {
        let response = client
            .request("test_send", test_message(EXPECTED_TO))
            .await
            .expect("test_send succeeds");
        assert_eq!(Value::from(EXPECTED_RESPONSE), response);
    }
    assert!(client.server_protocol().is_some());
}

#[tokio::test]
async fn calls_over_a_socket() {
    let _ = env_logger::builder().is_test(true).try_init();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut builder = Responder::builder(Protocol::from_file(AVRO_FILE).expect("parses"));
    builder
        .register("test_send", move |request: Value| {
            counter.fetch_add(1, Ordering::Relaxed);
            handle_test_send(request)
        })
        .expect("test_send is declared");
    let responder = Arc::new(builder.build());
    let router = AvroEndpoint::new("tests", responder.clone()).connect(Router::new(), "/tests");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("can bind");
    let address = listener.local_addr().expect("bound");
    let server = tokio::spawn(serve(listener, router));

    let transceiver = HttpTransceiver::new(&format!("http://{address}/tests")).expect("valid url");
    let client = Requestor::new(responder.protocol().clone(), transceiver);
    for expected in 1..=3 {
        let response = client
            .request("test_send", test_message(EXPECTED_TO))
            .await
            .expect("test_send succeeds");
        assert_eq!(Value::from(EXPECTED_RESPONSE), response);
        assert_eq!(expected, calls.load(Ordering::Relaxed));
    }

    let missing = Requestor::new(
        responder.protocol().clone(),
        HttpTransceiver::new(&format!("http://{address}/missing")).expect("valid url"),
    );
    assert!(matches!(
        missing.request("test_send", test_message(EXPECTED_TO)).await,
        Err(Error::Transport(_))
    ));
    server.abort();
}
