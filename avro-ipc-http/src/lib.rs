//! HTTP binding for avro-ipc.
//!
//! Each exchange is one `POST` with content type `avro/binary`: the request body carries a
//! handshake and a call, the response body a handshake and the call's response.
//!
//! * [`AvroEndpoint`] mounts a `Responder` on an axum `Router`.
//! * [`HttpTransceiver`] calls an endpoint over the network with reqwest.
//! * [`RouterTransceiver`] and [`test_client`] call a `Router` in the same process, for tests.

mod endpoint;
mod error;
mod transceiver;

pub use endpoint::{serve, AvroEndpoint};
pub use error::{Error, Result};
pub use transceiver::{test_client, HttpTransceiver, RouterTransceiver};

/// Content type of avro-ipc request and response bodies.
pub const AVRO_CONTENT_TYPE: &str = "avro/binary";
