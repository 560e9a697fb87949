//! Avro IPC
//!
//! This crate speaks the Avro IPC wire protocol over any transport that can exchange one
//! request body for one response body. It does not own sockets: a server hands each
//! request body to a [`Responder`], and a client hands each request body to a
//! [`Transceiver`]. See `avro-ipc-http` for an HTTP binding.
//!
//! A body is two frame-messages: a handshake, then a call (or its response). The handshake
//! lets the client and server agree on the protocol by MD5, so the full protocol text only
//! travels when one side has never seen it.
//!
//! Servers register one [`MessageHandler`] per message with a [`ResponderBuilder`].
//! Registration is checked against the protocol, and the registry is immutable once the
//! responder is built. Handler failures that the protocol declares travel to the caller as
//! typed values; anything else becomes a generic fault.
//!
//! Clients call through a [`Requestor`]. [`LocalTransceiver`] connects one straight to a
//! responder in the same process, which is handy for tests.

mod configuration;
mod error;
pub mod framing;
pub mod handshake;
pub mod message;
mod requestor;
mod responder;

pub use configuration::Configuration;
pub use error::{Error, FramingError, RemoteError, Result};
pub use requestor::{LocalTransceiver, Requestor, Transceiver};
pub use responder::{
    HandlerError, MessageHandler, Responder, ResponderBuilder, INTERNAL_SERVER_ERROR,
};

pub use avro_ipc_schema as schema;
pub use avro_ipc_schema::{Protocol, Value};
