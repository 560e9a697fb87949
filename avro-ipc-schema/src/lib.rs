//! Avro protocols and the binary encoding that avro-ipc speaks.
//!
//! A [`Protocol`] is parsed from its JSON declaration (usually an `.avpr` file). It owns
//! the named types it declares and the [`Message`]s that use them, and it knows its own
//! canonical form and MD5. Values are dynamically typed [`Value`]s, written and read with
//! [`encode`] and [`decode`] against a schema and the protocol's [`Names`].
//!
//! ```
//! use avro_ipc_schema::{decode, encode, Protocol, Value};
//!
//! let protocol = Protocol::parse(r#"{
//!     "protocol": "Echo",
//!     "messages": {"echo": {"request": [{"name": "text", "type": "string"}], "response": "string"}}
//! }"#).expect("valid protocol");
//! let echo = protocol.message("echo").expect("declared");
//!
//! let mut buffer = Vec::new();
//! let request = Value::record([("text", "hello")]);
//! encode(&request, echo.request(), protocol.names(), &mut buffer).expect("conforms");
//! let decoded = decode(echo.request(), protocol.names(), &mut buffer.as_slice()).expect("decodes");
//! assert_eq!(request, decoded);
//! ```

pub mod binary;
mod error;
mod protocol;
mod schema;
mod value;

pub use binary::{decode, decode_resolved, encode};
pub use error::{Error, Result};
pub use protocol::{Md5, Message, Protocol};
pub use schema::{EnumSchema, FixedSchema, Name, Names, RecordField, RecordSchema, Schema};
pub use value::Value;
