use std::collections::BTreeMap;

use avro_ipc_schema::{
    binary::{read_boolean, read_string, write_boolean, write_bytes, write_long, write_string},
    decode, Names, Schema, Value,
};
use bytes::{Buf, BufMut, Bytes};

use crate::Result;

/// Per-call metadata, `map<bytes>` on the wire.
pub type Metadata = BTreeMap<String, Vec<u8>>;

/// The call half of a request body: metadata, the message name, then the parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub metadata: Metadata,
    pub message_name: String,
    /// Parameters, already encoded with the message's request schema.
    pub parameters: Bytes,
}

impl CallRequest {
    pub fn encode(&self, out: &mut impl BufMut) {
        write_metadata(&self.metadata, out);
        write_string(out, &self.message_name);
        out.put_slice(&self.parameters);
    }

    pub fn decode(mut buffer: Bytes) -> Result<Self> {
        let metadata = read_metadata(&mut buffer)?;
        let message_name = read_string(&mut buffer)?;
        Ok(Self {
            metadata,
            message_name,
            parameters: buffer,
        })
    }
}

/// The call half of a response body: metadata, an error flag, then the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResponse {
    pub metadata: Metadata,
    pub is_error: bool,
    /// Encoded with the response schema, or with the error union when `is_error`.
    pub payload: Bytes,
}

impl CallResponse {
    pub fn encode(&self, out: &mut impl BufMut) {
        write_metadata(&self.metadata, out);
        write_boolean(out, self.is_error);
        out.put_slice(&self.payload);
    }

    pub fn decode(mut buffer: Bytes) -> Result<Self> {
        let metadata = read_metadata(&mut buffer)?;
        let is_error = read_boolean(&mut buffer)?;
        Ok(Self {
            metadata,
            is_error,
            payload: buffer,
        })
    }
}

pub(crate) fn write_metadata(metadata: &Metadata, out: &mut impl BufMut) {
    if !metadata.is_empty() {
        write_long(out, metadata.len() as i64);
        for (key, value) in metadata {
            write_string(out, key);
            write_bytes(out, value);
        }
    }
    write_long(out, 0);
}

pub(crate) fn read_metadata(buffer: &mut impl Buf) -> Result<Metadata> {
    let schema = Schema::Map(Box::new(Schema::Bytes));
    let Value::Map(values) = decode(&schema, &Names::default(), buffer)? else {
        return Ok(Metadata::new());
    };
    Ok(values
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Bytes(bytes) => Some((key, bytes)),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::{CallRequest, CallResponse, Metadata};

    #[test]
    fn call_request_layout() {
        let request = CallRequest {
            metadata: Metadata::new(),
            message_name: "ping".to_string(),
            parameters: Bytes::from_static(&[0x02, b'x']),
        };
        let mut out = Vec::new();
        request.encode(&mut out);
        assert_eq!(vec![0, 8, b'p', b'i', b'n', b'g', 0x02, b'x'], out);
        assert_eq!(request, CallRequest::decode(Bytes::from(out)).expect("decodes"));
    }

    #[test]
    fn call_response_carries_metadata() {
        let response = CallResponse {
            metadata: Metadata::from([("trace".to_string(), vec![1, 2, 3])]),
            is_error: true,
            payload: Bytes::from_static(&[0x00, 0x04, b'o', b'o', b'p', b's']),
        };
        let mut out = Vec::new();
        response.encode(&mut out);
        assert_eq!(response, CallResponse::decode(Bytes::from(out)).expect("decodes"));
    }

    #[test]
    fn truncated_envelopes_fail() {
        assert!(CallRequest::decode(Bytes::from_static(&[0, 8, b'p'])).is_err());
        assert!(CallResponse::decode(Bytes::from_static(&[0])).is_err());
        assert!(CallResponse::decode(Bytes::from_static(&[0, 7])).is_err());
    }
}
