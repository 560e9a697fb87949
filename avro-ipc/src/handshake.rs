//! Handshakes let a client and server agree on the protocol before a call is interpreted.
//!
//! Every request body starts with a `HandshakeRequest` carrying the MD5 of the client's
//! protocol and the client's guess of the server's. The server answers `BOTH` when it knows
//! the client protocol and the guess was right, `CLIENT` when it knows the client protocol
//! but the guess was wrong, and `NONE` when it has never seen the client protocol. Only
//! after `NONE` does the client send its full protocol text.

use std::{collections::HashMap, sync::Arc};

use avro_ipc_schema::{
    binary::{read_fixed, read_long, read_string, write_long, write_string},
    Md5, Protocol,
};
use bytes::{Buf, BufMut};
use k_lock::Mutex;

use crate::{
    message::{read_metadata, write_metadata, Metadata},
    Error, Result,
};

/// Symbols of `org.apache.avro.ipc.HandshakeMatch`, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeMatch {
    Both,
    Client,
    None,
}

impl HandshakeMatch {
    fn index(self) -> i64 {
        match self {
            HandshakeMatch::Both => 0,
            HandshakeMatch::Client => 1,
            HandshakeMatch::None => 2,
        }
    }

    fn from_index(index: i64) -> Result<Self> {
        match index {
            0 => Ok(HandshakeMatch::Both),
            1 => Ok(HandshakeMatch::Client),
            2 => Ok(HandshakeMatch::None),
            other => Err(decode_error(format!("{other} is not a HandshakeMatch"))),
        }
    }
}

/// `org.apache.avro.ipc.HandshakeRequest`
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeRequest {
    pub client_hash: Md5,
    pub client_protocol: Option<String>,
    pub server_hash: Md5,
    pub meta: Option<Metadata>,
}

impl HandshakeRequest {
    pub fn encode(&self, out: &mut impl BufMut) {
        out.put_slice(&self.client_hash);
        write_optional_string(self.client_protocol.as_deref(), out);
        out.put_slice(&self.server_hash);
        write_optional_metadata(self.meta.as_ref(), out);
    }

    pub fn decode(buffer: &mut impl Buf) -> Result<Self> {
        Ok(Self {
            client_hash: read_md5(buffer)?,
            client_protocol: read_optional_string(buffer)?,
            server_hash: read_md5(buffer)?,
            meta: read_optional_metadata(buffer)?,
        })
    }
}

/// `org.apache.avro.ipc.HandshakeResponse`
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeResponse {
    pub handshake_match: HandshakeMatch,
    pub server_protocol: Option<String>,
    pub server_hash: Option<Md5>,
    pub meta: Option<Metadata>,
}

impl HandshakeResponse {
    pub fn encode(&self, out: &mut impl BufMut) {
        write_long(out, self.handshake_match.index());
        write_optional_string(self.server_protocol.as_deref(), out);
        match &self.server_hash {
            Some(hash) => {
                write_long(out, 1);
                out.put_slice(hash);
            }
            None => write_long(out, 0),
        }
        write_optional_metadata(self.meta.as_ref(), out);
    }

    pub fn decode(buffer: &mut impl Buf) -> Result<Self> {
        let handshake_match = HandshakeMatch::from_index(read_long(buffer)?)?;
        let server_protocol = read_optional_string(buffer)?;
        let server_hash = match read_union_index(buffer)? {
            false => None,
            true => Some(read_md5(buffer)?),
        };
        Ok(Self {
            handshake_match,
            server_protocol,
            server_hash,
            meta: read_optional_metadata(buffer)?,
        })
    }
}

fn decode_error(message: String) -> Error {
    Error::Schema(avro_ipc_schema::Error::Decode(message))
}

/// Index of a `["null", T]` union: false for null.
fn read_union_index(buffer: &mut impl Buf) -> Result<bool> {
    match read_long(buffer)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(decode_error(format!("{other} is not a union branch"))),
    }
}

fn read_md5(buffer: &mut impl Buf) -> Result<Md5> {
    let bytes = read_fixed(buffer, 16)?;
    let mut md5 = [0; 16];
    md5.copy_from_slice(&bytes);
    Ok(md5)
}

fn write_optional_string(value: Option<&str>, out: &mut impl BufMut) {
    match value {
        Some(value) => {
            write_long(out, 1);
            write_string(out, value);
        }
        None => write_long(out, 0),
    }
}

fn read_optional_string(buffer: &mut impl Buf) -> Result<Option<String>> {
    Ok(match read_union_index(buffer)? {
        false => None,
        true => Some(read_string(buffer)?),
    })
}

fn write_optional_metadata(meta: Option<&Metadata>, out: &mut impl BufMut) {
    match meta {
        Some(meta) => {
            write_long(out, 1);
            write_metadata(meta, out);
        }
        None => write_long(out, 0),
    }
}

fn read_optional_metadata(buffer: &mut impl Buf) -> Result<Option<Metadata>> {
    Ok(match read_union_index(buffer)? {
        false => None,
        true => Some(read_metadata(buffer)?),
    })
}

/// Protocols a server has seen, by MD5.
///
/// Seeded with the server's own protocol. Once `max_cached_protocols` are known, new
/// protocols are still negotiated but no longer remembered.
pub struct ProtocolCache {
    protocols: Mutex<HashMap<Md5, Arc<Protocol>>>,
    max_cached_protocols: usize,
}

impl ProtocolCache {
    pub fn new(local: Arc<Protocol>, max_cached_protocols: usize) -> Self {
        let mut protocols = HashMap::new();
        protocols.insert(local.md5(), local);
        Self {
            protocols: Mutex::new(protocols),
            max_cached_protocols,
        }
    }

    pub fn get(&self, hash: &Md5) -> Option<Arc<Protocol>> {
        self.protocols
            .lock()
            .expect("must not be poisoned")
            .get(hash)
            .cloned()
    }

    /// Remember `protocol` if there is room. Returns whether it is cached.
    pub fn insert(&self, protocol: Arc<Protocol>) -> bool {
        let mut protocols = self.protocols.lock().expect("must not be poisoned");
        if protocols.contains_key(&protocol.md5()) {
            return true;
        }
        if self.max_cached_protocols <= protocols.len() {
            log::debug!("protocol cache is full, not caching {}", protocol.fullname());
            return false;
        }
        protocols.insert(protocol.md5(), protocol);
        true
    }

    pub fn len(&self) -> usize {
        self.protocols.lock().expect("must not be poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Server side of the handshake.
///
/// Returns the response and, unless the answer is `NONE`, the client's protocol.
pub fn negotiate(
    request: &HandshakeRequest,
    local: &Protocol,
    cache: &ProtocolCache,
) -> (HandshakeResponse, Option<Arc<Protocol>>) {
    let client_protocol = cache.get(&request.client_hash).or_else(|| {
        let text = request.client_protocol.as_deref()?;
        match Protocol::parse(text) {
            Ok(protocol) if protocol.md5() == request.client_hash => {
                let protocol = Arc::new(protocol);
                cache.insert(protocol.clone());
                Some(protocol)
            }
            Ok(protocol) => {
                log::warn!(
                    "client protocol {} does not match its hash {:x?}",
                    protocol.fullname(),
                    request.client_hash
                );
                None
            }
            Err(e) => {
                log::warn!("can not parse client protocol: {e}");
                None
            }
        }
    });

    let handshake_match = match &client_protocol {
        None => HandshakeMatch::None,
        Some(_) if request.server_hash == local.md5() => HandshakeMatch::Both,
        Some(_) => HandshakeMatch::Client,
    };
    log::trace!("handshake {handshake_match:?} for {:x?}", request.client_hash);

    let response = match handshake_match {
        HandshakeMatch::Both => HandshakeResponse {
            handshake_match,
            server_protocol: None,
            server_hash: None,
            meta: None,
        },
        _ => HandshakeResponse {
            handshake_match,
            server_protocol: Some(local.canonical_form().to_string()),
            server_hash: Some(local.md5()),
            meta: None,
        },
    };
    (response, client_protocol)
}

/// Where a client is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent since the last reset.
    Init,
    /// A request is in flight.
    Sent,
    /// The server accepted the client protocol.
    Confirmed,
}

/// What a client should do after reading a handshake response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The call response follows the handshake.
    Proceed,
    /// The server does not know the client protocol. Send the call again.
    Retry,
}

/// Client side of the handshake.
#[derive(Debug)]
pub struct ClientHandshake {
    local: Arc<Protocol>,
    state: HandshakeState,
    server_hash: Option<Md5>,
    server_protocol: Option<Arc<Protocol>>,
    send_protocol: bool,
}

impl ClientHandshake {
    pub fn new(local: Arc<Protocol>) -> Self {
        Self {
            local,
            state: HandshakeState::Init,
            server_hash: None,
            server_protocol: None,
            send_protocol: false,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// The server's protocol, once the server has told us it differs from ours.
    pub fn server_protocol(&self) -> Option<&Arc<Protocol>> {
        self.server_protocol.as_ref()
    }

    /// The next request. An unknown server hash is guessed to be our own.
    ///
    /// The protocol text is sent when `with_protocol` is set, and on every request after
    /// the server has said it does not know our protocol.
    pub fn request(&mut self, with_protocol: bool) -> HandshakeRequest {
        self.state = HandshakeState::Sent;
        HandshakeRequest {
            client_hash: self.local.md5(),
            client_protocol: (with_protocol || self.send_protocol)
                .then(|| self.local.canonical_form().to_string()),
            server_hash: self.server_hash.unwrap_or_else(|| self.local.md5()),
            meta: None,
        }
    }

    /// Read the server's answer to `request`. `NONE` is a mismatch only when `request`
    /// already carried the protocol text; otherwise the call is retried with it.
    pub fn handle(
        &mut self,
        request: &HandshakeRequest,
        response: HandshakeResponse,
    ) -> Result<HandshakeOutcome> {
        log::trace!("handshake response {:?}", response.handshake_match);
        match response.handshake_match {
            HandshakeMatch::Both => {
                self.state = HandshakeState::Confirmed;
                self.send_protocol = false;
                Ok(HandshakeOutcome::Proceed)
            }
            HandshakeMatch::Client => {
                self.remember_server(&response)?;
                self.state = HandshakeState::Confirmed;
                self.send_protocol = false;
                Ok(HandshakeOutcome::Proceed)
            }
            HandshakeMatch::None => {
                self.remember_server(&response)?;
                if request.client_protocol.is_some() {
                    self.state = HandshakeState::Init;
                    return Err(Error::HandshakeMismatch(format!(
                        "server does not accept protocol {}",
                        self.local.fullname()
                    )));
                }
                self.state = HandshakeState::Init;
                self.send_protocol = true;
                Ok(HandshakeOutcome::Retry)
            }
        }
    }

    fn remember_server(&mut self, response: &HandshakeResponse) -> Result<()> {
        if let Some(hash) = response.server_hash {
            self.server_hash = Some(hash);
        }
        if let Some(text) = &response.server_protocol {
            let protocol = if self.local.md5() == response.server_hash.unwrap_or_default() {
                self.local.clone()
            } else {
                Arc::new(Protocol::parse(text)?)
            };
            self.server_protocol = Some(protocol);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use avro_ipc_schema::Protocol;

    use super::{
        negotiate, ClientHandshake, HandshakeMatch, HandshakeOutcome, HandshakeRequest,
        HandshakeResponse, HandshakeState, ProtocolCache,
    };
    use crate::{message::Metadata, Error};

    fn protocol(name: &str) -> Arc<Protocol> {
        Arc::new(
            Protocol::parse(&format!(
                r#"{{"protocol": "{name}", "messages": {{"ping": {{"request": [], "response": "null"}}}}}}"#
            ))
            .expect("protocol parses"),
        )
    }

    #[test]
    fn handshake_request_layout() {
        let request = HandshakeRequest {
            client_hash: [1; 16],
            client_protocol: None,
            server_hash: [2; 16],
            meta: None,
        };
        let mut out = Vec::new();
        request.encode(&mut out);
        assert_eq!([&[1; 16][..], &[0], &[2; 16], &[0]].concat(), out);
        assert_eq!(
            request,
            HandshakeRequest::decode(&mut out.as_slice()).expect("decodes")
        );
    }

    #[test]
    fn handshake_response_layout() {
        let response = HandshakeResponse {
            handshake_match: HandshakeMatch::None,
            server_protocol: Some("{}".to_string()),
            server_hash: Some([3; 16]),
            meta: Some(Metadata::new()),
        };
        let mut out = Vec::new();
        response.encode(&mut out);
        assert_eq!(
            [&[4, 2, 4, b'{', b'}', 2][..], &[3; 16], &[2, 0]].concat(),
            out
        );
        assert_eq!(
            response,
            HandshakeResponse::decode(&mut out.as_slice()).expect("decodes")
        );

        assert!(HandshakeResponse::decode(&mut [6_u8, 0, 0, 0].as_slice()).is_err());
    }

    #[test]
    fn same_protocol_is_both() {
        let local = protocol("Local");
        let cache = ProtocolCache::new(local.clone(), 4);
        let mut client = ClientHandshake::new(local.clone());

        let request = client.request(false);
        let (response, client_protocol) = negotiate(&request, &local, &cache);
        assert_eq!(HandshakeMatch::Both, response.handshake_match);
        assert_eq!(None, response.server_protocol);
        assert_eq!(Some(local.md5()), client_protocol.map(|p| p.md5()));

        assert_eq!(HandshakeOutcome::Proceed, client.handle(&request, response).expect("ok"));
        assert_eq!(HandshakeState::Confirmed, client.state());
    }

    #[test]
    fn unknown_protocol_is_resent_once() {
        let server = protocol("Server");
        let cache = ProtocolCache::new(server.clone(), 4);
        let client_protocol = protocol("Client");
        let mut client = ClientHandshake::new(client_protocol.clone());

        let first = client.request(false);
        assert_eq!(None, first.client_protocol);
        let (response, resolved) = negotiate(&first, &server, &cache);
        assert!(resolved.is_none());
        assert_eq!(HandshakeMatch::None, response.handshake_match);
        assert_eq!(Some(server.md5()), response.server_hash);
        assert_eq!(HandshakeOutcome::Retry, client.handle(&first, response).expect("retry"));
        assert_eq!(HandshakeState::Init, client.state());

        let second = client.request(true);
        assert_eq!(
            Some(client_protocol.canonical_form()),
            second.client_protocol.as_deref()
        );
        assert_eq!(server.md5(), second.server_hash);
        let (response, resolved) = negotiate(&second, &server, &cache);
        assert_eq!(Some(client_protocol.md5()), resolved.map(|p| p.md5()));
        assert_eq!(HandshakeMatch::Both, response.handshake_match);
        assert_eq!(HandshakeOutcome::Proceed, client.handle(&second, response).expect("ok"));
        assert_eq!(2, cache.len());

        let third = client.request(false);
        assert_eq!(None, third.client_protocol, "cached protocols are not resent");
        let (response, _) = negotiate(&third, &server, &cache);
        assert_eq!(HandshakeMatch::Both, response.handshake_match);
    }

    #[test]
    fn wrong_server_guess_is_client() {
        let server = protocol("Server");
        let cache = ProtocolCache::new(server.clone(), 4);
        let client_protocol = protocol("Client");
        cache.insert(client_protocol.clone());
        let mut client = ClientHandshake::new(client_protocol);

        let request = client.request(false);
        let (response, _) = negotiate(&request, &server, &cache);
        assert_eq!(HandshakeMatch::Client, response.handshake_match);
        assert_eq!(
            Some(server.canonical_form()),
            response.server_protocol.as_deref()
        );
        assert_eq!(HandshakeOutcome::Proceed, client.handle(&request, response).expect("ok"));
        assert_eq!(
            Some(server.md5()),
            client.server_protocol().map(|p| p.md5())
        );

        let (response, _) = negotiate(&client.request(false), &server, &cache);
        assert_eq!(HandshakeMatch::Both, response.handshake_match);
    }

    #[test]
    fn second_none_is_a_mismatch() {
        let mut client = ClientHandshake::new(protocol("Client"));
        let none = HandshakeResponse {
            handshake_match: HandshakeMatch::None,
            server_protocol: None,
            server_hash: None,
            meta: None,
        };
        let first = client.request(false);
        assert_eq!(HandshakeOutcome::Retry, client.handle(&first, none.clone()).expect("retry"));
        let second = client.request(true);
        assert!(matches!(
            client.handle(&second, none),
            Err(Error::HandshakeMismatch(_))
        ));
    }

    #[test]
    fn overlapping_first_calls_each_retry() {
        let server = protocol("Server");
        let cache = ProtocolCache::new(server.clone(), 4);
        let mut client = ClientHandshake::new(protocol("Client"));

        // Both go out before either answer is read.
        let first = client.request(false);
        let second = client.request(false);
        let (first_response, _) = negotiate(&first, &server, &cache);
        let (second_response, _) = negotiate(&second, &server, &cache);
        assert_eq!(
            HandshakeOutcome::Retry,
            client.handle(&first, first_response).expect("retry")
        );
        assert_eq!(
            HandshakeOutcome::Retry,
            client.handle(&second, second_response).expect("a call without the text retries")
        );

        let retry = client.request(true);
        assert!(retry.client_protocol.is_some());
        let (response, _) = negotiate(&retry, &server, &cache);
        assert_eq!(HandshakeOutcome::Proceed, client.handle(&retry, response).expect("ok"));
    }

    #[test]
    fn full_cache_still_negotiates() {
        let server = protocol("Server");
        let cache = ProtocolCache::new(server.clone(), 1);
        let client_protocol = protocol("Client");
        let request = HandshakeRequest {
            client_hash: client_protocol.md5(),
            client_protocol: Some(client_protocol.canonical_form().to_string()),
            server_hash: server.md5(),
            meta: None,
        };
        let (response, resolved) = negotiate(&request, &server, &cache);
        assert_eq!(HandshakeMatch::Both, response.handshake_match);
        assert!(resolved.is_some());
        assert_eq!(1, cache.len());
    }

    #[test]
    fn forged_hashes_are_not_cached() {
        let server = protocol("Server");
        let cache = ProtocolCache::new(server.clone(), 4);
        let request = HandshakeRequest {
            client_hash: [9; 16],
            client_protocol: Some(protocol("Client").canonical_form().to_string()),
            server_hash: server.md5(),
            meta: None,
        };
        let (response, resolved) = negotiate(&request, &server, &cache);
        assert_eq!(HandshakeMatch::None, response.handshake_match);
        assert!(resolved.is_none());
        assert_eq!(1, cache.len());
    }
}
