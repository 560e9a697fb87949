use std::{future::Future, sync::Arc};

use bytes::Bytes;

use crate::{Responder, Result};

/// Exchanges one request body for one response body.
///
/// A transceiver carries bytes and nothing else: it does not look inside the frames, and
/// it never pipelines. Timeouts and retries of the transport belong here too.
pub trait Transceiver: Send + Sync {
    /// A name for the remote side, for logs.
    fn remote_name(&self) -> String;

    /// Send a request body and wait for the response body.
    fn transceive(&self, request: Bytes) -> impl Future<Output = Result<Bytes>> + Send;
}

/// A transceiver that calls a [`Responder`] in the same process.
///
/// No sockets and no copies: the request body is handed straight to `respond`.
#[derive(Clone)]
pub struct LocalTransceiver {
    responder: Arc<Responder>,
}

impl LocalTransceiver {
    pub fn new(responder: Arc<Responder>) -> Self {
        Self { responder }
    }

    pub fn responder(&self) -> &Arc<Responder> {
        &self.responder
    }
}

impl Transceiver for LocalTransceiver {
    fn remote_name(&self) -> String {
        format!("local:{}", self.responder.protocol().fullname())
    }

    fn transceive(&self, request: Bytes) -> impl Future<Output = Result<Bytes>> + Send {
        std::future::ready(self.responder.respond(request))
    }
}
