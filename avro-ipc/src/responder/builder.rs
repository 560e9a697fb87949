use std::{collections::HashMap, path::Path, sync::Arc};

use avro_ipc_schema::Protocol;

use crate::{
    framing::FramedWriter, handshake::ProtocolCache, responder::Responder, Configuration, Error,
    MessageHandler, Result,
};

/// Registers handlers for the messages of a protocol, then builds a [`Responder`].
///
/// Registration is checked against the protocol, so a misspelled message name fails at
/// startup instead of at the first call.
pub struct ResponderBuilder {
    protocol: Arc<Protocol>,
    handlers: HashMap<String, Box<dyn MessageHandler>>,
    configuration: Configuration,
}

impl ResponderBuilder {
    pub fn new(protocol: impl Into<Arc<Protocol>>) -> Self {
        Self {
            protocol: protocol.into(),
            handlers: HashMap::new(),
            configuration: Configuration::default(),
        }
    }

    /// Read the protocol from a declaration file, conventionally `*.avpr`.
    pub fn from_protocol_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Protocol::from_file(path)?))
    }

    /// Serve `message_name` with `handler`. Registering a name again replaces its handler.
    ///
    /// Fails with `MessageNotDefined`, leaving the registry as it was, when the protocol
    /// does not declare the message.
    pub fn register(
        &mut self,
        message_name: &str,
        handler: impl MessageHandler,
    ) -> Result<&mut Self> {
        if self.protocol.message(message_name).is_none() {
            return Err(Error::MessageNotDefined(message_name.to_string()));
        }
        if self
            .handlers
            .insert(message_name.to_string(), Box::new(handler))
            .is_some()
        {
            log::debug!("replaced the handler for {message_name}");
        }
        Ok(self)
    }

    /// Names with a registered handler, sorted.
    pub fn registered_messages(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn configuration(&mut self, configuration: Configuration) -> &mut Self {
        self.configuration = configuration;
        self
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn build(self) -> Responder {
        for message in self.protocol.messages() {
            if !self.handlers.contains_key(message.name()) {
                log::warn!("{} has no handler for {}", self.protocol.fullname(), message.name());
            }
        }
        Responder {
            cache: ProtocolCache::new(
                self.protocol.clone(),
                self.configuration.max_cached_protocols,
            ),
            writer: FramedWriter::new(self.configuration.buffer_size),
            protocol: self.protocol,
            handlers: self.handlers,
            configuration: self.configuration,
        }
    }
}
