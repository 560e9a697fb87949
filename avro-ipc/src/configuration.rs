/// Configuration for avro-ipc responders and requestors.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) max_buffer_length: usize,
    pub(crate) max_body_length: usize,
    pub(crate) buffer_size: usize,
    pub(crate) max_cached_protocols: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            max_buffer_length: 4 << 20,
            max_body_length: 8 << 20,
            buffer_size: 8192,
            max_cached_protocols: 64,
        }
    }
}

impl Configuration {
    /// Max buffer length limits the size of any single buffer a peer may declare in a frame.
    /// Longer buffers fail the exchange before anything is allocated for them.
    ///
    /// Default: 4MiB
    pub fn max_buffer_length(&mut self, max_buffer_length: usize) {
        self.max_buffer_length = max_buffer_length;
    }

    /// Max body length limits the size of a whole request body, all of its buffers together.
    /// The HTTP binding refuses longer bodies before reading them.
    ///
    /// Default: 8MiB
    pub fn max_body_length(&mut self, max_body_length: usize) {
        self.max_body_length = max_body_length;
    }

    /// Outbound payloads are split into buffers of at most this many bytes.
    ///
    /// Default: 8192
    pub fn buffer_size(&mut self, buffer_size: usize) {
        self.buffer_size = buffer_size.max(1);
    }

    /// How many client protocols a responder remembers by hash, including its own.
    /// Protocols seen after the cache is full are negotiated but not remembered.
    ///
    /// Default: 64
    pub fn max_cached_protocols(&mut self, max_cached_protocols: usize) {
        self.max_cached_protocols = max_cached_protocols;
    }
}
