//! Frame-messages: a sequence of buffers, each prefixed with its 4-byte big-endian
//! length, terminated by a zero-length buffer.

use std::io::{ErrorKind, Read};

use bytes::{BufMut, Bytes, BytesMut};

use crate::FramingError;

/// Write `buffers` as one frame-message. Empty input writes only the terminator.
///
/// A zero length means "end of message" on the wire, so empty buffers are skipped.
pub fn write_framed_message<T: AsRef<[u8]>>(buffers: &[T], out: &mut impl BufMut) {
    for buffer in buffers {
        write_buffer(buffer.as_ref(), out);
    }
    out.put_u32(0);
}

fn write_buffer(buffer: &[u8], out: &mut impl BufMut) {
    if buffer.is_empty() {
        return;
    }
    out.put_u32(buffer.len() as u32);
    out.put_slice(buffer);
}

/// Read one frame-message, blocking until its terminator is read.
pub fn read_framed_message(
    reader: &mut impl Read,
    max_buffer_length: usize,
) -> Result<Vec<Bytes>, FramingError> {
    let mut buffers = Vec::new();
    loop {
        let mut length = [0; 4];
        read_exact(reader, &mut length)?;
        let length = u32::from_be_bytes(length) as usize;
        if length == 0 {
            return Ok(buffers);
        }
        if max_buffer_length < length {
            log::warn!("peer declared a {length} byte buffer, max is {max_buffer_length}");
            return Err(FramingError::BufferTooLarge {
                length,
                max: max_buffer_length,
            });
        }
        let mut buffer = vec![0; length];
        read_exact(reader, &mut buffer)?;
        buffers.push(Bytes::from(buffer));
    }
}

fn read_exact(reader: &mut impl Read, buffer: &mut [u8]) -> Result<(), FramingError> {
    reader.read_exact(buffer).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => FramingError::Truncated,
        _ => FramingError::IoFailure(e),
    })
}

/// Collapse the buffers of a frame-message into one logical payload.
pub fn join(mut buffers: Vec<Bytes>) -> Bytes {
    match buffers.len() {
        0 => Bytes::new(),
        1 => buffers.swap_remove(0),
        _ => {
            let mut joined = BytesMut::with_capacity(buffers.iter().map(Bytes::len).sum());
            for buffer in buffers {
                joined.put(buffer);
            }
            joined.freeze()
        }
    }
}

/// Writes logical payloads as frame-messages, split into buffers of a bounded size.
#[derive(Debug, Clone, Copy)]
pub struct FramedWriter {
    buffer_size: usize,
}

impl FramedWriter {
    /// A writer that splits payloads into buffers of at most `buffer_size` bytes.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Write `payload` as one frame-message. An empty payload is just the terminator.
    pub fn write(&self, payload: &[u8], out: &mut impl BufMut) {
        for chunk in payload.chunks(self.buffer_size) {
            write_buffer(chunk, out);
        }
        out.put_u32(0);
    }
}
