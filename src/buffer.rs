//! Receive buffer for the AMI lexer

use bytes::{Buf, BytesMut};

use crate::{
    constants::{BUF_CHUNK, MAX_BUFFER_SIZE},
    error::{AmiError, AmiResult},
};

/// Append-only byte buffer; the lexer only ever removes a consumed prefix.
#[derive(Debug)]
pub(crate) struct AmiBuffer {
    data: BytesMut,
    max_size: usize,
}

impl AmiBuffer {
    pub(crate) fn new() -> Self {
        Self::with_max_size(MAX_BUFFER_SIZE)
    }

    pub(crate) fn with_max_size(max_size: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(BUF_CHUNK.min(max_size)),
            max_size,
        }
    }

    pub(crate) fn extend_from_slice(&mut self, data: &[u8]) {
        self.data
            .extend_from_slice(data);
    }

    /// Fails once unconsumed data exceeds the limit. This means a stanza
    /// terminator never arrived and the stream is not recoverable.
    pub(crate) fn check_size_limits(&self) -> AmiResult<()> {
        if self.data.len() > self.max_size {
            return Err(AmiError::protocol_error(format!(
                "receive buffer holds {} bytes without a complete stanza (limit {})",
                self.data.len(),
                self.max_size
            )));
        }
        Ok(())
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Drop the first `len` bytes.
    pub(crate) fn consume(&mut self, len: usize) {
        self.data
            .advance(len);
    }
}

/// Position of the first `pattern` at or after `from`.
pub(crate) fn find_pattern(haystack: &[u8], pattern: &[u8], from: usize) -> Option<usize> {
    if pattern.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(pattern.len())
        .position(|w| w == pattern)
        .map(|pos| pos + from)
}
