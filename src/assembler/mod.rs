//! # Stream-to-Message Assembly
//!
//! An assembler turns the raw byte stream of one client into a sequence of
//! framed application-level messages. The engine is parameterized over this
//! capability, so the same connection machinery serves any wire protocol.
//!
//! ## Contract
//!
//! - `feed` is invoked with the client's receive buffer after each completed
//!   read. The assembler may consume a prefix of the valid bytes (via
//!   [`RecvBuffer::drain_prefix`]); unconsumed bytes stay at the front for
//!   the next call.
//! - On recoverable underflow it returns an empty message list and leaves
//!   the buffer untouched.
//! - On a fatal protocol error it returns an [`AssembleError`] whose
//!   `response` is a complete protocol-level error payload, sent verbatim to
//!   the client before disconnect.
//! - Per-client state is retained across calls for the same id and released
//!   through `release` once that client is destroyed; the engine guarantees
//!   no further `feed` calls for a released id.
//! - Calls for different ids may happen concurrently, but the engine never
//!   runs more than one `feed` for the same id at a time.

use std::fmt;

use crate::client::{ClientId, RecvBuffer};

pub mod http;

/// Fatal protocol failure reported by an assembler.
#[derive(Debug, Clone)]
pub struct AssembleError {
    /// Human-readable cause, used for logging.
    pub reason: String,
    /// Complete wire-level error message to send before disconnecting.
    pub response: Vec<u8>,
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol error: {}", self.reason)
    }
}

impl std::error::Error for AssembleError {}

/// Capability required of any stream-to-message assembler.
pub trait MessageAssembler: Send + Sync + 'static {
    type Message: Send + 'static;

    /// Assemble zero or more complete messages out of the buffered bytes.
    fn feed(
        &self,
        id: ClientId,
        buf: &mut RecvBuffer,
    ) -> Result<Vec<Self::Message>, AssembleError>;

    /// Drop any per-client state. Called exactly once when the client is
    /// destroyed.
    fn release(&self, _id: ClientId) {}
}

/// Assembler for protocols without framing: every call empties the buffer
/// into a single message. Also convenient in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAssembler;

impl MessageAssembler for DefaultAssembler {
    type Message = Vec<u8>;

    fn feed(
        &self,
        _id: ClientId,
        buf: &mut RecvBuffer,
    ) -> Result<Vec<Self::Message>, AssembleError> {
        if buf.is_empty() {
            return Ok(Vec::new());
        }
        let message = buf.filled().to_vec();
        buf.clear();
        Ok(vec![message])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_assembler_emits_the_whole_buffer() {
        let assembler = DefaultAssembler;
        let mut buf = RecvBuffer::new(64);
        buf.push_bytes(b"raw bytes");

        let messages = assembler.feed(1, &mut buf).unwrap();
        assert_eq!(messages, vec![b"raw bytes".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn default_assembler_is_quiet_on_an_empty_buffer() {
        let assembler = DefaultAssembler;
        let mut buf = RecvBuffer::new(64);
        assert!(assembler.feed(1, &mut buf).unwrap().is_empty());
    }
}
