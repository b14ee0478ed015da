//! # HTTP/1.x Assembler
//!
//! Reference implementation of [`MessageAssembler`]: an incremental,
//! byte-driven state machine over each client's receive buffer that frames
//! HTTP/1.0 and HTTP/1.1 requests and responses, including chunked transfer
//! decoding. Pipelined messages in one buffer are all emitted in order.
//!
//! Any syntax or limit violation produces a serialized
//! `HTTP/1.1 400 Bad Request` payload with a JSON body, which the engine
//! sends to the client before disconnecting it.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::warn;

use crate::assembler::{AssembleError, MessageAssembler};
use crate::client::{ClientId, RecvBuffer};

pub mod headers;
pub mod message;
mod parser;

pub use headers::{contains_token, HeaderMap};
pub use message::{HttpMessage, HttpMethod, HttpStatus, HttpVersion, StartLine};

use parser::StreamState;

/// Parser limits, enforced by failing the offending message with a 400.
#[derive(Debug, Clone, Copy)]
pub struct HttpLimits {
    /// Longest accepted request URI / start-line component.
    pub max_request_line_len: usize,
    /// Total bytes allowed for one message's header block.
    pub max_header_bytes: usize,
    /// Largest accepted message body, framed either way.
    pub max_body_size: usize,
}

impl Default for HttpLimits {
    fn default() -> Self {
        Self {
            max_request_line_len: 4096,
            max_header_bytes: 8192,
            max_body_size: 1_000_000,
        }
    }
}

/// HTTP/1.x stream assembler with per-client parser state.
///
/// The engine guarantees at most one concurrent `feed` per client id, so a
/// single map-level mutex is all the isolation the state needs.
pub struct HttpAssembler {
    limits: HttpLimits,
    assemble_chunked: bool,
    states: Mutex<HashMap<ClientId, StreamState>>,
}

impl HttpAssembler {
    pub fn new() -> Self {
        Self {
            limits: HttpLimits::default(),
            assemble_chunked: true,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_limits(limits: HttpLimits) -> Self {
        Self {
            limits,
            ..Self::new()
        }
    }

    /// When true (the default) a chunked message is emitted once as a whole;
    /// when false every chunk becomes its own message carrying the original
    /// header block.
    pub fn assemble_chunked(mut self, yes: bool) -> Self {
        self.assemble_chunked = yes;
        self
    }

    pub fn limits(&self) -> &HttpLimits {
        &self.limits
    }

    fn bad_request(details: &str) -> AssembleError {
        let body = serde_json::json!({
            "message": "Error: malformed request syntax",
            "details": details,
        })
        .to_string();
        // The error path always answers with HTTP/1.1 regardless of the
        // version observed on the stream.
        let response =
            HttpMessage::response(HttpVersion::Http11, HttpStatus::BadRequest, body.into_bytes())
                .serialize();
        AssembleError {
            reason: details.to_string(),
            response,
        }
    }
}

impl Default for HttpAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageAssembler for HttpAssembler {
    type Message = HttpMessage;

    fn feed(
        &self,
        id: ClientId,
        buf: &mut RecvBuffer,
    ) -> Result<Vec<Self::Message>, AssembleError> {
        let mut states = self.states.lock();
        let state = states.entry(id).or_default();

        match parser::scan(state, buf, &self.limits, self.assemble_chunked) {
            Ok(messages) => Ok(messages),
            Err(violation) => {
                warn!(
                    "rejected http message of connection {}: {}",
                    id, violation.details
                );
                state.reset();
                buf.clear();
                Err(Self::bad_request(&violation.details))
            }
        }
    }

    fn release(&self, id: ClientId) {
        self.states.lock().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(bytes: &[u8], capacity: usize) -> RecvBuffer {
        let mut buf = RecvBuffer::new(capacity);
        assert_eq!(buf.push_bytes(bytes), bytes.len());
        buf
    }

    #[test]
    fn parses_a_request_without_a_body() {
        let assembler = HttpAssembler::new();
        let mut buf = buffer_with(b"GET /index.html HTTP/1.1\r\nhost: localhost\r\n\r\n", 8192);

        let messages = assembler.feed(1, &mut buf).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].method(), Some(HttpMethod::Get));
        assert_eq!(messages[0].uri(), Some("/index.html"));
        assert_eq!(messages[0].version, HttpVersion::Http11);
        assert!(messages[0].body.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn parses_a_response_status_line() {
        let assembler = HttpAssembler::new();
        let mut buf = buffer_with(b"HTTP/1.0 404 Not Found\r\ncontent-length: 4\r\n\r\ngone", 8192);

        let messages = assembler.feed(1, &mut buf).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status(), Some(404));
        assert_eq!(messages[0].version, HttpVersion::Http10);
        assert_eq!(messages[0].body, b"gone");
        match &messages[0].start {
            StartLine::Response { reason, .. } => assert_eq!(reason, "Not Found"),
            other => panic!("expected a response start line, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_headers_are_joined_with_a_comma() {
        let assembler = HttpAssembler::new();
        let mut buf = buffer_with(
            b"GET / HTTP/1.1\r\nAccept: text/html\r\nACCEPT: application/json\r\n\r\n",
            8192,
        );

        let messages = assembler.feed(1, &mut buf).unwrap();
        assert_eq!(
            messages[0].headers.get("accept"),
            Some("text/html,application/json")
        );
    }

    #[test]
    fn empty_header_name_or_value_is_rejected() {
        let assembler = HttpAssembler::new();

        let mut buf = buffer_with(b"GET / HTTP/1.1\r\n: nameless\r\n\r\n", 8192);
        assert!(assembler.feed(1, &mut buf).is_err());

        let mut buf = buffer_with(b"GET / HTTP/1.1\r\nhost:   \r\n\r\n", 8192);
        assert!(assembler.feed(2, &mut buf).is_err());
    }

    #[test]
    fn error_resets_the_stream_state_and_clears_the_buffer() {
        let assembler = HttpAssembler::new();
        let mut buf = buffer_with(b"??? /uri ", 8192);
        assert!(assembler.feed(1, &mut buf).is_err());
        assert!(buf.is_empty());

        // The same client can speak again from a clean slate.
        let mut buf = buffer_with(b"GET /again HTTP/1.1\r\n\r\n", 8192);
        let messages = assembler.feed(1, &mut buf).unwrap();
        assert_eq!(messages[0].uri(), Some("/again"));
    }

    #[test]
    fn release_drops_parser_state_mid_message() {
        let assembler = HttpAssembler::new();
        let mut buf = buffer_with(b"GET /partial HT", 8192);
        assert!(assembler.feed(7, &mut buf).unwrap().is_empty());

        assembler.release(7);

        // Fresh state: the old partial start line is gone.
        let mut buf = buffer_with(b"GET /fresh HTTP/1.1\r\n\r\n", 8192);
        let messages = assembler.feed(7, &mut buf).unwrap();
        assert_eq!(messages[0].uri(), Some("/fresh"));
    }

    #[test]
    fn chunked_message_split_per_chunk_keeps_the_header_block() {
        let assembler = HttpAssembler::new().assemble_chunked(false);
        let mut buf = buffer_with(
            b"POST /up HTTP/1.1\r\ntransfer-encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
            8192,
        );

        let messages = assembler.feed(1, &mut buf).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].body, b"Wiki");
        assert_eq!(messages[1].body, b"pedia");
        for msg in &messages {
            assert_eq!(msg.uri(), Some("/up"));
            assert_eq!(msg.headers.get("transfer-encoding"), Some("chunked"));
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_content_length_is_rejected_up_front() {
        let limits = HttpLimits {
            max_body_size: 16,
            ..HttpLimits::default()
        };
        let assembler = HttpAssembler::with_limits(limits);

        let mut buf = buffer_with(b"POST /x HTTP/1.1\r\ncontent-length: 17\r\n\r\n", 8192);
        let err = assembler.feed(1, &mut buf).unwrap_err();
        assert!(err.response.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
    }

    #[test]
    fn request_larger_than_the_connection_buffer_fails_fast() {
        let assembler = HttpAssembler::new();
        // Declared body can never fit the 64-byte connection buffer.
        let mut buf = buffer_with(b"POST /big HTTP/1.1\r\ncontent-length: 100\r\n\r\n", 64);
        assert!(assembler.feed(1, &mut buf).is_err());
    }
}
