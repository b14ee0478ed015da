//! Incremental byte-driven HTTP/1.x parser.
//!
//! One [`StreamState`] per client survives across `feed` calls. The scan
//! cursor and token offsets index into the connection's receive buffer, which
//! only ever shifts when a completed message (or an emitted chunk) is
//! consumed, so offsets stay valid between calls. A recoverable underflow
//! leaves the buffer exactly as it was.

use super::headers::{contains_token, HeaderMap};
use super::message::{HttpMessage, HttpMethod, HttpVersion, StartLine};
use super::HttpLimits;
use crate::client::RecvBuffer;

/// Longest accepted first token: a version string (`HTTP/1.x`) or a method.
const FIRST_TOKEN_MAX: usize = 8;
/// Version token plus its CR, as accumulated before the terminating LF.
const VERSION_TOKEN_MAX: usize = 9;

/// A fatal syntax or limit violation; converted into a 400 payload upstream.
#[derive(Debug)]
pub(super) struct Violation {
    pub details: String,
}

impl Violation {
    fn new(details: impl Into<String>) -> Self {
        Self {
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Start,
    RequestUri,
    RequestVersion,
    ResponseStatus,
    ResponseReason,
    HeaderName,
    HeaderValue,
    Body,
    ChunkSize,
    ChunkData,
    ChunkDataEnd,
    Trailers,
}

/// Per-client parser state, reset after every emitted message.
#[derive(Debug, Default)]
pub(super) struct StreamState {
    state: State,
    /// Next unexamined byte in the receive buffer.
    pos: usize,
    /// Start of the token currently being accumulated.
    token_start: usize,
    /// Bytes observed inside the header block, checked against the limit.
    header_bytes: usize,
    version: Option<HttpVersion>,
    method: Option<HttpMethod>,
    uri: String,
    status: u16,
    reason: String,
    headers: HeaderMap,
    pending_name: String,
    body_start: usize,
    body_len: usize,
    /// Offset of the current chunk's size line, kept so a per-chunk emit can
    /// excise the chunk while preserving the header block in front of it.
    chunk_start: usize,
    chunk_data_start: usize,
    chunk_len: usize,
    /// Accumulated chunk data when chunks are assembled into one message.
    chunk_body: Vec<u8>,
}

impl StreamState {
    pub(super) fn reset(&mut self) {
        *self = StreamState::default();
    }
}

/// Drive the state machine over the buffered bytes, returning every message
/// completed by them.
pub(super) fn scan(
    state: &mut StreamState,
    buf: &mut RecvBuffer,
    limits: &HttpLimits,
    assemble_chunked: bool,
) -> Result<Vec<HttpMessage>, Violation> {
    let mut out = Vec::new();

    'scan: loop {
        if state.pos >= buf.len() {
            break;
        }
        let c = buf.filled()[state.pos];

        match state.state {
            State::Start => {
                if c == b' ' && state.pos > state.token_start {
                    let first = buf.filled()[state.token_start..state.pos].to_vec();
                    if let Some(version) = HttpVersion::parse(&first) {
                        state.version = Some(version);
                        state.state = State::ResponseStatus;
                    } else if let Some(method) = HttpMethod::parse(&first) {
                        state.method = Some(method);
                        state.state = State::RequestUri;
                    } else {
                        return Err(Violation::new(
                            "first line carries neither a known method nor a protocol version",
                        ));
                    }
                    state.token_start = state.pos + 1;
                } else if state.pos - state.token_start + 1 > FIRST_TOKEN_MAX {
                    return Err(Violation::new("first line token is too long"));
                } else if !c.is_ascii() {
                    return Err(Violation::new("first line contains a non-ASCII byte"));
                }
                state.pos += 1;
            }

            State::RequestUri => {
                if c == b' ' {
                    if state.pos == state.token_start {
                        return Err(Violation::new("empty request uri"));
                    }
                    state.uri = str_token(buf, state.token_start, state.pos)?.to_string();
                    state.state = State::RequestVersion;
                    state.token_start = state.pos + 1;
                } else if state.pos - state.token_start + 1 > limits.max_request_line_len {
                    return Err(Violation::new("request line is too long"));
                } else if !c.is_ascii() {
                    return Err(Violation::new("request uri contains a non-ASCII byte"));
                }
                state.pos += 1;
            }

            State::RequestVersion => {
                if c == b'\n' && state.pos > state.token_start && buf.filled()[state.pos - 1] == b'\r'
                {
                    let token = buf.filled()[state.token_start..state.pos - 1].to_vec();
                    match HttpVersion::parse(&token) {
                        Some(version) => {
                            state.version = Some(version);
                            state.state = State::HeaderName;
                            state.token_start = state.pos + 1;
                            state.header_bytes = 0;
                        }
                        None => return Err(Violation::new("unsupported protocol version")),
                    }
                } else if state.pos - state.token_start + 1 > VERSION_TOKEN_MAX {
                    return Err(Violation::new("request line is too long"));
                } else if !c.is_ascii() {
                    return Err(Violation::new("first line contains a non-ASCII byte"));
                }
                state.pos += 1;
            }

            State::ResponseStatus => {
                if c == b' ' {
                    let data = buf.filled();
                    let token = &data[state.token_start..state.pos];
                    if token.len() != 3 || !token.iter().all(|b| b.is_ascii_digit()) {
                        return Err(Violation::new("malformed status code"));
                    }
                    state.status = (token[0] - b'0') as u16 * 100
                        + (token[1] - b'0') as u16 * 10
                        + (token[2] - b'0') as u16;
                    state.state = State::ResponseReason;
                    state.token_start = state.pos + 1;
                } else if !c.is_ascii_digit() || state.pos - state.token_start + 1 > 3 {
                    return Err(Violation::new("malformed status code"));
                }
                state.pos += 1;
            }

            State::ResponseReason => {
                if c == b'\n' && state.pos > state.token_start && buf.filled()[state.pos - 1] == b'\r'
                {
                    let reason = str_token(buf, state.token_start, state.pos - 1)?;
                    state.reason = trim_field(reason).to_string();
                    state.state = State::HeaderName;
                    state.token_start = state.pos + 1;
                    state.header_bytes = 0;
                } else if state.pos - state.token_start + 1 > limits.max_request_line_len {
                    return Err(Violation::new("status line is too long"));
                } else if !c.is_ascii() {
                    return Err(Violation::new("first line contains a non-ASCII byte"));
                }
                state.pos += 1;
            }

            State::HeaderName => {
                state.header_bytes += 1;
                if c == b':' {
                    let raw = str_token(buf, state.token_start, state.pos)?;
                    let name = trim_field(raw);
                    if name.is_empty() {
                        return Err(Violation::new("empty header field name"));
                    }
                    state.pending_name = name.to_ascii_lowercase();
                    state.state = State::HeaderValue;
                    state.token_start = state.pos + 1;
                    state.pos += 1;
                } else if state.header_bytes > limits.max_header_bytes {
                    return Err(Violation::new("header block exceeds the configured limit"));
                } else if c == b'\n'
                    && state.pos == state.token_start + 1
                    && buf.filled()[state.token_start] == b'\r'
                {
                    // Blank line: the header block is complete. Decide the
                    // body framing; chunked wins over Content-Length.
                    let after = state.pos + 1;
                    let chunked = state
                        .headers
                        .get("transfer-encoding")
                        .map_or(false, |v| contains_token(v, "chunked"));
                    if chunked {
                        state.state = State::ChunkSize;
                        state.pos = after;
                        state.token_start = after;
                        state.chunk_start = after;
                        state.chunk_body.clear();
                        continue 'scan;
                    }
                    let declared = match state.headers.get("content-length") {
                        Some(v) => match parse_content_length(v) {
                            Some(n) => Some(n),
                            None => return Err(Violation::new("unreadable content length")),
                        },
                        None => None,
                    };
                    match declared {
                        None | Some(0) => {
                            out.push(take_message(state, Vec::new()));
                            buf.drain_prefix(after);
                            state.reset();
                            continue 'scan;
                        }
                        Some(n) if n > limits.max_body_size => {
                            return Err(Violation::new(
                                "declared body exceeds the configured limit",
                            ));
                        }
                        Some(n) => {
                            if after + n > buf.capacity() {
                                return Err(Violation::new(
                                    "message does not fit the connection buffer",
                                ));
                            }
                            state.body_start = after;
                            state.body_len = n;
                            state.state = State::Body;
                            state.pos = after;
                            state.token_start = after;
                            continue 'scan;
                        }
                    }
                } else if !c.is_ascii() {
                    return Err(Violation::new("header field contains a non-ASCII byte"));
                } else {
                    state.pos += 1;
                }
            }

            State::HeaderValue => {
                state.header_bytes += 1;
                if c == b'\n' && state.pos > state.token_start && buf.filled()[state.pos - 1] == b'\r'
                {
                    let raw = str_token(buf, state.token_start, state.pos - 1)?;
                    let value = trim_field(raw);
                    if value.is_empty() {
                        return Err(Violation::new("empty header field value"));
                    }
                    let name = std::mem::take(&mut state.pending_name);
                    let value = value.to_string();
                    state.headers.insert(&name, &value);
                    state.state = State::HeaderName;
                    state.token_start = state.pos + 1;
                } else if state.header_bytes > limits.max_header_bytes {
                    return Err(Violation::new("header block exceeds the configured limit"));
                } else if !c.is_ascii() {
                    return Err(Violation::new("header field contains a non-ASCII byte"));
                }
                state.pos += 1;
            }

            State::Body => {
                let available = buf.len() - state.body_start;
                if available < state.body_len {
                    state.pos = buf.len();
                    break 'scan;
                }
                let body =
                    buf.filled()[state.body_start..state.body_start + state.body_len].to_vec();
                let consumed = state.body_start + state.body_len;
                out.push(take_message(state, body));
                buf.drain_prefix(consumed);
                state.reset();
                continue 'scan;
            }

            State::ChunkSize => {
                if c == b'\n' && state.pos > state.token_start && buf.filled()[state.pos - 1] == b'\r'
                {
                    let line = buf.filled()[state.token_start..state.pos - 1].to_vec();
                    let size = parse_chunk_size(&line)
                        .ok_or_else(|| Violation::new("unreadable chunk size"))?;
                    let after = state.pos + 1;
                    if size == 0 {
                        state.state = State::Trailers;
                        state.pos = after;
                        state.token_start = after;
                        continue 'scan;
                    }
                    if state.chunk_body.len() + size > limits.max_body_size {
                        return Err(Violation::new("chunked body exceeds the configured limit"));
                    }
                    if after + size + 2 > buf.capacity() {
                        return Err(Violation::new("chunk does not fit the connection buffer"));
                    }
                    state.chunk_len = size;
                    state.chunk_data_start = after;
                    state.state = State::ChunkData;
                    state.pos = after;
                    state.token_start = after;
                    continue 'scan;
                } else if !c.is_ascii() {
                    return Err(Violation::new("unreadable chunk size"));
                }
                state.pos += 1;
            }

            State::ChunkData => {
                let available = buf.len() - state.chunk_data_start;
                if available < state.chunk_len {
                    state.pos = buf.len();
                    break 'scan;
                }
                state.pos = state.chunk_data_start + state.chunk_len;
                state.token_start = state.pos;
                state.state = State::ChunkDataEnd;
                continue 'scan;
            }

            State::ChunkDataEnd => {
                if buf.len() < state.pos + 2 {
                    break 'scan;
                }
                {
                    let data = buf.filled();
                    if data[state.pos] != b'\r' || data[state.pos + 1] != b'\n' {
                        return Err(Violation::new("malformed chunk delimiter"));
                    }
                }
                let data_start = state.chunk_data_start;
                let data_end = data_start + state.chunk_len;
                if assemble_chunked {
                    let chunk = buf.filled()[data_start..data_end].to_vec();
                    state.chunk_body.extend_from_slice(&chunk);
                    let after = state.pos + 2;
                    state.pos = after;
                    state.token_start = after;
                    state.chunk_start = after;
                } else {
                    // Emit one message per chunk, then excise the chunk so
                    // the header block stays in front of the next one.
                    let body = buf.filled()[data_start..data_end].to_vec();
                    out.push(chunk_message(state, body));
                    let remove_end = state.pos + 2;
                    buf.excise(state.chunk_start, remove_end);
                    state.pos = state.chunk_start;
                    state.token_start = state.chunk_start;
                }
                state.state = State::ChunkSize;
                continue 'scan;
            }

            State::Trailers => {
                if c == b'\n'
                    && state.pos == state.token_start + 1
                    && buf.filled()[state.token_start] == b'\r'
                {
                    // Terminating blank line; trailer fields are skipped, not
                    // retained.
                    let consumed = state.pos + 1;
                    if assemble_chunked {
                        let body = std::mem::take(&mut state.chunk_body);
                        out.push(take_message(state, body));
                    }
                    buf.drain_prefix(consumed);
                    state.reset();
                    continue 'scan;
                } else if c == b'\n'
                    && state.pos > state.token_start
                    && buf.filled()[state.pos - 1] == b'\r'
                {
                    state.token_start = state.pos + 1;
                    state.pos += 1;
                } else if !c.is_ascii() {
                    return Err(Violation::new("malformed trailer"));
                } else {
                    state.pos += 1;
                }
            }
        }
    }

    // A full buffer that produced nothing and cannot accept another byte can
    // never make progress; fail instead of stalling the connection.
    if out.is_empty() && buf.is_full() && state.pos >= buf.len() {
        return Err(Violation::new("message does not fit the connection buffer"));
    }

    Ok(out)
}

fn take_message(state: &mut StreamState, body: Vec<u8>) -> HttpMessage {
    let version = state.version.unwrap_or(HttpVersion::Http11);
    let headers = std::mem::take(&mut state.headers);
    let start = match state.method {
        Some(method) => StartLine::Request {
            method,
            uri: std::mem::take(&mut state.uri),
        },
        None => StartLine::Response {
            status: state.status,
            reason: std::mem::take(&mut state.reason),
        },
    };
    HttpMessage {
        version,
        start,
        headers,
        body,
    }
}

fn chunk_message(state: &StreamState, body: Vec<u8>) -> HttpMessage {
    let version = state.version.unwrap_or(HttpVersion::Http11);
    let start = match state.method {
        Some(method) => StartLine::Request {
            method,
            uri: state.uri.clone(),
        },
        None => StartLine::Response {
            status: state.status,
            reason: state.reason.clone(),
        },
    };
    HttpMessage {
        version,
        start,
        headers: state.headers.clone(),
        body,
    }
}

fn str_token(buf: &RecvBuffer, start: usize, end: usize) -> Result<&str, Violation> {
    std::str::from_utf8(&buf.filled()[start..end])
        .map_err(|_| Violation::new("token is not valid ASCII"))
}

fn trim_field(s: &str) -> &str {
    s.trim_matches(|c| c == ' ' || c == '\t')
}

/// Digits only, optionally wrapped in one pair of double quotes.
fn parse_content_length(value: &str) -> Option<usize> {
    let mut v = value.trim();
    if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
        v = &v[1..v.len() - 1];
    }
    if v.is_empty() || !v.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    v.parse().ok()
}

/// Leading hex digits; a `;`-prefixed chunk extension is accepted and ignored.
fn parse_chunk_size(line: &[u8]) -> Option<usize> {
    let line = std::str::from_utf8(line).ok()?.trim();
    let digits_end = line
        .bytes()
        .position(|b| !b.is_ascii_hexdigit())
        .unwrap_or(line.len());
    if digits_end == 0 {
        return None;
    }
    let rest = &line[digits_end..];
    if !rest.is_empty() && !rest.starts_with(';') {
        return None;
    }
    usize::from_str_radix(&line[..digits_end], 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_accepts_plain_and_quoted_digits() {
        assert_eq!(parse_content_length("26"), Some(26));
        assert_eq!(parse_content_length(" 26 "), Some(26));
        assert_eq!(parse_content_length("\"26\""), Some(26));
        assert_eq!(parse_content_length("0"), Some(0));
        assert_eq!(parse_content_length(""), None);
        assert_eq!(parse_content_length("\"\""), None);
        assert_eq!(parse_content_length("26a"), None);
        assert_eq!(parse_content_length("-1"), None);
    }

    #[test]
    fn chunk_size_parses_hex_and_ignores_extensions() {
        assert_eq!(parse_chunk_size(b"4"), Some(4));
        assert_eq!(parse_chunk_size(b"1A"), Some(26));
        assert_eq!(parse_chunk_size(b"ff"), Some(255));
        assert_eq!(parse_chunk_size(b"4;name=value"), Some(4));
        assert_eq!(parse_chunk_size(b"0"), Some(0));
        assert_eq!(parse_chunk_size(b""), None);
        assert_eq!(parse_chunk_size(b";ext"), None);
        assert_eq!(parse_chunk_size(b"xyz"), None);
    }
}
