//! End-to-end assembler scenarios driven through the public `feed` surface,
//! including the limit boundaries and per-client state isolation.

use tcpframe::assembler::http::StartLine;
use tcpframe::{
    HttpAssembler, HttpLimits, HttpMessage, HttpMethod, HttpVersion, MessageAssembler, RecvBuffer,
};

const REQUEST: &[u8] = b"GET /aaa HTTP/1.1\r\n\
content-length: 26\r\n\
content-type: application/json\r\n\
host: 127.0.0.1\r\n\
\r\n\
{\r\n    \"text\" : \"hello\"\r\n}";

const BODY: &[u8] = b"{\r\n    \"text\" : \"hello\"\r\n}";

fn buffer(capacity: usize) -> RecvBuffer {
    RecvBuffer::new(capacity)
}

#[test]
fn single_complete_request() {
    let assembler = HttpAssembler::new();
    let mut buf = buffer(8192);
    assert_eq!(buf.push_bytes(REQUEST), REQUEST.len());

    let messages = assembler.feed(1, &mut buf).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(buf.len(), 0);

    let msg = &messages[0];
    assert_eq!(msg.method(), Some(HttpMethod::Get));
    assert_eq!(msg.uri(), Some("/aaa"));
    assert_eq!(msg.version, HttpVersion::Http11);
    assert_eq!(msg.body, BODY);
    assert_eq!(msg.body.len(), 26);
    assert_eq!(msg.headers.get("content-length"), Some("26"));
    assert_eq!(msg.headers.get("content-type"), Some("application/json"));
    assert_eq!(msg.headers.get("host"), Some("127.0.0.1"));
}

#[test]
fn two_pipelined_requests_in_one_buffer() {
    let assembler = HttpAssembler::new();
    let mut buf = buffer(8192);
    buf.push_bytes(REQUEST);
    buf.push_bytes(REQUEST);

    let messages = assembler.feed(1, &mut buf).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(buf.len(), 0);
    for msg in &messages {
        assert_eq!(msg.uri(), Some("/aaa"));
        assert_eq!(msg.body, BODY);
    }
}

#[test]
fn invalid_method_yields_a_400_payload() {
    let assembler = HttpAssembler::new();
    let mut buf = buffer(8192);
    buf.push_bytes(b"??? /uri");

    let err = assembler.feed(1, &mut buf).unwrap_err();
    assert!(err.response.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));

    // The payload body is a JSON object with message and details fields.
    let text = String::from_utf8(err.response.clone()).unwrap();
    let body_start = text.find("\r\n\r\n").unwrap() + 4;
    let json: serde_json::Value = serde_json::from_str(&text[body_start..]).unwrap();
    assert!(json.get("message").is_some());
    assert!(json.get("details").is_some());
}

#[test]
fn byte_at_a_time_feed_emits_exactly_once() {
    let assembler = HttpAssembler::new();
    let mut buf = buffer(8192);

    for (i, byte) in REQUEST.iter().enumerate() {
        assert_eq!(buf.push_bytes(&[*byte]), 1);
        let messages = assembler.feed(1, &mut buf).unwrap();
        if i + 1 < REQUEST.len() {
            assert!(messages.is_empty(), "premature message after {} bytes", i + 1);
        } else {
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].body, BODY);
        }
    }
    assert_eq!(buf.len(), 0);
}

#[test]
fn chunked_body_assembles_into_one_message() {
    let assembler = HttpAssembler::new();
    let mut buf = buffer(8192);
    buf.push_bytes(
        b"POST /up HTTP/1.1\r\ntransfer-encoding: chunked\r\n\r\n\
          4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
    );

    let messages = assembler.feed(1, &mut buf).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, b"Wikipedia");
    assert_eq!(messages[0].method(), Some(HttpMethod::Post));
    assert_eq!(buf.len(), 0);
}

#[test]
fn chunked_trailers_are_skipped_and_not_retained() {
    let assembler = HttpAssembler::new();
    let mut buf = buffer(8192);
    buf.push_bytes(
        b"POST /up HTTP/1.1\r\ntransfer-encoding: chunked\r\n\r\n\
          4\r\nWiki\r\n0\r\nx-checksum: abc\r\n\r\n",
    );

    let messages = assembler.feed(1, &mut buf).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, b"Wiki");
    assert_eq!(messages[0].headers.get("x-checksum"), None);
    assert_eq!(buf.len(), 0);
}

#[test]
fn chunked_detection_is_token_aware() {
    let assembler = HttpAssembler::new();

    // "chunkedd" is not the chunked token; Content-Length framing applies.
    let mut buf = buffer(8192);
    buf.push_bytes(
        b"POST /a HTTP/1.1\r\ntransfer-encoding: gzip, chunkedd\r\ncontent-length: 2\r\n\r\nok",
    );
    let messages = assembler.feed(1, &mut buf).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, b"ok");

    // A quoted list element still counts as the token.
    let mut buf = buffer(8192);
    buf.push_bytes(
        b"POST /b HTTP/1.1\r\ntransfer-encoding: \"chunked\"\r\n\r\n2\r\nok\r\n0\r\n\r\n",
    );
    let messages = assembler.feed(2, &mut buf).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, b"ok");
}

#[test]
fn interleaved_clients_assemble_independently() {
    let assembler = HttpAssembler::new();
    let split = REQUEST.len() / 2;

    // First ordering: client 1 then client 2, half a request each.
    let mut buf1 = buffer(8192);
    let mut buf2 = buffer(8192);
    buf1.push_bytes(&REQUEST[..split]);
    assert!(assembler.feed(1, &mut buf1).unwrap().is_empty());
    buf2.push_bytes(&REQUEST[..split]);
    assert!(assembler.feed(2, &mut buf2).unwrap().is_empty());

    buf1.push_bytes(&REQUEST[split..]);
    let from_1 = assembler.feed(1, &mut buf1).unwrap();
    buf2.push_bytes(&REQUEST[split..]);
    let from_2 = assembler.feed(2, &mut buf2).unwrap();

    // Reversed interleave on two fresh clients.
    let mut buf3 = buffer(8192);
    let mut buf4 = buffer(8192);
    buf4.push_bytes(&REQUEST[..split]);
    assert!(assembler.feed(4, &mut buf4).unwrap().is_empty());
    buf3.push_bytes(&REQUEST[..split]);
    assert!(assembler.feed(3, &mut buf3).unwrap().is_empty());
    buf4.push_bytes(&REQUEST[split..]);
    let from_4 = assembler.feed(4, &mut buf4).unwrap();
    buf3.push_bytes(&REQUEST[split..]);
    let from_3 = assembler.feed(3, &mut buf3).unwrap();

    for messages in [&from_1, &from_2, &from_3, &from_4] {
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].uri(), Some("/aaa"));
        assert_eq!(messages[0].body, BODY);
    }
    assert_eq!(from_1, from_2);
    assert_eq!(from_1, from_3);
    assert_eq!(from_1, from_4);
}

#[test]
fn uri_at_the_request_line_limit_is_accepted() {
    let limit = HttpLimits::default().max_request_line_len;
    let assembler = HttpAssembler::new();

    let uri: String = std::iter::once('/')
        .chain(std::iter::repeat('a').take(limit - 1))
        .collect();
    let request = format!("GET {} HTTP/1.1\r\n\r\n", uri);

    let mut buf = buffer(8192);
    buf.push_bytes(request.as_bytes());
    let messages = assembler.feed(1, &mut buf).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].uri().map(str::len), Some(limit));
}

#[test]
fn uri_one_byte_over_the_limit_is_rejected() {
    let limit = HttpLimits::default().max_request_line_len;
    let assembler = HttpAssembler::new();

    let uri: String = std::iter::once('/')
        .chain(std::iter::repeat('a').take(limit))
        .collect();
    let request = format!("GET {} HTTP/1.1\r\n\r\n", uri);

    let mut buf = buffer(8192);
    buf.push_bytes(request.as_bytes());
    assert!(assembler.feed(1, &mut buf).is_err());
}

#[test]
fn header_block_at_the_limit_is_accepted_and_over_is_rejected() {
    let limit = HttpLimits::default().max_header_bytes;
    let assembler = HttpAssembler::new();

    // Block layout: "h: " + value + "\r\n" + "\r\n" is value.len() + 7 bytes.
    let exact = "a".repeat(limit - 7);
    let request = format!("GET / HTTP/1.1\r\nh: {}\r\n\r\n", exact);
    let mut buf = buffer(2 * limit);
    buf.push_bytes(request.as_bytes());
    let messages = assembler.feed(1, &mut buf).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].headers.get("h").map(str::len), Some(limit - 7));

    let over = "a".repeat(limit - 6);
    let request = format!("GET / HTTP/1.1\r\nh: {}\r\n\r\n", over);
    let mut buf = buffer(2 * limit);
    buf.push_bytes(request.as_bytes());
    assert!(assembler.feed(2, &mut buf).is_err());
}

#[test]
fn body_at_the_size_limit_is_accepted_and_over_is_rejected() {
    let limit = HttpLimits::default().max_body_size;
    let assembler = HttpAssembler::new();

    let header = format!("POST /big HTTP/1.1\r\ncontent-length: {}\r\n\r\n", limit);
    let mut buf = buffer(limit + 256);
    buf.push_bytes(header.as_bytes());
    buf.push_bytes(&vec![b'x'; limit]);
    let messages = assembler.feed(1, &mut buf).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body.len(), limit);

    // One past the limit fails as soon as the headers terminate.
    let header = format!("POST /big HTTP/1.1\r\ncontent-length: {}\r\n\r\n", limit + 1);
    let mut buf = buffer(limit + 256);
    buf.push_bytes(header.as_bytes());
    assert!(assembler.feed(2, &mut buf).is_err());
}

#[test]
fn underflow_consumes_nothing_and_completion_consumes_a_prefix() {
    let assembler = HttpAssembler::new();

    let mut buf = buffer(8192);
    buf.push_bytes(&REQUEST[..20]);
    assert!(assembler.feed(1, &mut buf).unwrap().is_empty());
    assert_eq!(buf.filled(), &REQUEST[..20]);

    buf.push_bytes(&REQUEST[20..]);
    buf.push_bytes(b"GET /next");
    let messages = assembler.feed(1, &mut buf).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(buf.filled(), b"GET /next");
}

#[test]
fn serialize_then_reparse_round_trips_the_message() {
    let assembler = HttpAssembler::new();

    let mut original = HttpMessage::request(
        HttpVersion::Http11,
        HttpMethod::Post,
        "/round/trip",
        Default::default(),
        b"payload!".to_vec(),
    );
    original.add_header("Content-Length", "8");
    original.add_header("X-Trace", "one");
    original.add_header("x-trace", "two");

    let wire = original.serialize();
    let mut buf = buffer(8192);
    buf.push_bytes(&wire);
    let messages = assembler.feed(1, &mut buf).unwrap();
    assert_eq!(messages.len(), 1);

    let reparsed = &messages[0];
    assert_eq!(reparsed.version, original.version);
    assert_eq!(reparsed.start, original.start);
    assert_eq!(reparsed.headers, original.headers);
    assert_eq!(reparsed.body, original.body);

    match &reparsed.start {
        StartLine::Request { method, uri } => {
            assert_eq!(*method, HttpMethod::Post);
            assert_eq!(uri, "/round/trip");
        }
        other => panic!("expected a request start line, got {:?}", other),
    }
}

#[test]
fn content_length_zero_and_absent_both_mean_an_empty_body() {
    let assembler = HttpAssembler::new();

    let mut buf = buffer(8192);
    buf.push_bytes(b"GET /none HTTP/1.0\r\nhost: h\r\n\r\n");
    let messages = assembler.feed(1, &mut buf).unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].body.is_empty());
    assert_eq!(messages[0].version, HttpVersion::Http10);

    let mut buf = buffer(8192);
    buf.push_bytes(b"POST /zero HTTP/1.1\r\ncontent-length: 0\r\n\r\n");
    let messages = assembler.feed(2, &mut buf).unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].body.is_empty());
}
