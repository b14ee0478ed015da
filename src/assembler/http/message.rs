//! The structural HTTP message model and its RFC 7230 wire form.

use super::headers::HeaderMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        }
    }

    pub fn parse(token: &[u8]) -> Option<Self> {
        match token {
            b"HTTP/1.0" => Some(HttpVersion::Http10),
            b"HTTP/1.1" => Some(HttpVersion::Http11),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Trace,
    Connect,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Connect => "CONNECT",
        }
    }

    pub fn parse(token: &[u8]) -> Option<Self> {
        match token {
            b"GET" => Some(HttpMethod::Get),
            b"POST" => Some(HttpMethod::Post),
            b"PUT" => Some(HttpMethod::Put),
            b"DELETE" => Some(HttpMethod::Delete),
            b"HEAD" => Some(HttpMethod::Head),
            b"OPTIONS" => Some(HttpMethod::Options),
            b"PATCH" => Some(HttpMethod::Patch),
            b"TRACE" => Some(HttpMethod::Trace),
            b"CONNECT" => Some(HttpMethod::Connect),
            _ => None,
        }
    }
}

/// Response statuses the server itself emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    Ok,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
}

impl HttpStatus {
    pub fn code(self) -> u16 {
        match self {
            HttpStatus::Ok => 200,
            HttpStatus::BadRequest => 400,
            HttpStatus::Unauthorized => 401,
            HttpStatus::Forbidden => 403,
            HttpStatus::NotFound => 404,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            HttpStatus::Ok => "OK",
            HttpStatus::BadRequest => "Bad Request",
            HttpStatus::Unauthorized => "Unauthorized",
            HttpStatus::Forbidden => "Forbidden",
            HttpStatus::NotFound => "Not Found",
        }
    }
}

/// First line of a message, deciding whether it is a request or a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request { method: HttpMethod, uri: String },
    Response { status: u16, reason: String },
}

/// A fully framed HTTP/1.x message.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpMessage {
    pub version: HttpVersion,
    pub start: StartLine,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpMessage {
    pub fn request(
        version: HttpVersion,
        method: HttpMethod,
        uri: impl Into<String>,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> Self {
        Self {
            version,
            start: StartLine::Request {
                method,
                uri: uri.into(),
            },
            headers,
            body,
        }
    }

    /// Build a response and attach a matching `Content-Length` header.
    pub fn response(version: HttpVersion, status: HttpStatus, body: Vec<u8>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Length", &body.len().to_string());
        Self {
            version,
            start: StartLine::Response {
                status: status.code(),
                reason: status.reason().to_string(),
            },
            headers,
            body,
        }
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name, value);
    }

    pub fn is_request(&self) -> bool {
        matches!(self.start, StartLine::Request { .. })
    }

    pub fn method(&self) -> Option<HttpMethod> {
        match &self.start {
            StartLine::Request { method, .. } => Some(*method),
            StartLine::Response { .. } => None,
        }
    }

    pub fn uri(&self) -> Option<&str> {
        match &self.start {
            StartLine::Request { uri, .. } => Some(uri),
            StartLine::Response { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match &self.start {
            StartLine::Request { .. } => None,
            StartLine::Response { status, .. } => Some(*status),
        }
    }

    /// Serialize into wire form: start line, headers, blank line, body.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 128);
        match &self.start {
            StartLine::Request { method, uri } => {
                out.extend_from_slice(method.as_str().as_bytes());
                out.push(b' ');
                out.extend_from_slice(uri.as_bytes());
                out.push(b' ');
                out.extend_from_slice(self.version.as_str().as_bytes());
            }
            StartLine::Response { status, reason } => {
                out.extend_from_slice(self.version.as_str().as_bytes());
                out.extend_from_slice(format!(" {} {}", status, reason).as_bytes());
            }
        }
        out.extend_from_slice(b"\r\n");
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}
