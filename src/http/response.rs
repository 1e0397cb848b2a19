//! Building responses.

use axum::http::StatusCode;
use bytes::{BufMut, Bytes, BytesMut};
use ring::digest;

use super::parser::Version;
use crate::codec::Encoded;

const SERVER: &str = concat!("redis-gateway/", env!("CARGO_PKG_VERSION"));

//------------ Response ------------------------------------------------------

/// A complete, content-length framed response.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Vec<(&'static str, String)>,
    body: Bytes,
}

impl Response {
    /// A response carrying an encoded body.
    pub fn encoded(status: StatusCode, encoded: Encoded) -> Self {
        ResponseBuilder::new(status)
            .content_type(encoded.content_type)
            .body(encoded.body)
    }

    /// A 200 response carrying `encoded` and its entity tag, or a 304 when
    /// the client already holds that tag.
    pub fn cacheable(encoded: Encoded, if_none_match: Option<&str>) -> Self {
        let etag = etag_for(&encoded.body);
        if if_none_match.is_some_and(|header| etag_matches(header, &etag)) {
            return Self::not_modified(&etag);
        }
        ResponseBuilder::ok()
            .content_type(encoded.content_type)
            .etag(&etag)
            .body(encoded.body)
    }

    pub fn not_modified(etag: &str) -> Self {
        ResponseBuilder::new(StatusCode::NOT_MODIFIED).etag(etag).empty()
    }

    /// Answer to a CORS preflight request.
    pub fn preflight() -> Self {
        ResponseBuilder::ok()
            .header("Access-Control-Allow-Methods", "GET, POST, PUT, OPTIONS")
            .header(
                "Access-Control-Allow-Headers",
                "Authorization, Content-Type, If-None-Match",
            )
            .header("Access-Control-Max-Age", "86400")
            .empty()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Serialize status line, headers and body for the wire.
    pub fn serialize(&self, version: Version, keep_alive: bool) -> BytesMut {
        let mut buf = BytesMut::with_capacity(256 + self.body.len());
        write_status_line(&mut buf, version, self.status);
        for (name, value) in &self.headers {
            write_header(&mut buf, name, value);
        }
        if self.status != StatusCode::NOT_MODIFIED {
            write_header(&mut buf, "Content-Length", &self.body.len().to_string());
        }
        match (version, keep_alive) {
            (_, false) => write_header(&mut buf, "Connection", "close"),
            (Version::Http10, true) => write_header(&mut buf, "Connection", "keep-alive"),
            (Version::Http11, true) => {}
        }
        buf.put_slice(b"\r\n");
        buf.put_slice(&self.body);
        buf
    }
}

//------------ ResponseBuilder -----------------------------------------------

#[derive(Debug)]
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Vec<(&'static str, String)>,
}

impl ResponseBuilder {
    /// Creates a new builder with the given status.
    pub fn new(status: StatusCode) -> Self {
        ResponseBuilder {
            status,
            headers: vec![
                ("Server", SERVER.to_string()),
                ("Access-Control-Allow-Origin", "*".to_string()),
            ],
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn content_type(self, content_type: impl Into<String>) -> Self {
        self.header("Content-Type", content_type)
    }

    pub fn etag(self, etag: &str) -> Self {
        self.header("ETag", etag)
    }

    pub fn body(self, body: impl Into<Bytes>) -> Response {
        Response {
            status: self.status,
            headers: self.headers,
            body: body.into(),
        }
    }

    pub fn empty(self) -> Response {
        self.body(Bytes::new())
    }
}

//------------ Streaming -----------------------------------------------------

/// How messages are framed on a streaming response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// HTTP/1.1 chunked transfer coding; one chunk per message.
    Chunked,
    /// HTTP/1.0 has no chunking; the body simply runs until close.
    UntilClose,
}

impl Framing {
    pub fn for_version(version: Version) -> Self {
        match version {
            Version::Http11 => Framing::Chunked,
            Version::Http10 => Framing::UntilClose,
        }
    }

    /// Status line and headers opening a stream.
    pub fn head(self, version: Version, content_type: &str) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);
        write_status_line(&mut buf, version, StatusCode::OK);
        write_header(&mut buf, "Server", SERVER);
        write_header(&mut buf, "Access-Control-Allow-Origin", "*");
        write_header(&mut buf, "Content-Type", content_type);
        write_header(&mut buf, "Cache-Control", "no-cache");
        match self {
            Framing::Chunked => write_header(&mut buf, "Transfer-Encoding", "chunked"),
            Framing::UntilClose => write_header(&mut buf, "Connection", "close"),
        }
        buf.put_slice(b"\r\n");
        buf.freeze()
    }

    /// Frame one message. An empty payload frames to nothing: a zero-length
    /// chunk would end the stream.
    pub fn frame(self, payload: &[u8]) -> Bytes {
        match self {
            Framing::Chunked if payload.is_empty() => Bytes::new(),
            Framing::Chunked => {
                let mut buf = BytesMut::with_capacity(payload.len() + 16);
                buf.put_slice(format!("{:x}\r\n", payload.len()).as_bytes());
                buf.put_slice(payload);
                buf.put_slice(b"\r\n");
                buf.freeze()
            }
            Framing::UntilClose => Bytes::copy_from_slice(payload),
        }
    }

    /// Bytes ending the stream cleanly.
    pub fn end(self) -> &'static [u8] {
        match self {
            Framing::Chunked => b"0\r\n\r\n",
            Framing::UntilClose => b"",
        }
    }
}

fn write_status_line(buf: &mut BytesMut, version: Version, status: StatusCode) {
    buf.put_slice(version.as_str().as_bytes());
    buf.put_slice(b" ");
    buf.put_slice(status.as_str().as_bytes());
    buf.put_slice(b" ");
    buf.put_slice(status.canonical_reason().unwrap_or("Unknown").as_bytes());
    buf.put_slice(b"\r\n");
}

fn write_header(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_slice(b"\r\n");
}

//------------ Entity tags ---------------------------------------------------

/// Strong entity tag of a response body: a quoted SHA-256 prefix.
pub fn etag_for(body: &[u8]) -> String {
    let digest = digest::digest(&digest::SHA256, body);
    let mut etag = String::with_capacity(34);
    etag.push('"');
    for byte in &digest.as_ref()[..16] {
        etag.push_str(&format!("{:02x}", byte));
    }
    etag.push('"');
    etag
}

/// Whether an If-None-Match header value names `etag`. Comparison is weak,
/// so `W/"x"` matches `"x"`.
pub fn etag_matches(header: &str, etag: &str) -> bool {
    if header.trim() == "*" {
        return true;
    }
    EtagsIter(header).any(|tag| tag.strip_prefix("W/").unwrap_or(tag) == etag)
}

/// An iterator over the etags in an If-None-Match header value.
///
/// Stops at the first badly formatted tag.
struct EtagsIter<'a>(&'a str);

impl<'a> Iterator for EtagsIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        self.0 = self.0.trim_start();
        if self.0.is_empty() {
            return None;
        }

        let prefix_len = if self.0.starts_with('"') {
            1
        } else if self.0.starts_with("W/\"") {
            3
        } else {
            return None;
        };

        let end = self.0[prefix_len..].find('"')? + prefix_len + 1;
        let tag = &self.0[..end];

        self.0 = self.0[end..].trim_start();
        if let Some(rest) = self.0.strip_prefix(',') {
            self.0 = rest;
        }
        Some(tag)
    }
}
