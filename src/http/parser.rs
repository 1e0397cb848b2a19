//! Pull-based incremental HTTP/1.x request decoder.
//!
//! The decoder owns no socket and no request state. The connection feeds
//! bytes into a `BytesMut` and pulls [`ParseEvent`]s out of it until the
//! decoder asks for more input (`Ok(None)`).

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

/// Protocol version of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// One step of request decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    RequestLine {
        method: String,
        target: String,
        version: Version,
    },
    /// A header field. The name is lowercased.
    Header { name: String, value: String },
    /// A fragment of the entity body.
    Body(Bytes),
    /// The request is complete.
    Complete,
}

/// Input the decoder refuses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed request: {0}")]
    Malformed(&'static str),
    #[error("request header section too large")]
    HeadersTooLarge,
    #[error("request body too large")]
    BodyTooLarge,
}

/// Header fields accepted per request. More is answered like an oversized
/// header section.
const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Head,
    Body { remaining: usize },
    Done,
}

#[derive(Debug)]
pub struct RequestDecoder {
    state: State,
    max_header_bytes: usize,
    max_body_size: usize,
    started: bool,
    pending: VecDeque<ParseEvent>,
}

impl RequestDecoder {
    pub fn new(max_header_bytes: usize, max_body_size: usize) -> Self {
        Self {
            state: State::Head,
            max_header_bytes,
            max_body_size,
            started: false,
            pending: VecDeque::new(),
        }
    }

    /// Prepare for the next request on the same connection.
    pub fn reset(&mut self) {
        self.state = State::Head;
        self.started = false;
        self.pending.clear();
    }

    /// True until the first byte of a request has been seen.
    pub fn is_idle(&self) -> bool {
        self.state == State::Head && !self.started
    }

    /// Pull the next event out of `buf`. `Ok(None)` means more input is
    /// needed, or that the request is complete and `reset` has not been
    /// called yet.
    pub fn next_event(&mut self, buf: &mut BytesMut) -> Result<Option<ParseEvent>, ParseError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        match self.state {
            State::Head => {
                if !self.decode_head(buf)? {
                    return Ok(None);
                }
                Ok(self.pending.pop_front())
            }
            State::Body { remaining } => {
                if buf.is_empty() {
                    return Ok(None);
                }
                let take = remaining.min(buf.len());
                let fragment = buf.split_to(take).freeze();
                if take == remaining {
                    self.state = State::Done;
                    self.pending.push_back(ParseEvent::Complete);
                } else {
                    self.state = State::Body {
                        remaining: remaining - take,
                    };
                }
                Ok(Some(ParseEvent::Body(fragment)))
            }
            State::Done => Ok(None),
        }
    }

    /// Parse the request line and header block once it is fully buffered,
    /// queueing its events. Returns false while the head is incomplete.
    fn decode_head(&mut self, buf: &mut BytesMut) -> Result<bool, ParseError> {
        // Tolerate stray CRLFs between pipelined requests.
        let blank = buf
            .iter()
            .position(|&b| b != b'\r' && b != b'\n')
            .unwrap_or(buf.len());
        let _ = buf.split_to(blank);
        if buf.is_empty() {
            return Ok(false);
        }
        self.started = true;

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        let head_len = match req.parse(&buf[..]).map_err(parse_error)? {
            httparse::Status::Partial => {
                if buf.len() > self.max_header_bytes {
                    return Err(ParseError::HeadersTooLarge);
                }
                return Ok(false);
            }
            httparse::Status::Complete(len) => len,
        };
        if head_len > self.max_header_bytes {
            return Err(ParseError::HeadersTooLarge);
        }

        let method = req.method.ok_or(ParseError::Malformed("method"))?;
        let target = req.path.ok_or(ParseError::Malformed("request target"))?;
        if !(target.starts_with('/') || target == "*") {
            return Err(ParseError::Malformed("request target"));
        }
        let version = match req.version {
            Some(0) => Version::Http10,
            Some(1) => Version::Http11,
            _ => return Err(ParseError::Malformed("unsupported HTTP version")),
        };

        let mut events = VecDeque::with_capacity(req.headers.len() + 2);
        events.push_back(ParseEvent::RequestLine {
            method: method.to_string(),
            target: target.to_string(),
            version,
        });
        let mut content_length = None;
        for header in req.headers.iter() {
            let name = header.name.to_ascii_lowercase();
            let value = String::from_utf8_lossy(header.value).trim().to_string();
            self.observe_header(&name, &value, &mut content_length)?;
            events.push_back(ParseEvent::Header { name, value });
        }

        match content_length {
            Some(len) if len > 0 => self.state = State::Body { remaining: len },
            _ => {
                self.state = State::Done;
                events.push_back(ParseEvent::Complete);
            }
        }
        let _ = buf.split_to(head_len);
        self.pending = events;
        Ok(true)
    }

    fn observe_header(
        &self,
        name: &str,
        value: &str,
        content_length: &mut Option<usize>,
    ) -> Result<(), ParseError> {
        match name {
            "content-length" => {
                let len: usize = value
                    .parse()
                    .map_err(|_| ParseError::Malformed("invalid content-length"))?;
                if content_length.is_some_and(|prev| prev != len) {
                    return Err(ParseError::Malformed("conflicting content-length"));
                }
                if len > self.max_body_size {
                    return Err(ParseError::BodyTooLarge);
                }
                *content_length = Some(len);
            }
            "transfer-encoding" if !value.eq_ignore_ascii_case("identity") => {
                return Err(ParseError::Malformed("chunked request bodies are not supported"));
            }
            _ => {}
        }
        Ok(())
    }
}

fn parse_error(err: httparse::Error) -> ParseError {
    match err {
        httparse::Error::TooManyHeaders => ParseError::HeadersTooLarge,
        httparse::Error::Version => ParseError::Malformed("unsupported HTTP version"),
        httparse::Error::Token => ParseError::Malformed("request line"),
        httparse::Error::HeaderName => ParseError::Malformed("header name"),
        httparse::Error::HeaderValue => ParseError::Malformed("header value"),
        _ => ParseError::Malformed("request line"),
    }
}
