//! Wire codec subsystem.
//!
//! # Data Flow
//! ```text
//! path suffix (.json/.raw/.txt/...) or ?format= / ?type= / ?jsonp=
//!     → Output (format + optional callback wrapper)
//!
//! Reply / Message / failure text
//!     → Output::encode_* → body bytes + content type
//! ```
//!
//! # Design Decisions
//! - JSON is the default and the only format a callback can wrap
//! - Unknown format names are rejected before any backend dispatch
//! - Unknown path suffixes are not formats; they stay part of the argument

pub mod json;
pub mod resp;

use bytes::{BufMut, Bytes, BytesMut};

use crate::backend::{Message, Reply};

/// Error selecting an output representation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported format '{0}'")]
    UnsupportedFormat(String),
    #[error("invalid callback name '{0}'")]
    InvalidCallback(String),
}

const PLAIN_TYPES: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("html", "text/html"),
    ("xml", "text/xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("bin", "application/octet-stream"),
];

/// Output representation of a response body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Format {
    /// `{"CMD": value}`.
    #[default]
    Json,
    /// RESP, as Redis would send it.
    Raw,
    /// The bare value with a chosen content type.
    Plain { content_type: String },
}

impl Format {
    /// Format named by a path suffix, if the suffix is a known one.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "json" => Some(Format::Json),
            "raw" => Some(Format::Raw),
            _ => PLAIN_TYPES
                .iter()
                .find(|(name, _)| *name == ext)
                .map(|(_, content_type)| Format::Plain {
                    content_type: content_type.to_string(),
                }),
        }
    }

    /// Format named by the `format` query parameter.
    pub fn from_name(name: &str) -> Result<Self, CodecError> {
        Self::from_extension(&name.to_ascii_lowercase())
            .ok_or_else(|| CodecError::UnsupportedFormat(name.to_string()))
    }

    pub fn content_type(&self) -> &str {
        match self {
            Format::Json => "application/json",
            Format::Raw => "application/octet-stream",
            Format::Plain { content_type } => content_type,
        }
    }
}

/// Check a JSONP callback name: dotted identifiers only.
pub fn validate_callback(name: &str) -> Result<(), CodecError> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$');
    if valid {
        Ok(())
    } else {
        Err(CodecError::InvalidCallback(name.to_string()))
    }
}

/// An encoded body and the content type it is served with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub body: Bytes,
    pub content_type: String,
}

/// The representation selected for one request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Output {
    pub format: Format,
    /// JSONP callback; only applied to JSON output.
    pub jsonp: Option<String>,
}

impl Output {
    pub fn new(format: Format, jsonp: Option<String>) -> Self {
        Self { format, jsonp }
    }

    fn callback(&self) -> Option<&str> {
        match self.format {
            Format::Json => self.jsonp.as_deref(),
            _ => None,
        }
    }

    pub fn content_type(&self) -> String {
        match self.callback() {
            Some(_) => "application/javascript".to_string(),
            None => self.format.content_type().to_string(),
        }
    }

    fn json_body(&self, value: serde_json::Value) -> Bytes {
        let json = value.to_string();
        match self.callback() {
            Some(callback) => Bytes::from(format!("{}({});", callback, json)),
            None => Bytes::from(json),
        }
    }

    fn encoded(&self, body: Bytes) -> Encoded {
        Encoded {
            body,
            content_type: self.content_type(),
        }
    }

    /// Encode the reply to `command`.
    pub fn encode_reply(&self, command: &str, reply: &Reply) -> Encoded {
        let body = match &self.format {
            Format::Json => self.json_body(json::wrap(command, json::reply_to_json(reply))),
            Format::Raw => {
                let mut buf = BytesMut::new();
                resp::write_reply(&mut buf, reply);
                buf.freeze()
            }
            Format::Plain { .. } => {
                let mut buf = BytesMut::new();
                write_plain(&mut buf, reply);
                buf.freeze()
            }
        };
        self.encoded(body)
    }

    /// Encode a failure. With a command the JSON body is `{"CMD": [false, msg]}`,
    /// without one it is `{"error": msg}`.
    pub fn encode_error(&self, command: Option<&str>, message: &str) -> Encoded {
        let body = match &self.format {
            Format::Json => {
                let value = match command {
                    Some(command) => json::wrap(command, serde_json::json!([false, message])),
                    None => serde_json::json!({ "error": message }),
                };
                self.json_body(value)
            }
            Format::Raw => {
                let mut buf = BytesMut::new();
                resp::write_error(&mut buf, message);
                buf.freeze()
            }
            Format::Plain { .. } => Bytes::from(message.to_string()),
        };
        self.encoded(body)
    }

    /// Encode one published message as a stream chunk payload. Plain
    /// messages are newline-terminated, so the payload is never empty.
    pub fn encode_message(&self, command: &str, message: &Message) -> Bytes {
        match &self.format {
            Format::Json => self.json_body(json::wrap(command, json::message_to_json(message))),
            Format::Raw => {
                let mut buf = BytesMut::new();
                resp::write_message(&mut buf, message);
                buf.freeze()
            }
            Format::Plain { .. } => {
                let mut buf = BytesMut::with_capacity(message.payload.len() + 1);
                buf.put_slice(&message.payload);
                buf.put_u8(b'\n');
                buf.freeze()
            }
        }
    }
}

fn write_plain(buf: &mut BytesMut, reply: &Reply) {
    match reply {
        Reply::Nil => {}
        Reply::Integer(n) => buf.put_slice(n.to_string().as_bytes()),
        Reply::Double(d) => buf.put_slice(d.to_string().as_bytes()),
        Reply::Boolean(b) => buf.put_slice(if *b { &b"true"[..] } else { &b"false"[..] }),
        Reply::Status(s) | Reply::Error(s) => buf.put_slice(s.as_bytes()),
        Reply::Bulk(data) => buf.put_slice(data),
        Reply::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.put_u8(b'\n');
                }
                write_plain(buf, item);
            }
        }
        Reply::Map(pairs) => {
            for (i, (key, value)) in pairs.iter().enumerate() {
                if i > 0 {
                    buf.put_u8(b'\n');
                }
                write_plain(buf, key);
                buf.put_u8(b'\n');
                write_plain(buf, value);
            }
        }
    }
}
