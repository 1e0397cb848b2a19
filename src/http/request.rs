//! Request accumulation and translation into backend commands.
//!
//! # Responsibilities
//! - Accumulate parse events into one request, keeping only the headers
//!   the gateway acts on
//! - Decide keep-alive from the connection header and protocol version
//! - Translate method, path, query and body into a [`Command`] plus the
//!   [`Output`] its reply is encoded with

use std::borrow::Cow;

use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use percent_encoding::percent_decode_str;

use super::parser::{ParseError, ParseEvent, Version};
use crate::backend::{BackendError, Command};
use crate::codec::{self, CodecError, Format, Output};

/// A request-level failure and the response status it maps to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("{0}")]
    Forbidden(String),
    #[error("not found")]
    NotFound,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::Parse(ParseError::Malformed(_)) => StatusCode::BAD_REQUEST,
            HttpError::Parse(ParseError::HeadersTooLarge) => {
                StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE
            }
            HttpError::Parse(ParseError::BodyTooLarge) => StatusCode::PAYLOAD_TOO_LARGE,
            HttpError::BadRequest(_) | HttpError::Codec(_) => StatusCode::BAD_REQUEST,
            HttpError::Forbidden(_) => StatusCode::FORBIDDEN,
            HttpError::NotFound => StatusCode::NOT_FOUND,
            HttpError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            HttpError::Backend(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct InputHeaders {
    connection: Option<String>,
    if_none_match: Option<String>,
    authorization: Option<String>,
}

/// The request currently being read on a connection.
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    target: String,
    version: Version,
    headers: InputHeaders,
    body: BytesMut,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: String::new(),
            target: String::new(),
            version: Version::Http11,
            headers: InputHeaders::default(),
            body: BytesMut::new(),
        }
    }
}

/// What a complete request asks the gateway to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// CORS preflight, answered without the backend.
    Preflight,
    Command(ResolvedCommand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub command: Command,
    pub output: Output,
}

impl Request {
    /// Fold one parse event into the request. Returns true once the request
    /// is complete.
    pub fn apply(&mut self, event: ParseEvent) -> bool {
        match event {
            ParseEvent::RequestLine {
                method,
                target,
                version,
            } => {
                self.method = method;
                self.target = target;
                self.version = version;
            }
            ParseEvent::Header { name, value } => match name.as_str() {
                "connection" => match &mut self.headers.connection {
                    Some(existing) => {
                        existing.push_str(", ");
                        existing.push_str(&value);
                    }
                    None => self.headers.connection = Some(value),
                },
                "if-none-match" => self.headers.if_none_match = Some(value),
                "authorization" => {
                    self.headers.authorization.get_or_insert(value);
                }
                _ => {}
            },
            ParseEvent::Body(fragment) => self.body.extend_from_slice(&fragment),
            ParseEvent::Complete => return true,
        }
        false
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn authorization(&self) -> Option<&str> {
        self.headers.authorization.as_deref()
    }

    pub fn if_none_match(&self) -> Option<&str> {
        self.headers.if_none_match.as_deref()
    }

    fn connection_has(&self, token: &str) -> bool {
        self.headers.connection.as_deref().is_some_and(|value| {
            value
                .split(',')
                .any(|item| item.trim().eq_ignore_ascii_case(token))
        })
    }

    /// HTTP/1.1 keeps the connection unless told to close; HTTP/1.0 closes
    /// unless told to keep it.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::Http11 => !self.connection_has("close"),
            Version::Http10 => self.connection_has("keep-alive"),
        }
    }

    /// Drop everything request-scoped before the next request.
    pub fn clear(&mut self) {
        self.method.clear();
        self.target.clear();
        self.version = Version::Http11;
        self.headers = InputHeaders::default();
        self.body.clear();
    }

    /// Translate the request. `default_root` is the command path served for
    /// a bare `GET /`.
    pub fn resolve(&self, default_root: Option<&str>) -> Result<Resolution, HttpError> {
        let (path, query) = match self.target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (self.target.as_str(), ""),
        };
        let command_path: Cow<'_, str> = match self.method.as_str() {
            "OPTIONS" => return Ok(Resolution::Preflight),
            "GET" | "PUT" => Cow::Borrowed(path),
            "POST" => String::from_utf8_lossy(&self.body),
            _ => return Err(HttpError::MethodNotAllowed),
        };

        let mut command_path = command_path.trim().trim_start_matches('/');
        if command_path.is_empty() && self.method == "GET" {
            if let Some(root) = default_root {
                command_path = root.trim_start_matches('/');
            }
        }
        let command_path = command_path.strip_suffix('/').unwrap_or(command_path);
        if command_path.is_empty() {
            return Err(HttpError::NotFound);
        }

        let mut segments: Vec<&str> = command_path.split('/').collect();
        let mut suffix_format = None;
        if let Some(&last) = segments.last() {
            if let Some((stem, ext)) = last.rsplit_once('.') {
                if let Some(format) = Format::from_extension(ext) {
                    suffix_format = Some(format);
                    segments.pop();
                    segments.push(stem);
                }
            }
        }

        let mut rest = &segments[..];
        let mut database = None;
        if rest.len() > 1 && !rest[0].is_empty() && rest[0].bytes().all(|b| b.is_ascii_digit()) {
            let index = rest[0]
                .parse()
                .map_err(|_| HttpError::BadRequest(format!("invalid database '{}'", rest[0])))?;
            database = Some(index);
            rest = &rest[1..];
        }

        let (name, args) = rest.split_first().ok_or(HttpError::NotFound)?;
        // One spelling from here on: the ACL, the subscribe check and the
        // backend all see the upper-cased name.
        let name = percent_decode_str(name)
            .decode_utf8_lossy()
            .to_ascii_uppercase();
        if name.is_empty() {
            return Err(HttpError::NotFound);
        }
        let mut command = Command::new(name);
        command.database = database;
        command.args = args
            .iter()
            .map(|arg| Bytes::from(percent_decode_str(arg).collect::<Vec<u8>>()))
            .collect();
        if self.method == "PUT" {
            command.args.push(Bytes::copy_from_slice(&self.body));
        }

        let output = select_output(&Query::parse(query), suffix_format)?;
        Ok(Resolution::Command(ResolvedCommand { command, output }))
    }
}

#[derive(Debug, Default)]
struct Query {
    format: Option<String>,
    content_type: Option<String>,
    callback: Option<String>,
}

impl Query {
    fn parse(query: &str) -> Self {
        let mut parsed = Query::default();
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = percent_decode_str(value).decode_utf8_lossy().into_owned();
            if value.is_empty() {
                continue;
            }
            match key {
                "format" => parsed.format = Some(value),
                "type" => parsed.content_type = Some(value),
                "jsonp" | "callback" => parsed.callback = Some(value),
                _ => {}
            }
        }
        parsed
    }
}

/// `format=` beats the path suffix, which beats the JSON default. `type=`
/// turns any choice into plain output with that content type.
fn select_output(query: &Query, suffix_format: Option<Format>) -> Result<Output, CodecError> {
    let mut format = match &query.format {
        Some(name) => Format::from_name(name)?,
        None => suffix_format.unwrap_or_default(),
    };
    if let Some(content_type) = &query.content_type {
        format = Format::Plain {
            content_type: content_type.clone(),
        };
    }
    let jsonp = match &query.callback {
        Some(callback) => {
            codec::validate_callback(callback)?;
            Some(callback.clone())
        }
        None => None,
    };
    Ok(Output::new(format, jsonp))
}
