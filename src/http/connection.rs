//! Per-connection request lifecycle.
//!
//! # States
//! ```text
//! Idle → ReadingHeaders → ReadingBody → Dispatching → WritingResponse
//!                                                         ├→ Idle       (keep-alive)
//!                                                         ├→ Streaming  (subscribe)
//!                                                         └→ Closed
//! ```
//!
//! One backend call at most is in flight per connection. The call runs on
//! its own task and reports back through a oneshot channel; if the
//! connection task is cancelled first, the receiving half goes with it and
//! the reply is discarded when it arrives. A peer that shuts down its write
//! side while a call is in flight still gets the reply, and the connection
//! closes after it.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use bytes::BytesMut;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::Instrument;
use uuid::Uuid;

use super::parser::{ParseError, ParseEvent, RequestDecoder};
use super::request::{HttpError, Request, Resolution, ResolvedCommand};
use super::response::{Framing, Response, ResponseBuilder};
use super::server::GatewayState;
use crate::backend::{BackendError, Command};
use crate::codec::Output;
use crate::net::ConnectionId;
use crate::observability::metrics;
use crate::pubsub::Subscription;
use crate::security::ClientIdentity;

/// Where a connection is in its request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    ReadingHeaders,
    ReadingBody,
    Dispatching,
    WritingResponse,
    Streaming,
    Closed,
}

type BackendResult<T> = Result<T, BackendError>;

/// Metrics label for requests whose command name the backend did not
/// accept. Keeps client-chosen names out of the label set.
const OTHER_COMMAND: &str = "other";

enum ReadOutcome {
    Complete,
    Invalid(ParseError),
    Closed,
}

enum Outcome {
    KeepAlive,
    Close,
}

enum Dispatched {
    Respond { label: String, response: Response },
    Stream {
        name: String,
        output: Output,
        subscription: Subscription,
    },
}

impl Dispatched {
    fn respond(label: impl Into<String>, response: Response) -> Self {
        Dispatched::Respond {
            label: label.into(),
            response,
        }
    }
}

enum Execution<T> {
    Reply(Result<BackendResult<T>, oneshot::error::RecvError>),
    Read(std::io::Result<usize>),
    TimedOut,
}

enum StreamEvent {
    Message(Option<crate::backend::Message>),
    Read(std::io::Result<usize>),
}

/// Hand a finished backend call back to its connection. Returns false if
/// the connection is gone, in which case the result is discarded.
pub(crate) fn deliver_reply<T>(
    id: ConnectionId,
    tx: oneshot::Sender<BackendResult<T>>,
    result: BackendResult<T>,
) -> bool {
    if tx.send(result).is_ok() {
        return true;
    }
    tracing::debug!(connection_id = %id, "Connection closed before backend replied; reply discarded");
    metrics::record_discarded_reply();
    false
}

/// One accepted socket and the request currently being served on it.
pub struct HttpConnection<S> {
    id: ConnectionId,
    peer: SocketAddr,
    stream: S,
    state: Arc<GatewayState>,
    decoder: RequestDecoder,
    request: Request,
    buffer: BytesMut,
    phase: ConnectionState,
    /// The peer has shut down its write side.
    read_closed: bool,
}

impl<S> HttpConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(id: ConnectionId, peer: SocketAddr, stream: S, state: Arc<GatewayState>) -> Self {
        let decoder = RequestDecoder::new(state.http.max_header_bytes, state.http.max_body_size);
        Self {
            id,
            peer,
            stream,
            state,
            decoder,
            request: Request::default(),
            buffer: BytesMut::with_capacity(4096),
            phase: ConnectionState::Idle,
            read_closed: false,
        }
    }

    /// Serve requests until the peer leaves, a request forbids reuse, or a
    /// stream ends.
    pub async fn run(mut self) {
        tracing::debug!(connection_id = %self.id, peer_addr = %self.peer, "Connection opened");
        loop {
            match self.serve_one().await {
                Ok(Outcome::KeepAlive) => continue,
                Ok(Outcome::Close) => break,
                Err(e) => {
                    tracing::debug!(connection_id = %self.id, error = %e, "Connection I/O error");
                    break;
                }
            }
        }
        self.transition(ConnectionState::Closed);
        let _ = self.stream.shutdown().await;
        tracing::debug!(connection_id = %self.id, "Connection closed");
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.phase != next {
            tracing::trace!(connection_id = %self.id, from = ?self.phase, to = ?next, "State change");
            self.phase = next;
        }
    }

    async fn serve_one(&mut self) -> std::io::Result<Outcome> {
        self.transition(ConnectionState::Idle);
        match self.read_request().await? {
            ReadOutcome::Complete => {}
            ReadOutcome::Closed => return Ok(Outcome::Close),
            ReadOutcome::Invalid(err) => {
                tracing::debug!(connection_id = %self.id, error = %err, "Rejecting malformed request");
                let error = HttpError::from(err);
                let response = error_response(&error, &Output::default(), None);
                self.write_response(&response, false).await?;
                return Ok(Outcome::Close);
            }
        }

        let span = tracing::debug_span!(
            "request",
            request_id = %Uuid::new_v4(),
            connection_id = %self.id,
            command = tracing::field::Empty,
        );
        self.handle().instrument(span).await
    }

    async fn read_request(&mut self) -> std::io::Result<ReadOutcome> {
        loop {
            match self.decoder.next_event(&mut self.buffer) {
                Ok(Some(event)) => {
                    match &event {
                        ParseEvent::RequestLine { .. } => self.transition(ConnectionState::ReadingHeaders),
                        ParseEvent::Body(_) => self.transition(ConnectionState::ReadingBody),
                        _ => {}
                    }
                    if self.request.apply(event) {
                        return Ok(ReadOutcome::Complete);
                    }
                }
                Ok(None) => {
                    if self.stream.read_buf(&mut self.buffer).await? == 0 {
                        if !self.decoder.is_idle() {
                            tracing::debug!(connection_id = %self.id, "Peer closed mid-request");
                        }
                        return Ok(ReadOutcome::Closed);
                    }
                }
                Err(err) => return Ok(ReadOutcome::Invalid(err)),
            }
        }
    }

    async fn handle(&mut self) -> std::io::Result<Outcome> {
        self.transition(ConnectionState::Dispatching);
        let start = Instant::now();

        let (label, response) = match self.dispatch().await? {
            Dispatched::Respond { label, response } => (label, response),
            Dispatched::Stream {
                name,
                output,
                subscription,
            } => {
                metrics::record_request(&name, StatusCode::OK.as_u16(), start);
                self.stream_messages(subscription, &name, &output).await?;
                return Ok(Outcome::Close);
            }
        };

        let status = response.status().as_u16();
        metrics::record_request(&label, status, start);
        tracing::debug!(status, "Request served");

        let keep_alive = self.request.keep_alive() && !self.read_closed;
        self.write_response(&response, keep_alive).await?;
        if !keep_alive {
            return Ok(Outcome::Close);
        }
        self.request.clear();
        self.decoder.reset();
        Ok(Outcome::KeepAlive)
    }

    async fn dispatch(&mut self) -> std::io::Result<Dispatched> {
        let resolved = match self.request.resolve(self.state.http.default_root.as_deref()) {
            Ok(Resolution::Preflight) => {
                return Ok(Dispatched::respond("OPTIONS", Response::preflight()))
            }
            Ok(Resolution::Command(resolved)) => resolved,
            Err(error) => {
                return Ok(Dispatched::respond(
                    OTHER_COMMAND,
                    error_response(&error, &Output::default(), None),
                ))
            }
        };
        let ResolvedCommand { command, output } = resolved;
        let name = command.name.clone();
        tracing::Span::current().record("command", name.as_str());

        if let Err(error) = self.authorize(&command) {
            let response = error_response(&error, &output, Some(&name));
            return Ok(Dispatched::respond(OTHER_COMMAND, response));
        }

        if command.subscription_kind().is_some() {
            let topics = command.topics();
            if topics.is_empty() {
                let error = HttpError::BadRequest(format!("{} needs at least one channel", name));
                let response = error_response(&error, &output, Some(&name));
                return Ok(Dispatched::respond(OTHER_COMMAND, response));
            }
            let hub = self.state.hub.clone();
            let id = self.id;
            let subscribe = Box::pin(async move { hub.subscribe(id, topics).await });
            return Ok(match self.execute(subscribe).await? {
                Ok(subscription) => Dispatched::Stream {
                    name,
                    output,
                    subscription,
                },
                Err(err) => {
                    tracing::warn!(command = %name, error = %err, "Subscription failed");
                    let response = error_response(&HttpError::from(err), &output, Some(&name));
                    Dispatched::respond(OTHER_COMMAND, response)
                }
            });
        }

        let call = self.state.backend.dispatch(command);
        Ok(match self.execute(call).await? {
            Ok(reply) => {
                let encoded = output.encode_reply(&name, &reply);
                let response = Response::cacheable(encoded, self.request.if_none_match());
                Dispatched::respond(name, response)
            }
            Err(err) => {
                tracing::warn!(command = %name, error = %err, "Backend call failed");
                let response = error_response(&HttpError::from(err), &output, Some(&name));
                Dispatched::respond(OTHER_COMMAND, response)
            }
        })
    }

    fn authorize(&self, command: &Command) -> Result<(), HttpError> {
        if command.is_connection_stateful() {
            return Err(HttpError::Forbidden(format!(
                "{} is not available through the gateway",
                command.name
            )));
        }
        let client = ClientIdentity::new(self.peer.ip(), self.request.authorization());
        if self.state.acl.allow_command(&command.name, &client) {
            return Ok(());
        }
        metrics::record_acl_denied();
        tracing::info!(
            peer_addr = %self.peer,
            command = %command.name,
            "Command denied by ACL"
        );
        Err(HttpError::Forbidden("forbidden".to_string()))
    }

    /// Run one backend call to completion while watching the socket.
    ///
    /// Bytes that arrive in the meantime are buffered for the next request.
    /// End of input only stops the reading; the reply is still awaited.
    async fn execute<T>(
        &mut self,
        call: BoxFuture<'static, BackendResult<T>>,
    ) -> std::io::Result<BackendResult<T>>
    where
        T: Send + 'static,
    {
        let (tx, mut rx) = oneshot::channel();
        let id = self.id;
        tokio::spawn(async move {
            let result = call.await;
            deliver_reply(id, tx, result);
        });

        let timeout = self.state.request_timeout();
        let deadline = sleep_or_pending(timeout);
        tokio::pin!(deadline);
        let read_limit = self.state.http.max_header_bytes + self.state.http.max_body_size;

        loop {
            let event = tokio::select! {
                reply = &mut rx => Execution::Reply(reply),
                read = self.stream.read_buf(&mut self.buffer),
                    if !self.read_closed && self.buffer.len() < read_limit =>
                {
                    Execution::Read(read)
                }
                _ = &mut deadline => Execution::TimedOut,
            };
            match event {
                Execution::Reply(Ok(result)) => return Ok(result),
                Execution::Reply(Err(_)) => {
                    return Ok(Err(BackendError::Unavailable(
                        "backend task ended without a reply".to_string(),
                    )))
                }
                Execution::Read(Ok(0)) => {
                    tracing::debug!(connection_id = %self.id, "Peer stopped sending while a backend call was in flight");
                    self.read_closed = true;
                }
                Execution::Read(Ok(_)) => continue,
                Execution::Read(Err(e)) => return Err(e),
                Execution::TimedOut => {
                    tracing::warn!(connection_id = %self.id, timeout = ?timeout, "Backend call timed out");
                    return Ok(Err(BackendError::Timeout));
                }
            }
        }
    }

    async fn write_response(&mut self, response: &Response, keep_alive: bool) -> std::io::Result<()> {
        self.transition(ConnectionState::WritingResponse);
        let wire = response.serialize(self.request.version(), keep_alive);
        self.stream.write_all(&wire).await?;
        self.stream.flush().await
    }

    /// Push every message of `subscription` to the peer until either side
    /// ends. Request bytes arriving on a streaming connection are ignored.
    async fn stream_messages(
        &mut self,
        mut subscription: Subscription,
        name: &str,
        output: &Output,
    ) -> std::io::Result<()> {
        self.transition(ConnectionState::Streaming);
        let version = self.request.version();
        let framing = Framing::for_version(version);
        self.stream
            .write_all(&framing.head(version, &output.content_type()))
            .await?;
        self.stream.flush().await?;
        self.buffer.clear();
        tracing::info!(
            connection_id = %self.id,
            peer_addr = %self.peer,
            topics = subscription.topics().len(),
            "Streaming subscription"
        );

        loop {
            let event = tokio::select! {
                message = subscription.next_message() => StreamEvent::Message(message),
                read = self.stream.read_buf(&mut self.buffer), if !self.read_closed => {
                    StreamEvent::Read(read)
                }
            };
            match event {
                StreamEvent::Message(Some(message)) => {
                    let payload = output.encode_message(name, &message);
                    self.stream.write_all(&framing.frame(&payload)).await?;
                    self.stream.flush().await?;
                    metrics::record_published_message();
                }
                StreamEvent::Message(None) => {
                    tracing::debug!(connection_id = %self.id, "Subscription ended upstream");
                    self.stream.write_all(framing.end()).await?;
                    self.stream.flush().await?;
                    return Ok(());
                }
                StreamEvent::Read(Ok(0)) => {
                    tracing::debug!(connection_id = %self.id, "Subscriber disconnected");
                    return Ok(());
                }
                StreamEvent::Read(Ok(_)) => self.buffer.clear(),
                StreamEvent::Read(Err(e)) => return Err(e),
            }
        }
    }
}

fn sleep_or_pending(timeout: Option<std::time::Duration>) -> impl Future<Output = ()> {
    async move {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    }
}

fn error_response(error: &HttpError, output: &Output, command: Option<&str>) -> Response {
    let encoded = output.encode_error(command, &error.to_string());
    let builder = ResponseBuilder::new(error.status()).content_type(encoded.content_type);
    let builder = match error {
        HttpError::MethodNotAllowed => builder.header("Allow", "GET, POST, PUT, OPTIONS"),
        _ => builder,
    };
    builder.body(encoded.body)
}
