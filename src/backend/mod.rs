//! Backend client subsystem.
//!
//! # Data Flow
//! ```text
//! Command (name + positional args, optional database)
//!     → Backend::dispatch → Reply | BackendError      (one-shot)
//!
//! Topic (channel or pattern)
//!     → Backend::subscribe → stream of Message         (standing)
//! ```
//!
//! # Design Decisions
//! - The HTTP layer only sees this trait; `redis.rs` is the production
//!   implementation and tests plug in in-memory ones
//! - Futures are `'static` so a dispatch can outlive the connection that
//!   issued it
//! - A subscription ends when its stream is dropped

pub mod redis;

#[cfg(test)]
pub(crate) mod testing;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;

pub use self::redis::RedisBackend;

/// A command translated from an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Database index selected by a numeric leading path segment.
    pub database: Option<u32>,
    /// Command name, upper-cased.
    pub name: String,
    /// Positional arguments.
    pub args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            database: None,
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The pub/sub kind of this command, if it opens a standing subscription.
    pub fn subscription_kind(&self) -> Option<TopicKind> {
        if self.name.eq_ignore_ascii_case("SUBSCRIBE") {
            Some(TopicKind::Channel)
        } else if self.name.eq_ignore_ascii_case("PSUBSCRIBE") {
            Some(TopicKind::Pattern)
        } else {
            None
        }
    }

    /// Commands whose effect is bound to one backend connection. The gateway
    /// multiplexes connections, so these never reach the backend.
    pub fn is_connection_stateful(&self) -> bool {
        const STATEFUL: &[&str] = &["MULTI", "EXEC", "DISCARD", "WATCH", "UNWATCH", "SELECT"];
        STATEFUL.iter().any(|name| self.name.eq_ignore_ascii_case(name))
    }

    /// The topics named by a subscribe-class command.
    pub fn topics(&self) -> Vec<Topic> {
        let kind = match self.subscription_kind() {
            Some(kind) => kind,
            None => return Vec::new(),
        };
        self.args
            .iter()
            .map(|arg| {
                let name = String::from_utf8_lossy(arg).into_owned();
                match kind {
                    TopicKind::Channel => Topic::Channel(name),
                    TopicKind::Pattern => Topic::Pattern(name),
                }
            })
            .collect()
    }
}

/// A reply value from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Integer(i64),
    Double(f64),
    Boolean(bool),
    /// Simple status such as `OK` or `PONG`.
    Status(String),
    /// An error nested inside an aggregate (e.g. one slot of an `EXEC`).
    Error(String),
    Bulk(Bytes),
    Array(Vec<Reply>),
    Map(Vec<(Reply, Reply)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Channel,
    Pattern,
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Channel(String),
    Pattern(String),
}

impl Topic {
    pub fn name(&self) -> &str {
        match self {
            Topic::Channel(name) | Topic::Pattern(name) => name,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Channel(name) => write!(f, "channel:{}", name),
            Topic::Pattern(name) => write!(f, "pattern:{}", name),
        }
    }
}

/// A published message delivered through a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The topic the subscription was made on.
    pub topic: Topic,
    /// The channel the message was published to.
    pub channel: String,
    pub payload: Bytes,
}

/// Failure of a backend call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend could not be reached or the connection broke.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// The backend answered with an error reply.
    #[error("{0}")]
    Reply(String),
    /// No reply arrived before the request deadline.
    #[error("backend timed out")]
    Timeout,
}

/// Stream of published messages for one topic.
pub type MessageStream = BoxStream<'static, Message>;

/// The store the gateway translates requests for.
pub trait Backend: Send + Sync + 'static {
    /// Run one command and resolve with its reply.
    fn dispatch(&self, command: Command) -> BoxFuture<'static, Result<Reply, BackendError>>;

    /// Open a standing subscription. Resolves once the subscription is
    /// confirmed; the stream then yields every message for the topic.
    fn subscribe(&self, topic: Topic) -> BoxFuture<'static, Result<MessageStream, BackendError>>;
}
