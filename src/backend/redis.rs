//! Redis implementation of [`Backend`].
//!
//! One-shot commands share a multiplexed [`ConnectionManager`] per
//! database, created on first use. Each subscription gets its own pub/sub
//! connection, closed when the returned stream is dropped.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{RedisError, Value};

use super::{Backend, BackendError, Command, Message, MessageStream, Reply, Topic};

impl From<RedisError> for BackendError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            BackendError::Unavailable(err.to_string())
        } else {
            BackendError::Reply(err.to_string())
        }
    }
}

struct Inner {
    client: redis::Client,
    /// Keyed by database; `None` is the database named in the URL.
    managers: DashMap<Option<u32>, ConnectionManager>,
}

/// Backend talking to a Redis server.
#[derive(Clone)]
pub struct RedisBackend {
    inner: Arc<Inner>,
}

impl RedisBackend {
    /// Create a backend for `url`. No connection is made until first use.
    pub fn open(url: &str) -> Result<Self, BackendError> {
        let client = redis::Client::open(url).map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                managers: DashMap::new(),
            }),
        })
    }

    async fn manager(&self, database: Option<u32>) -> Result<ConnectionManager, BackendError> {
        if let Some(manager) = self.inner.managers.get(&database) {
            return Ok(manager.clone());
        }
        let client = match database {
            None => self.inner.client.clone(),
            Some(db) => {
                let mut info = self.inner.client.get_connection_info().clone();
                info.redis.db = i64::from(db);
                redis::Client::open(info)?
            }
        };
        let manager = ConnectionManager::new(client).await?;
        tracing::debug!(database = ?database, "Opened backend connection");
        Ok(self
            .inner
            .managers
            .entry(database)
            .or_insert(manager)
            .clone())
    }
}

impl Backend for RedisBackend {
    fn dispatch(&self, command: Command) -> BoxFuture<'static, Result<Reply, BackendError>> {
        let backend = self.clone();
        Box::pin(async move {
            let mut conn = backend.manager(command.database).await?;
            let mut cmd = redis::cmd(&command.name);
            for arg in &command.args {
                cmd.arg(arg.as_ref());
            }
            let value: Value = cmd.query_async(&mut conn).await?;
            Ok(reply_from_value(value))
        })
    }

    fn subscribe(&self, topic: Topic) -> BoxFuture<'static, Result<MessageStream, BackendError>> {
        let client = self.inner.client.clone();
        Box::pin(async move {
            let mut pubsub = client.get_async_pubsub().await?;
            match &topic {
                Topic::Channel(channel) => pubsub.subscribe(channel.as_str()).await?,
                Topic::Pattern(pattern) => pubsub.psubscribe(pattern.as_str()).await?,
            }
            tracing::debug!(topic = %topic, "Backend subscription confirmed");
            let stream = pubsub.into_on_message().map(move |msg| Message {
                topic: topic.clone(),
                channel: msg.get_channel_name().to_string(),
                payload: Bytes::copy_from_slice(msg.get_payload_bytes()),
            });
            Ok(stream.boxed())
        })
    }
}

fn reply_from_value(value: Value) -> Reply {
    match value {
        Value::Nil => Reply::Nil,
        Value::Int(n) => Reply::Integer(n),
        Value::BulkString(data) => Reply::Bulk(Bytes::from(data)),
        Value::Array(items) | Value::Set(items) => {
            Reply::Array(items.into_iter().map(reply_from_value).collect())
        }
        Value::SimpleString(status) => Reply::Status(status),
        Value::Okay => Reply::Status("OK".to_string()),
        Value::Map(pairs) => Reply::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (reply_from_value(k), reply_from_value(v)))
                .collect(),
        ),
        Value::Double(d) => Reply::Double(d),
        Value::Boolean(b) => Reply::Boolean(b),
        Value::VerbatimString { text, .. } => Reply::Bulk(Bytes::from(text)),
        other => Reply::Status(format!("{:?}", other)),
    }
}
